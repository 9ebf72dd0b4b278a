//! Game notification node
//!
//! Runs a regtest chain with the game notification interface attached,
//! the notification endpoints and the JSON-RPC server.

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xaya_gamenotify::chain::{ChainView, MemoryChain};
use xaya_gamenotify::config::{CliArgs, NodeConfig};
use xaya_gamenotify::games::{MoveExtractor, TrackedGames};
use xaya_gamenotify::notify::{CatchUpEngine, GameNotifications, NotifierSettings, PubServer, Publisher};
use xaya_gamenotify::rpc::{start_rpc_server, NotifyEndpoints, RpcState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = CliArgs::parse();
    let config = NodeConfig::from_args(&args).context("invalid configuration")?;

    let games = Arc::new(TrackedGames::new(config.trackgame.iter().cloned()));
    let extractor = MoveExtractor::new(config.change_policy());

    // Both notification kinds share one endpoint when bound to the same address.
    let blocks_publisher = config
        .pubgameblocks
        .as_ref()
        .map(|addr| Arc::new(Publisher::new(addr.clone(), config.subscriberqueue)));
    let pending_publisher = match (&config.pubgamepending, &blocks_publisher) {
        (Some(addr), Some(shared)) if Some(addr) == config.pubgameblocks.as_ref() => Some(Arc::clone(shared)),
        (Some(addr), _) => Some(Arc::new(Publisher::new(addr.clone(), config.subscriberqueue))),
        (None, _) => None,
    };

    let mut servers = Vec::new();
    if let (Some(addr), Some(publisher)) = (&config.pubgameblocks, &blocks_publisher) {
        servers.push(PubServer::bind(addr, Arc::clone(publisher)).await?);
    }
    if let (Some(addr), Some(publisher)) = (&config.pubgamepending, &pending_publisher) {
        if config.pubgameblocks.as_ref() != Some(addr) {
            servers.push(PubServer::bind(addr, Arc::clone(publisher)).await?);
        }
    }

    let notifications = Arc::new(GameNotifications::new(
        Arc::clone(&games),
        extractor,
        NotifierSettings {
            blocks: blocks_publisher,
            pending: pending_publisher,
            attach_cache_depth: config.attachcachedepth,
        },
    ));

    let mut chain = MemoryChain::new_regtest();
    chain.add_listener(notifications.clone());
    info!(
        genesis = %chain.tip(),
        games = ?games.snapshot(),
        "game notification node starting"
    );

    let state = Arc::new(RpcState {
        chain: Arc::new(Mutex::new(chain)),
        games,
        notifications,
        catch_up: CatchUpEngine::new(config.maxgameblockattaches),
        endpoints: NotifyEndpoints {
            blocks: config.pubgameblocks.clone(),
            pending: config.pubgamepending.clone(),
        },
    });

    for server in servers {
        tokio::spawn(server.run());
    }

    tokio::select! {
        result = start_rpc_server(state, config.rpcport) => {
            if let Err(e) = &result {
                error!(error = %e, "RPC server failed");
            }
            result.context("RPC server")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping node");
        }
    }

    Ok(())
}
