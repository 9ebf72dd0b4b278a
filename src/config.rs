//! Node configuration
//!
//! Settings come from an optional TOML file, overlaid by command line flags.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::games::{validate_game_id, ChangePolicy, GameIdError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("maxgameblockattaches must be at least 1")]
    ZeroMaxAttaches,
    #[error("subscriberqueue must be at least 1")]
    ZeroSubscriberQueue,
    #[error("invalid tracked game {game:?}: {source}")]
    TrackedGame {
        game: String,
        #[source]
        source: GameIdError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Games tracked from startup
    pub trackgame: Vec<String>,

    /// Bind address for attach/detach notifications
    pub pubgameblocks: Option<String>,

    /// Bind address for pending move notifications
    pub pubgamepending: Option<String>,

    #[serde(default = "default_max_game_block_attaches")]
    pub maxgameblockattaches: u64,

    #[serde(default = "default_attach_cache_depth")]
    pub attachcachedepth: usize,

    /// Queue length per subscriber before it gets disconnected
    #[serde(default = "default_subscriber_queue")]
    pub subscriberqueue: usize,

    #[serde(default = "default_rpc_port")]
    pub rpcport: u16,

    /// Addresses treated as change and left out of `out`
    pub changeaddresses: Vec<String>,
}

fn default_max_game_block_attaches() -> u64 {
    1000
}
fn default_attach_cache_depth() -> usize {
    100
}
fn default_subscriber_queue() -> usize {
    1000
}
fn default_rpc_port() -> u16 {
    18443
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            trackgame: Vec::new(),
            pubgameblocks: None,
            pubgamepending: None,
            maxgameblockattaches: default_max_game_block_attaches(),
            attachcachedepth: default_attach_cache_depth(),
            subscriberqueue: default_subscriber_queue(),
            rpcport: default_rpc_port(),
            changeaddresses: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// File settings (if `--conf` is given) with the flags applied on top
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.conf {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &CliArgs) {
        self.trackgame.extend(args.trackgame.iter().cloned());
        self.changeaddresses.extend(args.changeaddress.iter().cloned());
        if let Some(addr) = &args.pubgameblocks {
            self.pubgameblocks = Some(addr.clone());
        }
        if let Some(addr) = &args.pubgamepending {
            self.pubgamepending = Some(addr.clone());
        }
        if let Some(n) = args.maxgameblockattaches {
            self.maxgameblockattaches = n;
        }
        if let Some(n) = args.attachcachedepth {
            self.attachcachedepth = n;
        }
        if let Some(n) = args.subscriberqueue {
            self.subscriberqueue = n;
        }
        if let Some(port) = args.rpcport {
            self.rpcport = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maxgameblockattaches == 0 {
            return Err(ConfigError::ZeroMaxAttaches);
        }
        if self.subscriberqueue == 0 {
            return Err(ConfigError::ZeroSubscriberQueue);
        }
        for game in &self.trackgame {
            validate_game_id(game).map_err(|source| ConfigError::TrackedGame {
                game: game.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn change_policy(&self) -> ChangePolicy {
        if self.changeaddresses.is_empty() {
            ChangePolicy::IncludeAll
        } else {
            ChangePolicy::ExcludeAddresses(self.changeaddresses.iter().cloned().collect::<HashSet<_>>())
        }
    }
}

/// Command line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gamenotify-node", about = "Regtest node with game notifications")]
pub struct CliArgs {
    /// TOML config file
    #[arg(long)]
    pub conf: Option<PathBuf>,

    /// Track a game from startup (repeatable)
    #[arg(long)]
    pub trackgame: Vec<String>,

    /// Bind address for block attach/detach notifications, e.g. 127.0.0.1:28332
    #[arg(long)]
    pub pubgameblocks: Option<String>,

    /// Bind address for pending move notifications
    #[arg(long)]
    pub pubgamepending: Option<String>,

    /// Maximum attach steps sent by one game_sendupdates call
    #[arg(long)]
    pub maxgameblockattaches: Option<u64>,

    /// Number of recent attach payloads kept for detaches
    #[arg(long)]
    pub attachcachedepth: Option<usize>,

    /// Queued messages per subscriber before disconnecting it
    #[arg(long)]
    pub subscriberqueue: Option<usize>,

    #[arg(long)]
    pub rpcport: Option<u16>,

    /// Address treated as change in move outputs (repeatable)
    #[arg(long)]
    pub changeaddress: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_args(&CliArgs::default()).unwrap();
        assert_eq!(config.maxgameblockattaches, 1000);
        assert_eq!(config.attachcachedepth, 100);
        assert!(config.pubgameblocks.is_none());
        assert_eq!(config.change_policy(), ChangePolicy::IncludeAll);
    }

    #[test]
    fn test_toml_with_partial_fields() {
        let config = NodeConfig::from_toml(
            r#"
            trackgame = ["a", "b"]
            pubgameblocks = "127.0.0.1:28332"
            maxgameblockattaches = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.trackgame, vec!["a", "b"]);
        assert_eq!(config.pubgameblocks.as_deref(), Some("127.0.0.1:28332"));
        assert_eq!(config.maxgameblockattaches, 5);
        assert_eq!(config.attachcachedepth, 100);
    }

    #[test]
    fn test_flags_override_and_extend() {
        let args = CliArgs::parse_from([
            "gamenotify-node",
            "--trackgame", "x",
            "--trackgame", "y",
            "--maxgameblockattaches", "3",
            "--changeaddress", "chg",
        ]);
        let mut config = NodeConfig::from_toml("trackgame = [\"a\"]\nmaxgameblockattaches = 9").unwrap();
        config.apply(&args);

        assert_eq!(config.trackgame, vec!["a", "x", "y"]);
        assert_eq!(config.maxgameblockattaches, 3);
        assert!(matches!(config.change_policy(), ChangePolicy::ExcludeAddresses(set) if set.contains("chg")));
    }

    #[test]
    fn test_validation() {
        let args = CliArgs::parse_from(["gamenotify-node", "--maxgameblockattaches", "0"]);
        assert!(matches!(NodeConfig::from_args(&args), Err(ConfigError::ZeroMaxAttaches)));

        let args = CliArgs::parse_from(["gamenotify-node", "--trackgame", "has space"]);
        assert!(matches!(NodeConfig::from_args(&args), Err(ConfigError::TrackedGame { .. })));
    }
}
