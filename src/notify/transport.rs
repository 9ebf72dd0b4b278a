//! TCP transport for subscribers
//!
//! Clients control their subscription with text lines:
//!
//! ```text
//! subscribe game-block-attach json mygame
//! unsubscribe game-block-attach json mygame
//! ```
//!
//! Every notification is written as three parts (topic, body, sequence),
//! each prefixed by its length as a little-endian u32.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use super::{Notification, Publisher};

/// Pause after a failed `accept`
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Upper bound on a single frame part
pub const MAX_PART_SIZE: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("frame part of {0} bytes exceeds the limit")]
    PartTooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// A bound publisher endpoint
pub struct PubServer {
    listener: TcpListener,
    publisher: Arc<Publisher>,
}

impl PubServer {
    pub async fn bind(addr: &str, publisher: Arc<Publisher>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { listener, publisher })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept subscribers until the task is dropped
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(publisher = %self.publisher.name(), %addr, "notification endpoint listening");
        }

        let listener = &self.listener;
        loop {
            let (stream, remote) = accept_with_backoff(|| listener.accept()).await;

            let publisher = Arc::clone(&self.publisher);
            tokio::spawn(async move {
                match serve_subscriber(stream, publisher).await {
                    Ok(()) => debug!(%remote, "subscriber disconnected"),
                    Err(e) => debug!(%remote, error = %e, "subscriber closed"),
                }
            });
        }
    }
}

/// Retry `accept` until it succeeds, pausing after each failure so errors
/// like descriptor exhaustion do not spin the loop.
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn serve_subscriber(stream: TcpStream, publisher: Arc<Publisher>) -> Result<(), TransportError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut subscription = publisher.subscribe(Vec::<String>::new());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let line = line.trim();
                if let Some(topic) = line.strip_prefix("subscribe ") {
                    subscription.subscribe(topic);
                } else if let Some(topic) = line.strip_prefix("unsubscribe ") {
                    subscription.unsubscribe(topic);
                } else if !line.is_empty() {
                    debug!(subscriber = subscription.id(), command = line, "unknown command");
                }
            }
            notification = subscription.recv() => {
                let Some(notification) = notification else {
                    warn!(subscriber = subscription.id(), "dropped by publisher");
                    return Ok(());
                };
                write_notification(&mut writer, &notification).await?;
            }
        }
    }
}

/// Write one notification as three length-prefixed parts
pub async fn write_notification<W>(writer: &mut W, notification: &Notification) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    for part in notification.frames() {
        buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
        buf.extend_from_slice(&part);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_part<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_PART_SIZE {
        return Err(TransportError::PartTooLarge(len));
    }
    let mut part = vec![0u8; len];
    reader.read_exact(&mut part).await?;
    Ok(part)
}

/// Read one notification written by [`write_notification`]
pub async fn read_notification<R>(reader: &mut R) -> Result<Notification, TransportError>
where
    R: AsyncRead + Unpin,
{
    let topic = String::from_utf8(read_part(reader).await?)
        .map_err(|_| TransportError::Malformed("topic is not UTF-8"))?;
    let body = String::from_utf8(read_part(reader).await?)
        .map_err(|_| TransportError::Malformed("body is not UTF-8"))?;
    let sequence: [u8; 4] = read_part(reader)
        .await?
        .try_into()
        .map_err(|_| TransportError::Malformed("sequence must be 4 bytes"))?;

    Ok(Notification {
        topic,
        body,
        sequence: u32::from_le_bytes(sequence),
    })
}
