//! Emulated Redis service.
//!
//! Speaks just enough RESP to look like a password-protected Redis instance:
//! `AUTH` is checked against the configured credentials, everything else is
//! gated behind it, and `SET`/`GET` succeed without storing anything.

pub mod command;
pub mod frame;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::config::{Config, RedisConfig};
use crate::events;
use crate::services::Service;

const PROTOCOL: &str = "redis";

/// Inactivity deadline, reset only when a command completes.  Trickled bytes
/// that never finish a command do not extend it.
const READ_DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RedisService {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl RedisService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Service for RedisService {
    async fn start(&self, config: Arc<Config>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.redis.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind Redis listener on {addr}"))?;

        events::emit(
            events::START_SERVICE,
            PROTOCOL,
            "",
            &addr.to_string(),
            "",
            "listener bound",
        );

        let (tx, rx) = oneshot::channel();
        *self.shutdown.lock().await = Some(tx);
        tokio::spawn(accept_loop(listener, config, rx));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown.lock().await.take() {
            let _ = tx.send(());
        }
        events::emit(events::STOP_SERVICE, PROTOCOL, "", "", "", "listener closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        PROTOCOL
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, config: Arc<Config>, mut shutdown: oneshot::Receiver<()>) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let config = Arc::clone(&config);
                    let local = local.clone();
                    let peer = peer.to_string();
                    tokio::spawn(async move {
                        events::emit(events::NEW_CONNECTION, PROTOCOL, "", &local, &peer, "");
                        if let Err(e) = serve_connection(stream, &config.redis, &local, &peer).await {
                            debug!(error = %e, peer = %peer, "redis session error");
                        }
                        events::emit(events::CLOSE_CONNECTION, PROTOCOL, "", &local, &peer, "");
                    });
                }
                Err(e) => {
                    debug!(error = %e, "redis accept loop closing");
                    break;
                }
            },
            _ = &mut shutdown => {
                debug!("redis listener shut down");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection session
// ---------------------------------------------------------------------------

/// Drive one RESP session over `stream` until the peer disconnects, the idle
/// deadline expires, or framing becomes unrecoverable.
pub async fn serve_connection<S>(
    stream: S,
    config: &RedisConfig,
    local: &str,
    peer: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::with_capacity(4096);
    let mut authenticated = false;
    let mut deadline = Instant::now() + READ_DEADLINE;

    loop {
        // Drain every complete frame currently buffered.
        let mut completed_any = false;
        loop {
            let (consumed, frame) = match frame::split_frame(&buf, false) {
                Ok(Some((consumed, frame))) => (consumed, frame.to_vec()),
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, peer = %peer, "unrecoverable framing error");
                    return Ok(());
                }
            };
            buf.advance(consumed);
            handle_frame(&frame, &mut authenticated, config, &mut writer, local, peer).await?;
            completed_any = true;
        }
        if completed_any {
            deadline = Instant::now() + READ_DEADLINE;
        }

        // Read more input under the per-command inactivity deadline.
        match timeout_at(deadline, reader.read_buf(&mut buf)).await {
            Err(_) => {
                debug!(peer = %peer, "redis session idle timeout");
                return Ok(());
            }
            Ok(Ok(0)) => {
                // Peer disconnected; surface whatever is left as final frames.
                while let Ok(Some((consumed, frame))) = frame::split_frame(&buf, true) {
                    let frame = frame.to_vec();
                    buf.advance(consumed);
                    handle_frame(&frame, &mut authenticated, config, &mut writer, local, peer)
                        .await?;
                }
                return Ok(());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(error = %e, peer = %peer, "redis read error");
                return Ok(());
            }
        }
    }
}

/// Decode and execute one frame, writing the reply and the audit events.
async fn handle_frame<W>(
    frame: &[u8],
    authenticated: &mut bool,
    config: &RedisConfig,
    writer: &mut W,
    local: &str,
    peer: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let args = match command::parse_command(frame) {
        Ok(args) if args.is_empty() => return Ok(()),
        Ok(args) => args,
        Err(_) => {
            // Malformed command: answer on the wire and keep the session.
            writer
                .write_all(command::ERR_INVALID_FORMAT.as_bytes())
                .await?;
            return Ok(());
        }
    };

    events::emit(
        events::EXECUTE_COMMAND,
        PROTOCOL,
        "",
        local,
        peer,
        &args.join(" "),
    );

    let reply = command::dispatch(&args, authenticated, config);

    if args[0].eq_ignore_ascii_case("AUTH") {
        let account = if args.len() == 3 { args[1].as_str() } else { "" };
        let outcome = if reply.starts_with('+') { "success" } else { "failed" };
        events::emit(events::ACCOUNT_LOGIN, PROTOCOL, account, local, peer, outcome);
    }

    writer.write_all(reply.as_bytes()).await?;
    events::emit(
        events::REPLY_COMMAND,
        PROTOCOL,
        "",
        local,
        peer,
        reply.trim_end(),
    );
    Ok(())
}
