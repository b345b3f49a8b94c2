//! Emulated SSH service.
//!
//! Presents an OpenSSH banner, accepts exactly the configured password pair,
//! and serves a fake interactive shell backed by the canned command table.
//! Every credential and command the peer sends is captured.

pub mod hostkey;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::server;
use russh::{MethodSet, SshId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::config::Config;
use crate::events;
use crate::services::Service;

use session::SshSession;

const PROTOCOL: &str = "ssh";

/// Version banner sent during the handshake.  Mimics a stock Ubuntu OpenSSH
/// so scanners fingerprint this listener as a real server.
const SERVER_ID: &str = "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1";

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SshService {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl SshService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Service for SshService {
    async fn start(&self, config: Arc<Config>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.ssh.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind SSH listener on {addr}"))?;

        let server_config = build_server_config(&config);

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
        tokio::spawn(accept_loop(listener, server_config, config, rx));
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

fn build_server_config(config: &Config) -> Arc<server::Config> {
    let host_key = hostkey::load_host_key(&config.ssh);

    Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PASSWORD | MethodSet::PUBLICKEY,
        server_id: SshId::Standard(SERVER_ID.to_string()),
        inactivity_timeout: Some(Duration::from_secs(600)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: 10,
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    server_config: Arc<server::Config>,
    config: Arc<Config>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let server_config = Arc::clone(&server_config);
                    let config = Arc::clone(&config);
                    let local = local.clone();
                    let peer = peer.to_string();
                    tokio::spawn(async move {
                        events::emit(events::NEW_CONNECTION, PROTOCOL, "", &local, &peer, "");
                        handle_connection(stream, server_config, config, &local, &peer).await;
                        events::emit(events::CLOSE_CONNECTION, PROTOCOL, "", &local, &peer, "");
                    });
                }
                Err(e) => {
                    debug!(error = %e, "ssh accept loop closing");
                    break;
                }
            },
            _ = &mut shutdown => {
                debug!("ssh listener shut down");
                break;
            }
        }
    }
}

/// Run one SSH session to completion.  Handshake and protocol errors are
/// expected from scanners and are logged at debug only.
async fn handle_connection(
    stream: TcpStream,
    server_config: Arc<server::Config>,
    config: Arc<Config>,
    local: &str,
    peer: &str,
) {
    let handler = SshSession::new(config, local.to_string(), peer.to_string());
    match server::run_stream(server_config, stream, handler).await {
        Ok(session) => {
            if let Err(e) = session.await {
                debug!(error = %e, peer = %peer, "SSH session ended with error");
            }
        }
        Err(e) => {
            debug!(error = %e, peer = %peer, "SSH handshake failed");
        }
    }
}
