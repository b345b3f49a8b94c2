//! Protocol services managed by the [`crate::registry::ServiceRegistry`].
//!
//! Every emulated protocol implements the same [`Service`] contract: `start`
//! binds a listener and spawns the accept loop in a detached task before
//! returning, `stop` closes the listener without cancelling in-flight
//! sessions, and `name` is the case-insensitive registry key.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;

pub mod redis;
pub mod ssh;

#[async_trait]
pub trait Service: Send + Sync {
    /// Bind the listener and spawn the accept loop.  Returns promptly; the
    /// registry lock must never be held for the lifetime of a connection.
    async fn start(&self, config: Arc<Config>) -> Result<()>;

    /// Close the listener.  Sessions already in flight are left to drain on
    /// their own.
    async fn stop(&self) -> Result<()>;

    /// Registry key, matched case-insensitively.
    fn name(&self) -> &'static str;
}
