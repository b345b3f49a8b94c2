//! decoyd, a multi-protocol deception server.
//!
//! Opens listeners that impersonate real SSH and Redis servers closely enough
//! to capture attacker credentials and commands, logs everything as a
//! structured event stream, and returns plausible responses without executing
//! real commands or storing real data.
//!
//! The [`registry::ServiceRegistry`] owns the lifecycle of every protocol
//! service; each service binds its own listener and handles every accepted
//! connection in its own task.

pub mod config;
pub mod events;
pub mod registry;
pub mod services;
