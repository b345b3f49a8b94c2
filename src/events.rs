//! Audit event stream.
//!
//! Every protocol engine reports its observations through this module as
//! structured `tracing` events.  The event names below are a stable contract:
//! downstream log consumers key on the `event` field, so renaming one is a
//! breaking change.

pub const START_SERVICE: &str = "StartService";
pub const STOP_SERVICE: &str = "StopService";
pub const NEW_CONNECTION: &str = "NewConnection";
pub const CLOSE_CONNECTION: &str = "CloseConnection";
pub const EXECUTE_COMMAND: &str = "ExecuteCommand";
pub const REPLY_COMMAND: &str = "ReplyCommand";
pub const ACCOUNT_LOGIN: &str = "AccountLogin";
pub const START_SHELL: &str = "StartShell";
pub const STOP_SHELL: &str = "StopShell";

/// Emit one audit event.  `account`, `local`, and `peer` may be empty when
/// not applicable (e.g. service start/stop has no peer).
pub fn emit(event: &str, protocol: &str, account: &str, local: &str, peer: &str, info: &str) {
    tracing::info!(
        target: "decoyd::audit",
        event = event,
        protocol = protocol,
        account = account,
        local = local,
        peer = peer,
        info = info,
        "{event}",
    );
}
