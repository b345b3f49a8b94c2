//! Per-connection SSH session handler.
//!
//! Captures every credential presented, accepts exactly the one configured
//! password pair, and fakes a shell: `exec` requests are answered from the
//! canned command table, and the interactive shell echoes input a byte at a
//! time, answering each carriage-return-delimited line from the same table.

use std::collections::HashMap;
use std::sync::Arc;

use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use russh_keys::key::PublicKey;
use tracing::{debug, info};

use crate::config::Config;
use crate::events;

const PROTOCOL: &str = "ssh";

pub const PROMPT: &str = "root@mock-ssh:~# ";
const WELCOME: &str = "\r\nWelcome to Ubuntu 22.04.3 LTS (GNU/Linux 5.15.0-91-generic x86_64)\r\n";
const DEFAULT_TERM: &str = "xterm-256color";

// ---------------------------------------------------------------------------
// Shell line machine
// ---------------------------------------------------------------------------

/// Accumulate-until-CR state machine for the interactive shell.
///
/// Bytes are buffered as sent; a carriage return (13) completes the line,
/// which is returned trimmed of surrounding whitespace.  Backspace is not
/// interpreted.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == 13 {
            let line = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            Some(line)
        } else {
            self.buf.push(byte);
            None
        }
    }
}

/// What one completed shell line asks of the session.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellAction {
    /// `exit`: close the channel and end the shell.
    Exit,
    /// Write this output (canned response or a "command not found" line).
    Respond(String),
}

pub fn shell_action(command: &str, commands: &HashMap<String, String>) -> ShellAction {
    if command == "exit" {
        return ShellAction::Exit;
    }
    match commands.get(command) {
        Some(output) => ShellAction::Respond(output.clone()),
        None => ShellAction::Respond(format!("bash: {command}: command not found\n")),
    }
}

/// Canned output for an `exec` request; unmapped commands produce nothing.
pub fn canned_output(commands: &HashMap<String, String>, command: &str) -> String {
    commands.get(command).cloned().unwrap_or_default()
}

/// Wire bytes produced by one byte of shell input: the echo first, then,
/// when the byte completes a line, the response followed by the next prompt
/// (or a bare line break for `exit`).
fn shell_step(
    line: &mut LineBuffer,
    byte: u8,
    commands: &HashMap<String, String>,
) -> (Vec<u8>, Option<(String, ShellAction)>) {
    let mut out = vec![byte];
    let Some(command) = line.push(byte) else {
        return (out, None);
    };

    let action = shell_action(&command, commands);
    match &action {
        ShellAction::Exit => out.extend_from_slice(b"\r\n"),
        ShellAction::Respond(output) => {
            out.extend_from_slice(format!("\r\n{output}").as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(PROMPT.as_bytes());
        }
    }
    (out, Some((command, action)))
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-connection SSH session state.
pub struct SshSession {
    config: Arc<Config>,
    local: String,
    peer: String,
    /// Authenticated account name, set once password auth succeeds.
    account: Option<String>,
    /// Terminal name from the first `pty-req`; later requests do not replace it.
    term: Option<String>,
    /// Open session channels, kept so requests can be sent back to the peer.
    channels: HashMap<ChannelId, Channel<Msg>>,
    /// Line buffers for channels with an active interactive shell.
    shells: HashMap<ChannelId, LineBuffer>,
}

impl SshSession {
    pub fn new(config: Arc<Config>, local: String, peer: String) -> Self {
        Self {
            config,
            local,
            peer,
            account: None,
            term: None,
            channels: HashMap::new(),
            shells: HashMap::new(),
        }
    }

    fn account(&self) -> &str {
        self.account.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Handler implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    /// Password authentication: exactly the configured (user, pass) pair is
    /// accepted.  Every attempt is captured, including the password itself.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        info!(
            peer = %self.peer,
            user = user,
            password = password,
            "SSH password auth attempt"
        );

        let accepted = user == self.config.ssh.user && password == self.config.ssh.pass;
        events::emit(
            events::ACCOUNT_LOGIN,
            PROTOCOL,
            user,
            &self.local,
            &self.peer,
            if accepted { "success" } else { "failed" },
        );

        if accepted {
            self.account = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    /// Public keys are never accepted; all real interaction is funneled
    /// through password auth.
    async fn auth_publickey(&mut self, user: &str, _key: &PublicKey) -> Result<Auth, Self::Error> {
        events::emit(
            events::ACCOUNT_LOGIN,
            PROTOCOL,
            user,
            &self.local,
            &self.peer,
            "publickey rejected",
        );
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    /// Only `session` channels are accepted; russh rejects other channel
    /// types with an unknown-channel-type error by default.
    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(peer = %self.peer, channel = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    /// Environment variables are acknowledged and otherwise ignored.
    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer, name = variable_name, value = variable_value, "env request");
        Ok(())
    }

    /// Record the requested terminal name.  Only the first `pty-req` is
    /// consumed; an empty name falls back to the default terminal rather
    /// than failing the connection.
    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let term = if term.is_empty() { DEFAULT_TERM } else { term };
        if self.term.is_none() {
            self.term = Some(term.to_string());
        }
        debug!(peer = %self.peer, terminal = term, "pty request");
        Ok(())
    }

    /// One-shot command execution: answer from the canned table (or with
    /// nothing), issue a `shell` request back to the peer, close the channel.
    /// The trailing shell request mirrors behavior some attacker tooling
    /// probes for.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        events::emit(
            events::EXECUTE_COMMAND,
            PROTOCOL,
            self.account(),
            &self.local,
            &self.peer,
            &command,
        );

        let output = canned_output(&self.config.ssh.commands, &command);
        session.data(channel_id, CryptoVec::from_slice(output.as_bytes()));
        events::emit(
            events::REPLY_COMMAND,
            PROTOCOL,
            self.account(),
            &self.local,
            &self.peer,
            output.trim_end(),
        );

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            let _ = channel.request_shell(false).await;
        }
        session.close(channel_id);
        Ok(())
    }

    /// Start the interactive shell: welcome banner, a `shell` request sent
    /// back to the peer, then the prompt.
    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let terminal = self.term.clone().unwrap_or_else(|| DEFAULT_TERM.to_string());
        events::emit(
            events::START_SHELL,
            PROTOCOL,
            self.account(),
            &self.local,
            &self.peer,
            &terminal,
        );

        session.data(channel_id, CryptoVec::from_slice(WELCOME.as_bytes()));
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            let _ = channel.request_shell(false).await;
        }
        session.data(channel_id, CryptoVec::from_slice(PROMPT.as_bytes()));
        self.shells.insert(channel_id, LineBuffer::default());
        Ok(())
    }

    /// Interactive shell input: echo every byte immediately; a carriage
    /// return completes the line, which is logged and answered from the
    /// canned table.
    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.shells.contains_key(&channel_id) {
            return Ok(());
        }

        for &byte in data {
            let Some(line) = self.shells.get_mut(&channel_id) else {
                break;
            };
            let (out, completed) = shell_step(line, byte, &self.config.ssh.commands);
            session.data(channel_id, CryptoVec::from_slice(&out));
            let Some((command, action)) = completed else {
                continue;
            };

            events::emit(
                events::EXECUTE_COMMAND,
                PROTOCOL,
                self.account(),
                &self.local,
                &self.peer,
                &command,
            );

            match action {
                ShellAction::Exit => {
                    self.shells.remove(&channel_id);
                    self.channels.remove(&channel_id);
                    session.close(channel_id);
                    events::emit(
                        events::STOP_SHELL,
                        PROTOCOL,
                        self.account(),
                        &self.local,
                        &self.peer,
                        "exit",
                    );
                    return Ok(());
                }
                ShellAction::Respond(output) => {
                    events::emit(
                        events::REPLY_COMMAND,
                        PROTOCOL,
                        self.account(),
                        &self.local,
                        &self.peer,
                        output.trim_end(),
                    );
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.shells.remove(&channel).is_some() {
            events::emit(
                events::STOP_SHELL,
                PROTOCOL,
                self.account(),
                &self.local,
                &self.peer,
                "eof",
            );
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.shells.remove(&channel);
        self.channels.remove(&channel);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
