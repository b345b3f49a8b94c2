//! SSH host key loading.
//!
//! The key is read from an explicit path when configured, otherwise from the
//! embedded asset.  A key that cannot be decoded is replaced by a freshly
//! generated ephemeral one so a broken asset never takes the listener down.

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tracing::{info, warn};

use crate::config::SshConfig;

const EMBEDDED_HOST_KEY: &str = include_str!("../../../assets/ssh_host_key.pem");

pub fn load_host_key(config: &SshConfig) -> KeyPair {
    match try_load(config) {
        Ok(key) => {
            info!("loaded SSH host key");
            key
        }
        Err(e) => {
            warn!(error = %e, "failed to load SSH host key; generating ephemeral key");
            KeyPair::generate_ed25519()
        }
    }
}

fn try_load(config: &SshConfig) -> Result<KeyPair> {
    let pem = match &config.host_key_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host key file: {path}"))?,
        None => EMBEDDED_HOST_KEY.to_string(),
    };
    russh_keys::decode_secret_key(&pem, None).context("failed to decode SSH host key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_key_decodes() {
        let config = SshConfig {
            port: 2222,
            user: "root".into(),
            pass: "x".into(),
            commands: Default::default(),
            host_key_path: None,
        };
        assert!(try_load(&config).is_ok());
    }

    #[test]
    fn unreadable_path_falls_back_to_generated_key() {
        let config = SshConfig {
            port: 2222,
            user: "root".into(),
            pass: "x".into(),
            commands: Default::default(),
            host_key_path: Some("/nonexistent/host.key".into()),
        };
        assert!(try_load(&config).is_err());
        // load_host_key must still produce a usable key.
        let _key = load_host_key(&config);
    }
}
