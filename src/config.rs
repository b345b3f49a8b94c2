use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default configuration compiled into the binary.  Used when no `--config`
/// path is given, so the server can run from a bare binary.
const EMBEDDED_CONFIG: &str = include_str!("../assets/config.yaml");

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Process-wide configuration, loaded once at startup and read-only
/// thereafter.  Shared across all sessions as `Arc<Config>` with no locking.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ssh: SshConfig,
    pub redis: RedisConfig,
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// TCP port of the SSH listener.
    pub port: u16,
    /// The single credential pair the emulated server accepts.
    pub user: String,
    pub pass: String,
    /// Canned command table: literal command string to literal response.
    /// Consulted by both `exec` requests and the interactive shell.
    #[serde(default)]
    pub commands: HashMap<String, String>,
    /// Optional path to a PEM-encoded host key.  When absent the embedded
    /// key asset is used; when that fails to parse an ephemeral key is
    /// generated.
    #[serde(default)]
    pub host_key_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// TCP port of the Redis listener.
    pub port: u16,
    /// Username checked by the two-argument `AUTH` form.  An empty string
    /// means no username is configured and the one-argument form applies.
    #[serde(default)]
    pub user: String,
    pub pass: String,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`], either from an explicit YAML file or from
/// the embedded default asset.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let contents = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read config file: {}", p.display()))?,
        None => EMBEDDED_CONFIG.to_string(),
    };
    let config: Config = serde_yaml::from_str(&contents).context("failed to parse config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(config.ssh.port != 0, "ssh.port must be non-zero");
    anyhow::ensure!(config.redis.port != 0, "redis.port must be non-zero");
    anyhow::ensure!(!config.ssh.user.is_empty(), "ssh.user must not be empty");
    anyhow::ensure!(!config.ssh.pass.is_empty(), "ssh.pass must not be empty");
    anyhow::ensure!(!config.redis.pass.is_empty(), "redis.pass must not be empty");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses() {
        let cfg = load_config(None).expect("embedded config must be valid");
        assert_eq!(cfg.ssh.user, "root");
        assert!(cfg.ssh.commands.contains_key("uname"));
        assert_eq!(cfg.redis.port, 6379);
        assert!(cfg.redis.user.is_empty());
    }

    #[test]
    fn rejects_zero_port() {
        let yaml = r#"
ssh: { port: 0, user: root, pass: x }
redis: { port: 6379, pass: x }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_empty_ssh_credentials() {
        let yaml = r#"
ssh: { port: 22, user: "", pass: x }
redis: { port: 6379, pass: x }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/decoyd.yaml"))).is_err());
    }
}
