//! Configuration for the hub.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use config::{Environment, File, Value};
use hub_core::proto::FarcasterNetwork;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::StoreLimits;
use crate::sync::SyncConfig;

/// CONFIG_FILE_NAME is the name of the optional config file located in the
/// hub home directory
pub const CONFIG_FILE_NAME: &str = "hub.config.toml";

/// ENV_PREFIX should be used along side the config field name to set a
/// config field using environment variables
/// For example, `HUB_NICKNAME=wieldy` would set the value of the
/// `Config.nickname` field
pub const ENV_PREFIX: &str = "HUB";

/// The configuration for a hub node.
#[derive(PartialEq, Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Network the hub accepts messages for: mainnet, testnet or devnet.
    pub network: String,
    /// Operator-chosen nickname, reported by `GetInfo`.
    pub nickname: String,
    /// Number of fid shards for the merge worker pool.
    pub shards: usize,
    /// Seconds between periodic diff sync cycles.
    pub sync_interval_secs: u64,
    /// Deadline per sync RPC, in seconds.
    pub rpc_deadline_secs: u64,
    /// Retries per sync RPC after the first attempt.
    pub rpc_retries: u32,
    /// Store capacity and TTL bounds.
    pub limits: StoreLimits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: "mainnet".to_string(),
            nickname: "hub".to_string(),
            shards: crate::engine::DEFAULT_SHARDS,
            sync_interval_secs: 30,
            rpc_deadline_secs: 15,
            rpc_retries: 3,
            limits: StoreLimits::default(),
        }
    }
}

impl Config {
    /// Make a config using a default, files, environment variables, and
    /// commandline flags.
    ///
    /// Later items in the *file_paths* slice will have a higher priority
    /// than earlier ones.
    ///
    /// Environment variables are expected to start with the *env_prefix*.
    /// Nested fields can be accessed using `__` as the separator.
    pub fn load<S, V>(
        file_paths: &[Option<&Path>],
        env_prefix: &str,
        flag_overrides: HashMap<S, V>,
    ) -> Result<Config>
    where
        S: AsRef<str>,
        V: Into<Value>,
    {
        let mut builder = config::Config::builder();

        // layer on config options from files
        for path in file_paths.iter().flatten() {
            if path.exists() {
                let p = path.to_str().ok_or_else(|| anyhow::anyhow!("empty path"))?;
                builder = builder.add_source(File::with_name(p));
            }
        }

        // next, add any environment variables
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        // finally, override any values
        for (flag, val) in flag_overrides.into_iter() {
            builder = builder.set_override(flag, val)?;
        }

        let cfg = builder.build()?;
        debug!("make_config:\n{:#?}\n", cfg);
        let cfg = cfg.try_deserialize()?;
        Ok(cfg)
    }

    /// The configured network, falling back to mainnet on unknown names.
    pub fn network(&self) -> FarcasterNetwork {
        match self.network.to_ascii_lowercase().as_str() {
            "testnet" => FarcasterNetwork::Testnet,
            "devnet" => FarcasterNetwork::Devnet,
            _ => FarcasterNetwork::Mainnet,
        }
    }

    /// The sync driver configuration this config implies.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            rpc_deadline: Duration::from_secs(self.rpc_deadline_secs),
            rpc_retries: self.rpc_retries,
            ..Default::default()
        }
    }

    /// The periodic sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = Config::load::<String, String>(&[][..], "__FOO", Default::default()).unwrap();

        assert_eq!(config.network(), FarcasterNetwork::Mainnet);
        assert_eq!(config.shards, crate::engine::DEFAULT_SHARDS);
        assert_eq!(config.limits.signers.capacity, Some(100));
    }

    #[test]
    fn test_flag_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("nickname", "wieldy");
        overrides.insert("network", "devnet");
        let config = Config::load(&[][..], "__FOO", overrides).unwrap();

        assert_eq!(config.nickname, "wieldy");
        assert_eq!(config.network(), FarcasterNetwork::Devnet);
    }
}
