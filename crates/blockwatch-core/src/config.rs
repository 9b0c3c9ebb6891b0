//! Configuration records, loaded from a TOML file.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::groups::MissedBlocksGroups;
use crate::types::{Link, Validator};

/// Top-level configuration: one instance watches one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub explorer: Option<ExplorerConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Display name used in messages and metric labels.
    pub name: String,
    #[serde(rename = "rpc-endpoints")]
    pub rpc_endpoints: Vec<String>,
    /// bech32 human-readable prefix of the chain (e.g. `cosmos`).
    #[serde(rename = "bech32-prefix", default = "default_bech32_prefix")]
    pub bech32_prefix: String,
    /// Signature window used for group classification.
    #[serde(rename = "blocks-window", default = "default_blocks_window")]
    pub blocks_window: i64,
    /// Retention of the local block store; must cover the window.
    #[serde(rename = "store-blocks", default = "default_store_blocks")]
    pub store_blocks: i64,
    /// Validator refresh cadence, seconds.
    #[serde(rename = "refresh-interval", default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(rename = "missed-blocks-group", default)]
    pub missed_blocks_groups: MissedBlocksGroups,
}

fn default_bech32_prefix() -> String {
    "cosmos".into()
}
fn default_blocks_window() -> i64 {
    100
}
fn default_store_blocks() -> i64 {
    200
}
fn default_refresh_interval() -> u64 {
    60
}

impl ChainConfig {
    /// The bech32 prefix of consensus addresses (`…valcons…`).
    pub fn valcons_prefix(&self) -> String {
        format!("{}valcons", self.bech32_prefix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "./blockwatch.db".into()
}

/// Builds explorer links for validators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Template with an `{address}` placeholder,
    /// e.g. `https://mintscan.io/cosmos/validators/{address}`.
    #[serde(rename = "validator-link-template")]
    pub validator_link_template: String,
}

impl ExplorerConfig {
    pub fn validator_link(&self, validator: &Validator) -> Link {
        Link {
            text: validator.moniker.clone(),
            href: self
                .validator_link_template
                .replace("{address}", &validator.operator_address),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Chat the reports are posted to.
    #[serde(rename = "chat-id")]
    pub chat_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Channel the reports are posted to.
    #[serde(rename = "channel-id")]
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Read and validate a config file. Any failure here is fatal.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.chain.store_blocks < self.chain.blocks_window {
            return Err(ConfigError::WindowExceedsRetention {
                blocks_window: self.chain.blocks_window,
                store_blocks: self.chain.store_blocks,
            });
        }
        self.chain
            .missed_blocks_groups
            .validate(self.chain.blocks_window)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[chain]
name = "cosmoshub"
rpc-endpoints = ["https://rpc-a.example.com", "https://rpc-b.example.com"]
blocks-window = 100
store-blocks = 200

[[chain.missed-blocks-group]]
start = 0
end = 9
emoji-start = "🟢"
emoji-end = "🟢"
desc-start = "OK"
desc-end = "is back to normal"

[[chain.missed-blocks-group]]
start = 10
end = 100
emoji-start = "🔴"
emoji-end = "🟡"
desc-start = "is skipping blocks"
desc-end = "is recovering"

[explorer]
validator-link-template = "https://example.com/validators/{address}"

[telegram]
token = "123:abc"
chat-id = -100200300
"#;

    #[test]
    fn sample_config_parses_and_validates() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chain.name, "cosmoshub");
        assert_eq!(config.chain.rpc_endpoints.len(), 2);
        assert_eq!(config.chain.missed_blocks_groups.0.len(), 2);
        assert_eq!(config.chain.valcons_prefix(), "cosmosvalcons");
        assert_eq!(config.telegram.unwrap().chat_id, -100200300);
        assert!(config.discord.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn missing_endpoints_is_fatal() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.chain.rpc_endpoints.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoEndpoints)
        ));
    }

    #[test]
    fn retention_must_cover_window() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.chain.store_blocks = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WindowExceedsRetention { .. })
        ));
    }

    #[test]
    fn explorer_link_substitutes_address() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let validator = Validator {
            operator_address: "cosmosvaloper1abc".into(),
            consensus_address: "A".into(),
            moniker: "my validator".into(),
            jailed: false,
            tombstoned: false,
            active: true,
            signatory: true,
            consensus_pubkey: vec![],
            missed_blocks_counter: 0,
        };
        let link = config.explorer.unwrap().validator_link(&validator);
        assert_eq!(link.text, "my validator");
        assert_eq!(link.href, "https://example.com/validators/cosmosvaloper1abc");
    }
}
