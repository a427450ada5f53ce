//! Processor configuration: environment loading and eager validation.
//!
//! Configuration is read once at startup and is immutable afterwards. Every
//! validation failure here is fatal; per-event problems are the pipeline's
//! concern, not this crate's.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default external deal-submission program.
pub const DEFAULT_DEAL_COMMAND: &str = "boost";
/// Default cadence, in seconds, for polling new contract logs.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
/// Default block span requested per historical `eth_getLogs` call.
pub const DEFAULT_BACKFILL_CHUNK: u64 = 2_000;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// A configuration value failed validation.
    #[error("invalid configuration value")]
    InvalidValue {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value, when printable.
        value: Option<String>,
    },
}

/// Immutable processor configuration, validated once at startup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessorConfig {
    /// JSON-RPC endpoint of the chain node.
    pub rpc_url: Url,
    /// Address of the contract emitting allocation events (0x + 40 hex).
    pub contract_address: String,
    /// Storage provider identifier this instance acts on.
    pub provider_id: u64,
    /// Minimum accepted content size, in bytes (inclusive).
    pub min_size: u64,
    /// Maximum accepted content size, in bytes (inclusive).
    pub max_size: u64,
    /// On-chain address used as the requesting party for submissions.
    pub client_address: String,
    /// Directory receiving downloaded artifacts; created if absent.
    pub download_dir: PathBuf,
    /// Historical backfill starting block; absence disables backfill.
    pub start_block: Option<u64>,
    /// Offset added to the event block to derive the deal start epoch;
    /// absence disables epoch calculation entirely.
    pub start_epoch_offset: Option<u64>,
    /// Hours to wait before deleting a successfully submitted artifact;
    /// absence retains artifacts indefinitely.
    pub delayed_cleanup_hours: Option<f64>,
    /// External deal-submission program.
    pub deal_command: String,
    /// Cadence, in seconds, for polling new contract logs.
    pub poll_interval_secs: u64,
    /// Cosmetic network label used in logs.
    pub network: Option<String>,
}

impl ProcessorConfig {
    /// Load configuration from `CARLOAD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is absent or any value
    /// fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is absent or any value
    /// fails validation.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = required(&lookup, "CARLOAD_RPC_URL")?;
        let rpc_url = rpc_url
            .parse::<Url>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "rpc_url",
                reason: "not_a_url",
                value: Some(rpc_url),
            })?;

        let config = Self {
            rpc_url,
            contract_address: required(&lookup, "CARLOAD_CONTRACT_ADDRESS")?,
            provider_id: parse_required(&lookup, "CARLOAD_PROVIDER_ID", "provider_id")?,
            min_size: parse_required(&lookup, "CARLOAD_MIN_SIZE", "min_size")?,
            max_size: parse_required(&lookup, "CARLOAD_MAX_SIZE", "max_size")?,
            client_address: required(&lookup, "CARLOAD_CLIENT_ADDRESS")?,
            download_dir: PathBuf::from(required(&lookup, "CARLOAD_DOWNLOAD_DIR")?),
            start_block: parse_optional(&lookup, "CARLOAD_START_BLOCK", "start_block")?,
            start_epoch_offset: parse_optional(
                &lookup,
                "CARLOAD_START_EPOCH_OFFSET",
                "start_epoch_offset",
            )?,
            delayed_cleanup_hours: parse_optional(
                &lookup,
                "CARLOAD_DELAYED_CLEANUP_HOURS",
                "delayed_cleanup_hours",
            )?,
            deal_command: lookup("CARLOAD_DEAL_COMMAND")
                .unwrap_or_else(|| DEFAULT_DEAL_COMMAND.to_string()),
            poll_interval_secs: parse_optional(
                &lookup,
                "CARLOAD_POLL_INTERVAL_SECS",
                "poll_interval_secs",
            )?
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            network: lookup("CARLOAD_NETWORK"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns an error when any invariant fails; the first failure wins.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_size",
                reason: "zero",
                value: Some(self.min_size.to_string()),
            });
        }
        if self.min_size >= self.max_size {
            return Err(ConfigError::InvalidValue {
                field: "min_size",
                reason: "not_below_max_size",
                value: Some(format!("{}..{}", self.min_size, self.max_size)),
            });
        }
        if self.client_address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "client_address",
                reason: "empty",
                value: None,
            });
        }
        if !is_hex_address(&self.contract_address) {
            return Err(ConfigError::InvalidValue {
                field: "contract_address",
                reason: "not_a_hex_address",
                value: Some(self.contract_address.clone()),
            });
        }
        if let Some(hours) = self.delayed_cleanup_hours
            && (!hours.is_finite() || hours < 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "delayed_cleanup_hours",
                reason: "negative_or_non_finite",
                value: Some(hours.to_string()),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs",
                reason: "zero",
                value: Some(self.poll_interval_secs.to_string()),
            });
        }
        Ok(())
    }

    /// Delay before deleting submitted artifacts, when cleanup is enabled.
    #[must_use]
    pub fn cleanup_delay(&self) -> Option<Duration> {
        self.delayed_cleanup_hours
            .map(|hours| Duration::from_secs_f64(hours * 3_600.0))
    }

    /// Cadence for polling new contract logs.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn required<F>(lookup: &F, name: &'static str) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}

fn parse_required<F, T>(lookup: &F, name: &'static str, field: &'static str) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = required(lookup, name)?;
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        reason: "unparseable",
        value: Some(raw),
    })
}

fn parse_optional<F, T>(
    lookup: &F,
    name: &'static str,
    field: &'static str,
) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field,
                reason: "unparseable",
                value: Some(raw),
            }),
    }
}

fn is_hex_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|ch| ch.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("CARLOAD_RPC_URL", "http://127.0.0.1:8545".to_string()),
            (
                "CARLOAD_CONTRACT_ADDRESS",
                "0x0c626fc4a2b1042e16d1d4e0d80c5b3a79a12b41".to_string(),
            ),
            ("CARLOAD_PROVIDER_ID", "1042".to_string()),
            ("CARLOAD_MIN_SIZE", "1024".to_string()),
            ("CARLOAD_MAX_SIZE", "34359738368".to_string()),
            ("CARLOAD_CLIENT_ADDRESS", "f1client".to_string()),
            ("CARLOAD_DOWNLOAD_DIR", "/tmp/carload".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> ConfigResult<ProcessorConfig> {
        ProcessorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn loads_minimal_configuration() -> ConfigResult<()> {
        let config = load(&base_vars())?;
        assert_eq!(config.provider_id, 1042);
        assert_eq!(config.deal_command, DEFAULT_DEAL_COMMAND);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.start_block.is_none());
        assert!(config.start_epoch_offset.is_none());
        assert!(config.cleanup_delay().is_none());
        Ok(())
    }

    #[test]
    fn loads_optional_fields() -> ConfigResult<()> {
        let mut vars = base_vars();
        vars.insert("CARLOAD_START_BLOCK", "4150000".to_string());
        vars.insert("CARLOAD_START_EPOCH_OFFSET", "807".to_string());
        vars.insert("CARLOAD_DELAYED_CLEANUP_HOURS", "1.5".to_string());
        vars.insert("CARLOAD_NETWORK", "calibration".to_string());

        let config = load(&vars)?;
        assert_eq!(config.start_block, Some(4_150_000));
        assert_eq!(config.start_epoch_offset, Some(807));
        assert_eq!(
            config.cleanup_delay(),
            Some(Duration::from_secs(90 * 60)),
            "1.5 hours should become 90 minutes"
        );
        assert_eq!(config.network.as_deref(), Some("calibration"));
        Ok(())
    }

    #[test]
    fn rejects_missing_required_variable() {
        let mut vars = base_vars();
        vars.remove("CARLOAD_CLIENT_ADDRESS");
        let err = load(&vars).expect_err("missing client address should fail");
        assert!(matches!(
            err,
            ConfigError::MissingEnv {
                name: "CARLOAD_CLIENT_ADDRESS"
            }
        ));
    }

    #[test]
    fn rejects_inverted_size_range() {
        let mut vars = base_vars();
        vars.insert("CARLOAD_MIN_SIZE", "4096".to_string());
        vars.insert("CARLOAD_MAX_SIZE", "4096".to_string());
        let err = load(&vars).expect_err("min == max should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "min_size",
                reason: "not_below_max_size",
                ..
            }
        ));
    }

    #[test]
    fn rejects_negative_cleanup_hours() {
        let mut vars = base_vars();
        vars.insert("CARLOAD_DELAYED_CLEANUP_HOURS", "-2".to_string());
        let err = load(&vars).expect_err("negative hours should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "delayed_cleanup_hours",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_contract_address() {
        let mut vars = base_vars();
        vars.insert("CARLOAD_CONTRACT_ADDRESS", "not-an-address".to_string());
        let err = load(&vars).expect_err("bad address should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "contract_address",
                ..
            }
        ));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let mut vars = base_vars();
        vars.insert("CARLOAD_PROVIDER_ID", "provider-one".to_string());
        let err = load(&vars).expect_err("non-numeric provider should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "provider_id",
                reason: "unparseable",
                ..
            }
        ));
    }
}
