//! YAML configuration shared by the dealer and player binaries.
//!
//! The signing key never lives in this file; binaries take it from a flag,
//! an environment variable or a key file.

use crate::ledger::Wei;
use fairdeal_types::{Participant, ADDRESS_LEN, DEFAULT_CHAIN_LENGTH, MAX_CHAIN_LENGTH};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_MAX_SKIP_REJECTIONS: usize = 10;
pub const DEFAULT_CUT_TAIL_OFFSET: usize = 1;
pub const DEFAULT_BET_STAKE_WEI: Wei = 1_000_000_000_000_000_000;
pub const DEFAULT_COMMIT_STAKE_WEI: Wei = 100_000_000_000_000_000;
pub const DEFAULT_VERIFY_GAS: u64 = 1_000_000;
pub const DEFAULT_MAX_CUT: u64 = 10;
pub const DEFAULT_HIT_PROBABILITY_BPS: u32 = 5_000;

/// Environment variable holding the hex signing key.
pub const PRIVATE_KEY_ENV: &str = "FAIRDEAL_PRIVATE_KEY";
/// Environment variable holding a path to a file with the hex signing key.
pub const PRIVATE_KEY_FILE_ENV: &str = "FAIRDEAL_PRIVATE_KEY_FILE";

/// Raw configuration as read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Address of the controller contract; every other contract is
    /// discovered through it.
    pub controller_address: String,
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub phase_deadline_ms: Option<u64>,

    /// Overrides the ledger's own turn timeout when set.
    #[serde(default)]
    pub turn_timeout_ms: Option<u64>,
    #[serde(default = "default_max_skip_rejections")]
    pub max_skip_rejections: usize,

    #[serde(default = "default_chain_length")]
    pub chain_length: usize,
    #[serde(default = "default_cut_tail_offset")]
    pub cut_tail_offset: usize,

    #[serde(default = "default_bet_stake_wei")]
    pub bet_stake_wei: Wei,
    #[serde(default = "default_commit_stake_wei")]
    pub commit_stake_wei: Wei,
    #[serde(default = "default_verify_gas")]
    pub verify_gas: Option<u64>,

    // Player bot tunables.
    #[serde(default = "default_max_cut")]
    pub max_cut: u64,
    #[serde(default = "default_hit_probability_bps")]
    pub hit_probability_bps: u32,

    #[serde(default)]
    pub transcript_dir: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_max_skip_rejections() -> usize {
    DEFAULT_MAX_SKIP_REJECTIONS
}

fn default_chain_length() -> usize {
    DEFAULT_CHAIN_LENGTH
}

fn default_cut_tail_offset() -> usize {
    DEFAULT_CUT_TAIL_OFFSET
}

fn default_bet_stake_wei() -> Wei {
    DEFAULT_BET_STAKE_WEI
}

fn default_commit_stake_wei() -> Wei {
    DEFAULT_COMMIT_STAKE_WEI
}

fn default_verify_gas() -> Option<u64> {
    Some(DEFAULT_VERIFY_GAS)
}

fn default_max_cut() -> u64 {
    DEFAULT_MAX_CUT
}

fn default_hit_probability_bps() -> u32 {
    DEFAULT_HIT_PROBABILITY_BPS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be http or https: {value}")]
    InvalidUrlScheme { field: &'static str, value: String },
    #[error("{field} must be a 20-byte hex address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("max_backoff_ms ({max_backoff_ms}) must be >= poll_interval_ms ({poll_interval_ms})")]
    BackoffBelowInterval {
        poll_interval_ms: u64,
        max_backoff_ms: u64,
    },
    #[error("chain_length {chain_length} leaves no cut below the tail offset {cut_tail_offset}")]
    ChainTooShort {
        chain_length: usize,
        cut_tail_offset: usize,
    },
    #[error("chain_length {chain_length} exceeds the limit of {MAX_CHAIN_LENGTH}")]
    ChainTooLong { chain_length: usize },
    #[error("max_cut {max_cut} exceeds the {available} elements below the tail offset")]
    CutOutOfRange { max_cut: u64, available: usize },
    #[error("hit_probability_bps must be <= 10000 (got {value})")]
    InvalidProbability { value: u32 },
    #[error("missing {env_key} or {env_file} (flag or env var)")]
    MissingPrivateKey {
        env_key: &'static str,
        env_file: &'static str,
    },
    #[error("private key file is empty: {path}")]
    EmptyKeyFile { path: String },
}

/// Poll cadence shared by every waiting loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingConfig {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    /// Give up waiting for a phase after this long (wait forever if unset).
    pub phase_deadline: Option<Duration>,
}

/// Checked configuration.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub rpc_url: Url,
    pub chain_id: u64,
    pub controller_address: Participant,
    pub log_level: Level,
    pub log_json: bool,
    pub polling: PollingConfig,
    pub turn_timeout: Option<Duration>,
    pub max_skip_rejections: usize,
    pub chain_length: usize,
    pub cut_tail_offset: usize,
    pub bet_stake: Wei,
    pub commit_stake: Wei,
    pub verify_gas: Option<u64>,
    pub max_cut: u64,
    pub hit_probability_bps: u32,
    pub transcript_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let rpc_url = validate_http_url("rpc_url", &self.rpc_url)?;
        let controller_address = parse_address("controller_address", &self.controller_address)?;
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        ensure_nonzero("poll_interval_ms", self.poll_interval_ms)?;
        if self.max_backoff_ms < self.poll_interval_ms {
            return Err(ConfigError::BackoffBelowInterval {
                poll_interval_ms: self.poll_interval_ms,
                max_backoff_ms: self.max_backoff_ms,
            });
        }
        if let Some(deadline) = self.phase_deadline_ms {
            ensure_nonzero("phase_deadline_ms", deadline)?;
        }
        if let Some(timeout) = self.turn_timeout_ms {
            ensure_nonzero("turn_timeout_ms", timeout)?;
        }
        ensure_nonzero("max_skip_rejections", self.max_skip_rejections as u64)?;
        ensure_nonzero("max_cut", self.max_cut)?;

        // At least one element must sit below the cut for a cut of 1.
        if self.chain_length < self.cut_tail_offset.saturating_add(2) {
            return Err(ConfigError::ChainTooShort {
                chain_length: self.chain_length,
                cut_tail_offset: self.cut_tail_offset,
            });
        }
        if self.chain_length > MAX_CHAIN_LENGTH {
            return Err(ConfigError::ChainTooLong {
                chain_length: self.chain_length,
            });
        }
        let available = self.chain_length - self.cut_tail_offset - 1;
        if self.max_cut > available as u64 {
            return Err(ConfigError::CutOutOfRange {
                max_cut: self.max_cut,
                available,
            });
        }
        if self.hit_probability_bps > 10_000 {
            return Err(ConfigError::InvalidProbability {
                value: self.hit_probability_bps,
            });
        }

        Ok(ValidatedConfig {
            rpc_url,
            chain_id: self.chain_id,
            controller_address,
            log_level,
            log_json: self.log_json,
            polling: PollingConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                phase_deadline: self.phase_deadline_ms.map(Duration::from_millis),
            },
            turn_timeout: self.turn_timeout_ms.map(Duration::from_millis),
            max_skip_rejections: self.max_skip_rejections,
            chain_length: self.chain_length,
            cut_tail_offset: self.cut_tail_offset,
            bet_stake: self.bet_stake_wei,
            commit_stake: self.commit_stake_wei,
            verify_gas: self.verify_gas,
            max_cut: self.max_cut,
            hit_probability_bps: self.hit_probability_bps,
            transcript_dir: self.transcript_dir.map(PathBuf::from),
        })
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn validate_http_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(ConfigError::InvalidUrlScheme {
                field,
                value: value.to_string(),
            })
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(url)
}

fn parse_address(field: &'static str, value: &str) -> Result<Participant, ConfigError> {
    let invalid = || ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    };
    let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|_| invalid())?;
    let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| invalid())?;
    Ok(Participant(bytes))
}

fn read_secret_file(path: &str) -> Result<String, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyKeyFile {
            path: path.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Resolve the signing key from, in order: the flag, the key-file flag, the
/// key environment variable, the key-file environment variable.
pub fn load_private_key(
    value: Option<String>,
    file: Option<String>,
) -> Result<String, ConfigError> {
    if let Some(value) = value {
        return Ok(value);
    }
    if let Some(file_path) = file {
        return read_secret_file(&file_path);
    }
    if let Ok(value) = env::var(PRIVATE_KEY_ENV) {
        return Ok(value);
    }
    if let Ok(file_path) = env::var(PRIVATE_KEY_FILE_ENV) {
        return read_secret_file(&file_path);
    }
    Err(ConfigError::MissingPrivateKey {
        env_key: PRIVATE_KEY_ENV,
        env_file: PRIVATE_KEY_FILE_ENV,
    })
}
