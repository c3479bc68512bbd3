//! Configuration module
//!
//! All tunables for the pipeline are loaded from a TOML file with optional
//! environment overrides via dotenvy. Fee constants are hand-tuned values
//! carried as configuration, not a derived economic model.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote ledger endpoints.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Per-action fees and gas constants.
    #[serde(default)]
    pub fees: FeesConfig,

    /// Submission retry and confirmation tunables.
    #[serde(default)]
    pub submitter: SubmitterConfig,

    /// Action queue tunables.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Session controller tunables.
    #[serde(default)]
    pub session: SessionConfig,

    /// Key-value storage location.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Ordered RPC endpoint URLs, primary first. Fallbacks are tried in
    /// order with no inter-endpoint delay.
    #[serde(default = "default_endpoint_urls")]
    pub urls: Vec<String>,

    /// Chain id used when signing transactions.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Per-call timeout applied to every remote operation, milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Base fee per action, native currency (decimal strings).
    #[serde(default = "default_fee_place_block")]
    pub place_block: String,

    #[serde(default = "default_fee_clear_line")]
    pub clear_line: String,

    #[serde(default = "default_fee_new_game")]
    pub new_game: String,

    #[serde(default = "default_fee_game_over")]
    pub game_over: String,

    /// Destination address for game log transactions.
    #[serde(default = "default_log_address")]
    pub log_address: String,

    /// Multiplier applied to the live gas price, percent. Must be >= 100.
    #[serde(default = "default_gas_price_buffer_pct")]
    pub gas_price_buffer_pct: u64,

    /// Base gas units of a plain value transfer.
    #[serde(default = "default_gas_base_units")]
    pub gas_base_units: u64,

    /// Extra gas units per 32-byte word of embedded payload.
    #[serde(default = "default_gas_units_per_word")]
    pub gas_units_per_word: u64,

    /// Flat gas unit headroom added to every estimate.
    #[serde(default = "default_gas_safety_units")]
    pub gas_safety_units: u64,

    /// Percentage margin added to the computed gas limit.
    #[serde(default = "default_gas_limit_margin_pct")]
    pub gas_limit_margin_pct: u64,

    /// Flat safety margin added to every quote, native currency.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: String,

    /// Congestion buffer added to every quote, native currency.
    #[serde(default = "default_congestion_buffer")]
    pub congestion_buffer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    /// Maximum whole-pipeline submission attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for the linear inter-attempt backoff, milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Overall confirmation budget, milliseconds. Distinct from the
    /// per-call timeout.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    /// Maximum confirmation poll ticks before giving up.
    #[serde(default = "default_confirm_max_polls")]
    pub confirm_max_polls: u32,

    /// Poll interval while the transaction is not yet visible, milliseconds.
    #[serde(default = "default_poll_absent_ms")]
    pub poll_absent_ms: u64,

    /// Poll interval once the transaction is known but unmined, milliseconds.
    #[serde(default = "default_poll_pending_ms")]
    pub poll_pending_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Spacing between drained queue items, milliseconds.
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Balance above which the session counts as funded, native currency.
    #[serde(default = "default_funded_threshold")]
    pub funded_threshold: String,

    /// Background balance refresh interval, seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Minimum spacing between balance refreshes, milliseconds.
    #[serde(default = "default_min_refresh_spacing_ms")]
    pub min_refresh_spacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the durable key-value store.
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Key prefix for per-owner identity records.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

// Default value functions
fn default_endpoint_urls() -> Vec<String> {
    vec![
        "https://sepolia.base.org".to_string(),
        "https://base-sepolia-rpc.publicnode.com".to_string(),
    ]
}
fn default_chain_id() -> u64 { 84532 }
fn default_call_timeout_ms() -> u64 { 10_000 }
fn default_fee_place_block() -> String { "0.0001".to_string() }
fn default_fee_clear_line() -> String { "0.00005".to_string() }
fn default_fee_new_game() -> String { "0.0002".to_string() }
fn default_fee_game_over() -> String { "0.00005".to_string() }
fn default_log_address() -> String {
    "0x000000000000000000000000000000000000dEaD".to_string()
}
fn default_gas_price_buffer_pct() -> u64 { 120 }
fn default_gas_base_units() -> u64 { 21_000 }
fn default_gas_units_per_word() -> u64 { 512 }
fn default_gas_safety_units() -> u64 { 5_000 }
fn default_gas_limit_margin_pct() -> u64 { 20 }
fn default_safety_margin() -> String { "0.00002".to_string() }
fn default_congestion_buffer() -> String { "0.00001".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 500 }
fn default_confirm_timeout_ms() -> u64 { 50_000 }
fn default_confirm_max_polls() -> u32 { 25 }
fn default_poll_absent_ms() -> u64 { 1_000 }
fn default_poll_pending_ms() -> u64 { 3_000 }
fn default_inter_item_delay_ms() -> u64 { 250 }
fn default_funded_threshold() -> String { "0.001".to_string() }
fn default_refresh_interval_secs() -> u64 { 15 }
fn default_min_refresh_spacing_ms() -> u64 { 2_000 }
fn default_storage_path() -> String { "blocklog-db".to_string() }
fn default_namespace() -> String { "blocklog_wallet_".to_string() }

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            urls: default_endpoint_urls(),
            chain_id: default_chain_id(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            place_block: default_fee_place_block(),
            clear_line: default_fee_clear_line(),
            new_game: default_fee_new_game(),
            game_over: default_fee_game_over(),
            log_address: default_log_address(),
            gas_price_buffer_pct: default_gas_price_buffer_pct(),
            gas_base_units: default_gas_base_units(),
            gas_units_per_word: default_gas_units_per_word(),
            gas_safety_units: default_gas_safety_units(),
            gas_limit_margin_pct: default_gas_limit_margin_pct(),
            safety_margin: default_safety_margin(),
            congestion_buffer: default_congestion_buffer(),
        }
    }
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            confirm_max_polls: default_confirm_max_polls(),
            poll_absent_ms: default_poll_absent_ms(),
            poll_pending_ms: default_poll_pending_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: default_inter_item_delay_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            funded_threshold: default_funded_threshold(),
            refresh_interval_secs: default_refresh_interval_secs(),
            min_refresh_spacing_ms: default_min_refresh_spacing_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            namespace: default_namespace(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig::default(),
            fees: FeesConfig::default(),
            submitter: SubmitterConfig::default(),
            queue: QueueConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {path}: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("cannot parse {path}: {e}")))
    }

    /// Load configuration with environment variable overrides.
    pub fn from_file_with_env(path: &str) -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }

    /// Structural validation. Fee amounts are validated when the fee
    /// schedule is built from them.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.endpoints.urls.is_empty() {
            return Err(PipelineError::Config(
                "at least one endpoint url is required".to_string(),
            ));
        }
        if self.endpoints.chain_id == 0 {
            return Err(PipelineError::Config("chain_id must be non-zero".to_string()));
        }
        if self.fees.gas_price_buffer_pct < 100 {
            return Err(PipelineError::Config(
                "gas_price_buffer_pct must be >= 100".to_string(),
            ));
        }
        if self.submitter.max_attempts == 0 {
            return Err(PipelineError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.submitter.confirm_max_polls == 0 {
            return Err(PipelineError::Config(
                "confirm_max_polls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
