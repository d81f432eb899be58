//! Keeper tunables with profile support.
//!
//! Resolution order: profile (`KEEPER_PROFILE`) or TOML file (`KEEPER_CONFIG`),
//! then individual environment overrides.

use keeper_chain::gas::GasPricing;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all keeper parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Keeper tick and full-scan trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,

    /// Full scan when `(price - top) / price` drops below this fraction.
    #[serde(default = "default_buffer_ratio")]
    pub liquidation_buffer_ratio: f64,

    /// Full-scan candidates must have a liquidation price above
    /// `price * (1 - scan_window_bps / 10000)`.
    #[serde(default = "default_scan_window_bps")]
    pub scan_window_bps: u64,

    /// Max age of the cached oracle price.
    #[serde(default = "default_price_ttl")]
    pub price_ttl_secs: u64,
}

fn default_scan_interval() -> u64 {
    5_000
}
fn default_buffer_ratio() -> f64 {
    0.01
}
fn default_scan_window_bps() -> u64 {
    1_000
}
fn default_price_ttl() -> u64 {
    5
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval(),
            liquidation_buffer_ratio: default_buffer_ratio(),
            scan_window_bps: default_scan_window_bps(),
            price_ttl_secs: default_price_ttl(),
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
    /// Smallest whole basis-point count not below the buffer ratio, so that
    /// `ratio_bps < buffer_ratio_bps()` holds exactly when `ratio_bps / 10^4 < liquidation_buffer_ratio`.
    ///
    /// The scaled value is rounded to 1e-9 first so float error in a four
    /// decimal fraction such as 0.0012 cannot push it across a whole bps.
    pub fn buffer_ratio_bps(&self) -> i64 {
        let scaled = (self.liquidation_buffer_ratio * 10_000.0 * 1e9).round() / 1e9;
        scaled.ceil() as i64
    }
}

/// Chunk sizes and backpressure delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Eligibility checks (and price reads) issued concurrently per chunk.
    #[serde(default = "default_rpc_batch")]
    pub max_batch_size_for_rpc_batch_request: usize,

    /// Liquidations launched concurrently per sub-chunk.
    #[serde(default = "default_liquidation_batch")]
    pub max_batch_size_for_liquidation_queue: usize,

    /// Delay after each liquidation sub-chunk.
    #[serde(default = "default_batch_wait")]
    pub batch_wait_time_ms: u64,

    /// Delay after each refresh/bootstrap chunk.
    #[serde(default = "default_rpc_batch_wait")]
    pub rpc_batch_wait_time_ms: u64,
}

fn default_rpc_batch() -> usize {
    10
}
fn default_liquidation_batch() -> usize {
    5
}
fn default_batch_wait() -> u64 {
    100
}
fn default_rpc_batch_wait() -> u64 {
    500
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size_for_rpc_batch_request: default_rpc_batch(),
            max_batch_size_for_liquidation_queue: default_liquidation_batch(),
            batch_wait_time_ms: default_batch_wait(),
            rpc_batch_wait_time_ms: default_rpc_batch_wait(),
        }
    }
}

impl BatchConfig {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_time_ms)
    }
    pub fn rpc_batch_wait(&self) -> Duration {
        Duration::from_millis(self.rpc_batch_wait_time_ms)
    }
}

/// Periodic liquidation-price refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Also re-query positions whose price is still unknown.
    #[serde(default = "default_include_pending")]
    pub include_pending: bool,
}

fn default_refresh_interval() -> u64 {
    900
}
fn default_include_pending() -> bool {
    true
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            include_pending: default_include_pending(),
        }
    }
}

impl RefreshConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Fee hint retry and transaction pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_fee_retry_attempts")]
    pub fee_retry_attempts: u32,

    #[serde(default = "default_fee_retry_delay")]
    pub fee_retry_delay_ms: u64,

    /// Extra gas over the estimate, in percent.
    #[serde(default = "default_gas_limit_buffer")]
    pub gas_limit_buffer_pct: u64,

    /// Value sent with `liquidate` for the oracle update fee.
    #[serde(default = "default_price_update_fee")]
    pub price_update_fee_wei: u64,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    #[serde(default)]
    pub pricing: GasPricing,

    #[serde(default = "default_max_fee_multiplier")]
    pub max_fee_multiplier: f64,

    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,
}

fn default_fee_retry_attempts() -> u32 {
    3
}
fn default_fee_retry_delay() -> u64 {
    500
}
fn default_gas_limit_buffer() -> u64 {
    40
}
fn default_price_update_fee() -> u64 {
    1
}
fn default_confirmation_timeout() -> u64 {
    60
}
fn default_max_fee_multiplier() -> f64 {
    2.0
}
fn default_max_gas_price() -> f64 {
    50.0
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            fee_retry_attempts: default_fee_retry_attempts(),
            fee_retry_delay_ms: default_fee_retry_delay(),
            gas_limit_buffer_pct: default_gas_limit_buffer(),
            price_update_fee_wei: default_price_update_fee(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            pricing: GasPricing::default(),
            max_fee_multiplier: default_max_fee_multiplier(),
            max_gas_price_gwei: default_max_gas_price(),
        }
    }
}

impl GasConfig {
    pub fn fee_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fee_retry_delay_ms)
    }
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Startup reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Token ids scanned past `tokenIdNext` to catch in-flight opens.
    #[serde(default = "default_lookahead")]
    pub token_id_lookahead: u64,
}

fn default_lookahead() -> u64 {
    10
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            token_id_lookahead: default_lookahead(),
        }
    }
}

/// Event feed plumbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_channel_capacity() -> usize {
    1024
}
fn default_reconnect_delay() -> u64 {
    5
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl EventsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scanner: ScannerConfig::default(),
            batch: BatchConfig::default(),
            refresh: RefreshConfig::default(),
            gas: GasConfig::default(),
            bootstrap: BootstrapConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Local development against a fork: fast ticks, always full-scan.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scanner: ScannerConfig {
                scan_interval_ms: 2_000,
                liquidation_buffer_ratio: 1.0,
                scan_window_bps: 10_000,
                price_ttl_secs: 1,
            },
            batch: BatchConfig {
                max_batch_size_for_rpc_batch_request: 5,
                max_batch_size_for_liquidation_queue: 2,
                batch_wait_time_ms: 50,
                rpc_batch_wait_time_ms: 100,
            },
            refresh: RefreshConfig {
                refresh_interval_secs: 60,
                include_pending: true,
            },
            gas: GasConfig {
                confirmation_timeout_secs: 30,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Conservative settings for shared public RPC endpoints.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scanner: ScannerConfig {
                scan_interval_ms: 5_000,
                liquidation_buffer_ratio: 0.01,
                scan_window_bps: 1_000,
                price_ttl_secs: 5,
            },
            batch: BatchConfig {
                max_batch_size_for_rpc_batch_request: 10,
                max_batch_size_for_liquidation_queue: 5,
                batch_wait_time_ms: 200,
                rpc_batch_wait_time_ms: 1_000,
            },
            gas: GasConfig {
                fee_retry_attempts: 5,
                fee_retry_delay_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Dedicated RPC: faster ticks, wider batches, higher fee ceiling.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            scanner: ScannerConfig {
                scan_interval_ms: 1_000,
                liquidation_buffer_ratio: 0.02,
                scan_window_bps: 1_000,
                price_ttl_secs: 1,
            },
            batch: BatchConfig {
                max_batch_size_for_rpc_batch_request: 25,
                max_batch_size_for_liquidation_queue: 10,
                batch_wait_time_ms: 50,
                rpc_batch_wait_time_ms: 100,
            },
            gas: GasConfig {
                fee_retry_attempts: 3,
                fee_retry_delay_ms: 200,
                max_fee_multiplier: 3.0,
                max_gas_price_gwei: 200.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Get profile from environment variable KEEPER_PROFILE, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_profile_env() -> Self {
        let profile = std::env::var("KEEPER_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Full resolution: `KEEPER_CONFIG` file or `KEEPER_PROFILE`, then env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("KEEPER_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::from_profile_env(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply the legacy environment variable names on top of the profile.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("LIQUIDATION_BUFFER_RATIO") {
            self.scanner.liquidation_buffer_ratio = parse_var("LIQUIDATION_BUFFER_RATIO", &v)?;
        }
        if let Some(v) = lookup("MAX_BATCH_SIZE_FOR_LIQUIDATION_QUEUE") {
            self.batch.max_batch_size_for_liquidation_queue =
                parse_var("MAX_BATCH_SIZE_FOR_LIQUIDATION_QUEUE", &v)?;
        }
        if let Some(v) = lookup("MAX_BATCH_SIZE_FOR_RPC_BATCH_REQUEST") {
            self.batch.max_batch_size_for_rpc_batch_request =
                parse_var("MAX_BATCH_SIZE_FOR_RPC_BATCH_REQUEST", &v)?;
        }
        if let Some(v) = lookup("BATCH_WAIT_TIME") {
            let ms: u64 = parse_var("BATCH_WAIT_TIME", &v)?;
            self.batch.batch_wait_time_ms = ms;
            self.batch.rpc_batch_wait_time_ms = ms;
        }
        if let Some(v) = lookup("ETH_PRICE_UPDATE_INTERVAL") {
            self.scanner.price_ttl_secs = parse_var("ETH_PRICE_UPDATE_INTERVAL", &v)?;
        }
        self.validate()
    }

    /// Reject values that would stall the pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch.max_batch_size_for_rpc_batch_request == 0 {
            anyhow::bail!("max_batch_size_for_rpc_batch_request must be > 0");
        }
        if self.batch.max_batch_size_for_liquidation_queue == 0 {
            anyhow::bail!("max_batch_size_for_liquidation_queue must be > 0");
        }
        if self.gas.fee_retry_attempts == 0 {
            anyhow::bail!("fee_retry_attempts must be > 0");
        }
        if self.events.channel_capacity == 0 {
            anyhow::bail!("events.channel_capacity must be > 0");
        }
        if !self.scanner.liquidation_buffer_ratio.is_finite() {
            anyhow::bail!("liquidation_buffer_ratio must be finite");
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Keeper configuration loaded");
        tracing::info!(
            scan_interval_ms = self.scanner.scan_interval_ms,
            buffer_ratio = self.scanner.liquidation_buffer_ratio,
            scan_window_bps = self.scanner.scan_window_bps,
            price_ttl_secs = self.scanner.price_ttl_secs,
            "Scanner"
        );
        tracing::info!(
            rpc_batch = self.batch.max_batch_size_for_rpc_batch_request,
            liquidation_batch = self.batch.max_batch_size_for_liquidation_queue,
            batch_wait_ms = self.batch.batch_wait_time_ms,
            rpc_batch_wait_ms = self.batch.rpc_batch_wait_time_ms,
            "Batching"
        );
        tracing::info!(
            refresh_interval_secs = self.refresh.refresh_interval_secs,
            include_pending = self.refresh.include_pending,
            "Price refresh"
        );
        tracing::info!(
            pricing = ?self.gas.pricing,
            fee_retry_attempts = self.gas.fee_retry_attempts,
            fee_retry_delay_ms = self.gas.fee_retry_delay_ms,
            gas_limit_buffer_pct = self.gas.gas_limit_buffer_pct,
            max_gas_price_gwei = self.gas.max_gas_price_gwei,
            "Gas"
        );
    }
}

fn parse_var<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {name}={value}: {e}"))
}
