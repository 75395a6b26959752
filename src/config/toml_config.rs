use crate::adapters::sinks::DEFAULT_DEDUP_WINDOW;
use crate::domain::document::{TransactionOptions, WriteConcern};
use crate::domain::model::DEFAULT_LOAN_PERIOD_DAYS;
use crate::utils::error::{LibraryError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub store: StoreConfig,
    pub borrow: BorrowConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub uri: String,
    pub change_log_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "memory://library".to_string(),
            change_log_capacity: crate::adapters::memory_store::DEFAULT_CHANGE_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BorrowConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub write_concern_timeout_ms: u64,
    pub loan_period_days: i64,
}

impl Default for BorrowConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 1000,
            write_concern_timeout_ms: 5000,
            loan_period_days: DEFAULT_LOAN_PERIOD_DAYS,
        }
    }
}

impl BorrowConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn loan_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.loan_period_days)
    }

    /// Snapshot reads, majority-acknowledged writes, primary reads.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            write_concern: WriteConcern::majority(Duration::from_millis(
                self.write_concern_timeout_ms,
            )),
            ..TransactionOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Stock strictly below this raises a low-stock alert.
    pub low_stock_threshold: i64,
    pub reconnect_backoff_ms: u64,
    /// Recent changes remembered when suppressing redeliveries.
    pub dedup_window: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: 2,
            reconnect_backoff_ms: 1000,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl WatchConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl LibraryConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(LibraryError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| LibraryError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as-is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| LibraryError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_store_uri("store.uri", &self.store.uri)?;
        validation::validate_positive_number(
            "store.change_log_capacity",
            self.store.change_log_capacity,
            1,
        )?;
        validation::validate_positive_number(
            "borrow.max_retries",
            self.borrow.max_retries as usize,
            1,
        )?;
        validation::validate_range(
            "borrow.loan_period_days",
            self.borrow.loan_period_days,
            1,
            365,
        )?;
        validation::validate_range(
            "watch.low_stock_threshold",
            self.watch.low_stock_threshold,
            0,
            i64::from(u32::MAX),
        )?;
        validation::validate_positive_number("watch.dedup_window", self.watch.dedup_window, 1)?;
        Ok(())
    }
}

impl Validate for LibraryConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
