//! Ledger settings loading from config.toml
//!
//! Every section and key is optional; missing values fall back to the
//! production defaults (unique codes 1-999, 72 hour payment window,
//! 15% company fee, 60/40 founder split).

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Manual bank transfer settings
    pub reconciliation: ReconciliationSettings,
    /// Revenue split percentages
    pub revenue_split: RevenueSplitSettings,
    /// Backoff for the wallet-credit path
    pub retry: RetrySettings,
}

/// How unique codes are applied to invoice amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeModeSetting {
    /// Always add the code
    Add,
    /// Subtract the code when the invoice amount leaves room, add otherwise
    Subtract,
    /// Pick add or subtract at random when there is room to subtract
    Random,
}

/// `[reconciliation]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// When false, transfers must match the invoice amount exactly
    pub unique_code_enabled: bool,
    /// Smallest unique code
    pub unique_code_min: i64,
    /// Largest unique code
    pub unique_code_max: i64,
    /// Add, subtract or random
    pub unique_code_mode: CodeModeSetting,
    /// Payment window in hours
    pub expiry_hours: i64,
    /// Random draws before falling back to a range scan
    pub max_resample_attempts: u32,
    /// Hours a paid transfer amount stays reserved; a repeat of it inside
    /// this window is reported as already paid
    pub replay_window_hours: i64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            unique_code_enabled: true,
            unique_code_min: 1,
            unique_code_max: 999,
            unique_code_mode: CodeModeSetting::Random,
            expiry_hours: 72,
            max_resample_attempts: 32,
            replay_window_hours: 168,
        }
    }
}

/// `[revenue_split]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevenueSplitSettings {
    /// Company fee, percent of what remains after the affiliate
    pub company_percent: u32,
    /// Founder share, percent of what remains after the company fee
    pub founder_percent: u32,
    /// Co-founder share, percent of what remains after the company fee
    pub cofounder_percent: u32,
    /// Affiliate commission when the product does not define one
    pub default_affiliate_percent: u32,
}

impl Default for RevenueSplitSettings {
    fn default() -> Self {
        Self {
            company_percent: 15,
            founder_percent: 60,
            cofounder_percent: 40,
            default_affiliate_percent: 30,
        }
    }
}

/// `[retry]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// First backoff delay in milliseconds
    pub min_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Retries after the first attempt; 0 means a single attempt
    pub max_retries: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 500,
            max_retries: 5,
        }
    }
}

impl RetrySettings {
    /// First backoff delay
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Backoff ceiling
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Longest payment or replay window accepted, ten years
pub const MAX_WINDOW_HOURS: i64 = 87_600;

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

impl Settings {
    /// Rejects settings the ledger cannot honour.
    pub fn validate(&self) -> Result<()> {
        let rec = &self.reconciliation;
        if rec.unique_code_enabled {
            if rec.unique_code_min < 1 {
                return Err(config_error("unique_code_min must be at least 1"));
            }
            if rec.unique_code_min > rec.unique_code_max {
                return Err(config_error(format!(
                    "unique_code_min ({}) exceeds unique_code_max ({})",
                    rec.unique_code_min, rec.unique_code_max
                )));
            }
        }
        for (name, hours) in [
            ("expiry_hours", rec.expiry_hours),
            ("replay_window_hours", rec.replay_window_hours),
        ] {
            if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
                return Err(config_error(format!(
                    "{name} must be between 1 and {MAX_WINDOW_HOURS}, got {hours}"
                )));
            }
        }

        let split = &self.revenue_split;
        let percents = [
            split.company_percent,
            split.founder_percent,
            split.cofounder_percent,
            split.default_affiliate_percent,
        ];
        if percents.iter().any(|p| *p > 100) {
            return Err(config_error("percentages cannot exceed 100"));
        }
        let founders = split.founder_percent + split.cofounder_percent;
        if founders != 100 {
            return Err(config_error(format!(
                "founder_percent + cofounder_percent must be 100, got {founders}"
            )));
        }

        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(config_error("retry min_delay_ms exceeds max_delay_ms"));
        }
        Ok(())
    }
}

/// Parses and validates settings from a TOML string
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents)
        .map_err(|e| config_error(format!("Failed to parse config.toml: {e}")))?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - The values are inconsistent (see [`Settings::validate`])
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| config_error(format!("Failed to read config file: {e}")))?;
    parse_settings(&contents)
}

/// Loads settings from `LEDGER_CONFIG` (default `./config.toml`). A missing
/// file yields the defaults; an unreadable or invalid one is an error.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var("LEDGER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    if Path::new(&path).exists() {
        load_settings(&path)
    } else {
        tracing::info!("No settings file at {}, using defaults", path);
        Ok(Settings::default())
    }
}
