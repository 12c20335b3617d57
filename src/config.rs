//! Pipeline configuration, loaded from YAML.
//!
//! Every field has a serde default so a partial config file (or none at
//! all) yields a runnable pipeline; `validate` catches values that would
//! make the workers misbehave.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::scoring::default_priority_industries;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub agreements: AgreementConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            signals: SignalConfig::default(),
            agreements: AgreementConfig::default(),
            scoring: ScoringConfig::default(),
            ingestion: IngestionConfig::default(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// Outreach scheduler knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Hours between full outreach ticks.
    #[serde(default = "default_tick_interval_hours")]
    pub tick_interval_hours: u32,
    /// Minutes between follow-up sweeps.
    #[serde(default = "default_follow_up_sweep_minutes")]
    pub follow_up_sweep_minutes: u32,
    /// Maximum entities dispatched per tick (backpressure).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timeout for one delivery call, in seconds.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Failed delivery attempts tolerated before `failed_delivery`.
    #[serde(default = "default_delivery_retry_limit")]
    pub delivery_retry_limit: u32,
}

fn default_tick_interval_hours() -> u32 {
    4
}
fn default_follow_up_sweep_minutes() -> u32 {
    30
}
fn default_batch_size() -> usize {
    25
}
fn default_delivery_timeout_secs() -> u64 {
    30
}
fn default_delivery_retry_limit() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_hours: default_tick_interval_hours(),
            follow_up_sweep_minutes: default_follow_up_sweep_minutes(),
            batch_size: default_batch_size(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            delivery_retry_limit: default_delivery_retry_limit(),
        }
    }
}

/// Response signal handling knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    /// Compare-and-set retries before a signal is surfaced as a conflict.
    #[serde(default = "default_cas_retry_limit")]
    pub cas_retry_limit: u32,
    /// Probability raise on an `interested` reply.
    #[serde(default = "default_reply_probability_step")]
    pub reply_probability_step: f64,
    /// Probability raise on a `requested_detail` reply.
    #[serde(default = "default_detail_probability_step")]
    pub detail_probability_step: f64,
}

fn default_cas_retry_limit() -> u32 {
    3
}
fn default_reply_probability_step() -> f64 {
    0.15
}
fn default_detail_probability_step() -> f64 {
    0.1
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            cas_retry_limit: default_cas_retry_limit(),
            reply_probability_step: default_reply_probability_step(),
            detail_probability_step: default_detail_probability_step(),
        }
    }
}

/// Agreement lifecycle knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgreementConfig {
    /// Hours between review sweeps over `sent` agreements.
    #[serde(default = "default_review_interval_hours")]
    pub review_interval_hours: u32,
    /// A `sent` agreement older than this with no signature expires.
    #[serde(default = "default_review_window_hours")]
    pub review_window_hours: u32,
    /// Conversion probability required before drafting an agreement.
    #[serde(default = "default_negotiation_threshold")]
    pub negotiation_threshold: f64,
    #[serde(default = "default_duration_months")]
    pub default_duration_months: u32,
    /// Base per-shipment rate written into drafted terms.
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    #[serde(default = "default_payment_terms_days")]
    pub payment_terms_days: u32,
}

fn default_review_interval_hours() -> u32 {
    6
}
fn default_review_window_hours() -> u32 {
    72
}
fn default_negotiation_threshold() -> f64 {
    0.7
}
fn default_duration_months() -> u32 {
    12
}
fn default_base_rate() -> f64 {
    850.0
}
fn default_payment_terms_days() -> u32 {
    30
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            review_interval_hours: default_review_interval_hours(),
            review_window_hours: default_review_window_hours(),
            negotiation_threshold: default_negotiation_threshold(),
            default_duration_months: default_duration_months(),
            base_rate: default_base_rate(),
            payment_terms_days: default_payment_terms_days(),
        }
    }
}

/// Priority-scoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_priority_industries")]
    pub priority_industries: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            priority_industries: default_priority_industries(),
        }
    }
}

/// New-target ingestion job knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Hours between targeting passes that assign new entities to campaigns.
    #[serde(default = "default_ingestion_interval_hours")]
    pub interval_hours: u32,
}

fn default_ingestion_interval_hours() -> u32 {
    12
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_ingestion_interval_hours(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl PipelineConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The default config location under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("acquisition-pipeline").join("pipeline.yaml"))
    }

    /// Rejects values that would stall or overload the workers.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.batch_size == 0 {
            bail!("scheduler.batch_size must be at least 1");
        }
        if self.scheduler.tick_interval_hours == 0 {
            bail!("scheduler.tick_interval_hours must be at least 1");
        }
        if self.scheduler.follow_up_sweep_minutes == 0 {
            bail!("scheduler.follow_up_sweep_minutes must be at least 1");
        }
        if self.scheduler.delivery_timeout_secs == 0 {
            bail!("scheduler.delivery_timeout_secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.agreements.negotiation_threshold) {
            bail!(
                "agreements.negotiation_threshold {} outside [0, 1]",
                self.agreements.negotiation_threshold
            );
        }
        if self.signals.reply_probability_step < 0.0 || self.signals.detail_probability_step < 0.0 {
            bail!("signal probability steps must be non-negative");
        }
        if self.agreements.review_window_hours == 0 {
            bail!("agreements.review_window_hours must be at least 1");
        }
        Ok(())
    }
}
