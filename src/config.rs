//! Configuration loading
//!
//! Settings come from an optional TOML file named by `--config` or the
//! `GROUP_ANALYTICS_CONFIG` environment variable. Every section and field
//! has a default, so an empty file (or none at all) yields the stock
//! engine.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyConfig;
use crate::archive::ActivityConfig;
use crate::engine::AnalyticKind;
use crate::error::{AnalyticsError, Result};
use crate::forecast::EngagementConfig;
use crate::health::HealthConfig;
use crate::timeslot::TimeSlotConfig;

pub const CONFIG_ENV: &str = "GROUP_ANALYTICS_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub windows: WindowConfig,
    pub engagement: EngagementConfig,
    pub activity: ActivityConfig,
    pub health: HealthConfig,
    pub anomaly: AnomalyConfig,
    pub time_slots: TimeSlotConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Lengths of the member-level windows, in days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Attendance window; the comparison window has the same length
    pub recent_days: i64,
    /// Board activity and activity-archive window
    pub activity_days: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            recent_days: 30,
            activity_days: 90,
        }
    }
}

/// Result cache settings. Time-to-live is per analytic in seconds, and 0
/// disables caching for that analytic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries each analytic's cache keeps before evicting the least recently used
    pub max_entries: usize,
    pub engagement_forecast: u64,
    pub health_trends: u64,
    pub anomalies: u64,
    pub activity_scores: u64,
    pub time_slots: u64,
    pub member_comparison: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            engagement_forecast: 300,
            health_trends: 0,
            anomalies: 0,
            activity_scores: 300,
            time_slots: 900,
            member_comparison: 0,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: AnalyticKind) -> Option<Duration> {
        let seconds = match kind {
            AnalyticKind::EngagementForecast => self.engagement_forecast,
            AnalyticKind::HealthTrends => self.health_trends,
            AnalyticKind::Anomalies => self.anomalies,
            AnalyticKind::ActivityScores => self.activity_scores,
            AnalyticKind::TimeSlots => self.time_slots,
            AnalyticKind::MemberComparison => self.member_comparison,
        };
        (seconds > 0).then(|| Duration::seconds(seconds.min(i64::MAX as u64) as i64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AnalyticsConfig {
    /// Loads from `path`, else from `GROUP_ANALYTICS_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        };

        let config = match path {
            Some(path) => Self::load_from(&path)?,
            None => {
                tracing::debug!("no config file given, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnalyticsError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AnalyticsError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(AnalyticsError::Config(message.to_string()));

        if self.windows.recent_days <= 0 || self.windows.activity_days <= 0 {
            return fail("windows.recent_days and windows.activity_days must be positive");
        }
        if self.health.bucket_count == 0 || self.health.bucket_days <= 0 {
            return fail("health.bucket_count and health.bucket_days must be positive");
        }
        if self.health.comparison_recent_buckets == 0
            || self.health.comparison_recent_buckets >= self.health.bucket_count
        {
            return fail("health.comparison_recent_buckets must be between 1 and bucket_count - 1");
        }
        if self.anomaly.window_days <= 0 || self.time_slots.lookback_days <= 0 {
            return fail("anomaly.window_days and time_slots.lookback_days must be positive");
        }
        if self.time_slots.offset().is_none() {
            return fail("time_slots.utc_offset_minutes must be within a day");
        }
        if !self.engagement.levels.is_descending() {
            return fail("engagement.levels must be strictly descending");
        }
        if !self.activity.grades.is_descending() {
            return fail("activity.grades must be strictly descending");
        }
        if self.engagement.trend.threshold < 0.0 {
            return fail("engagement.trend.threshold must not be negative");
        }
        let bands = [
            ("attendance", &self.anomaly.attendance),
            ("posts", &self.anomaly.posts),
            ("members", &self.anomaly.members),
            ("finance", &self.anomaly.finance),
        ];
        for (name, band) in bands {
            if !band.is_ordered() {
                return Err(AnalyticsError::Config(format!(
                    "anomaly.{name}: critical must exceed warning and both must be positive"
                )));
            }
        }
        if self.anomaly.penalties.critical == 0 || self.anomaly.penalties.warning == 0 {
            return fail("anomaly.penalties must be positive");
        }
        Ok(())
    }
}
