//! Period-over-period anomaly detection
//!
//! Each tracked metric is observed over the last window and the window
//! before it. The deviation between the two is matched against that
//! metric's [`DeviationBands`]; anything outside the quiet zone becomes an
//! [`ActivityAnomaly`]. Findings feed a 0-100 health score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::accessor::{Collection, Filter, RecordAccessor};
use crate::aggregate::{count_rows, fetch_rows, load_group_activity, round_half_up};
use crate::error::Result;
use crate::models::{
    ActivityAnomaly, AnomalyLevel, AnomalyMetric, AnomalyReport, FinanceKind, FinanceRecord,
    HealthBand,
};
use crate::window::Window;

const FINANCE_FIELDS: &[&str] = &["kind", "amount", "occurred_at"];

/// Which way a metric has to move to be worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Falling is bad (attendance, posting, recruiting)
    Drop,
    /// Rising is bad (spending)
    Surge,
}

/// Deviation thresholds for one metric, all in percent magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationBands {
    pub direction: Direction,
    pub warning: f64,
    pub critical: f64,
    /// Magnitude of a move in the harmless direction worth an `info`
    #[serde(default)]
    pub info: Option<f64>,
    /// Falling to or below this value from above it is critical
    #[serde(default)]
    pub floor: Option<f64>,
    /// Below this on both sides there is too little data to judge
    #[serde(default)]
    pub min_baseline: f64,
}

impl DeviationBands {
    pub fn level(&self, current: f64, previous: f64) -> Option<AnomalyLevel> {
        if current.max(previous) < self.min_baseline {
            return None;
        }
        let deviation = deviation_percent(current, previous) as f64;

        match self.direction {
            Direction::Drop => {
                let hit_floor = self
                    .floor
                    .is_some_and(|floor| current <= floor && previous > floor);
                if hit_floor || deviation <= -self.critical {
                    Some(AnomalyLevel::Critical)
                } else if deviation <= -self.warning {
                    Some(AnomalyLevel::Warning)
                } else if self.info.is_some_and(|info| deviation >= info) {
                    Some(AnomalyLevel::Info)
                } else {
                    None
                }
            }
            Direction::Surge => {
                if deviation >= self.critical {
                    Some(AnomalyLevel::Critical)
                } else if deviation >= self.warning {
                    Some(AnomalyLevel::Warning)
                } else if self.info.is_some_and(|info| deviation <= -info) {
                    Some(AnomalyLevel::Info)
                } else {
                    None
                }
            }
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.critical > self.warning && self.warning > 0.0
    }
}

/// Signed deviation of `current` from `previous`, in rounded percent.
pub fn deviation_percent(current: f64, previous: f64) -> i64 {
    round_half_up((current - previous) / previous.max(1.0) * 100.0) as i64
}

/// Score deductions per finding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPenalties {
    pub critical: u32,
    pub warning: u32,
}

impl Default for HealthPenalties {
    fn default() -> Self {
        Self {
            critical: 25,
            warning: 10,
        }
    }
}

pub fn health_score(anomalies: &[ActivityAnomaly], penalties: &HealthPenalties) -> u32 {
    let deduction: u32 = anomalies
        .iter()
        .map(|anomaly| match anomaly.level {
            AnomalyLevel::Critical => penalties.critical,
            AnomalyLevel::Warning => penalties.warning,
            AnomalyLevel::Info => 0,
        })
        .sum();
    100u32.saturating_sub(deduction)
}

pub fn health_band(score: u32) -> HealthBand {
    match score {
        0..=39 => HealthBand::Poor,
        40..=69 => HealthBand::Fair,
        _ => HealthBand::Good,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub window_days: i64,
    pub attendance: DeviationBands,
    pub posts: DeviationBands,
    pub members: DeviationBands,
    pub finance: DeviationBands,
    pub penalties: HealthPenalties,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            attendance: DeviationBands {
                direction: Direction::Drop,
                warning: 20.0,
                critical: 40.0,
                info: Some(30.0),
                floor: Some(10.0),
                min_baseline: 1.0,
            },
            posts: DeviationBands {
                direction: Direction::Drop,
                warning: 30.0,
                critical: 60.0,
                info: Some(100.0),
                floor: None,
                min_baseline: 5.0,
            },
            members: DeviationBands {
                direction: Direction::Drop,
                warning: 50.0,
                critical: 80.0,
                info: Some(100.0),
                floor: None,
                min_baseline: 3.0,
            },
            finance: DeviationBands {
                direction: Direction::Surge,
                warning: 50.0,
                critical: 100.0,
                info: Some(50.0),
                floor: None,
                min_baseline: 1.0,
            },
            penalties: HealthPenalties::default(),
        }
    }
}

impl AnomalyConfig {
    pub fn bands(&self, metric: AnomalyMetric) -> &DeviationBands {
        match metric {
            AnomalyMetric::Attendance => &self.attendance,
            AnomalyMetric::Posts => &self.posts,
            AnomalyMetric::Members => &self.members,
            AnomalyMetric::Finance => &self.finance,
        }
    }
}

/// One metric measured over the current and the previous window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub metric: AnomalyMetric,
    pub current: f64,
    pub previous: f64,
}

/// Measures every tracked metric for a group. Independent reads run
/// concurrently.
pub async fn observe<A>(accessor: &A, group_id: Uuid, current: Window) -> Result<Vec<Observation>>
where
    A: RecordAccessor + ?Sized,
{
    let previous = current.preceding();
    let span = previous.union(&current);

    let windowed = |field: &'static str, window: &Window| {
        let [since, until] = window.filters(field);
        [Filter::eq("group_id", group_id), since, until]
    };
    let posts_now = windowed("created_at", &current);
    let posts_before = windowed("created_at", &previous);
    let joins_now = windowed("joined_at", &current);
    let joins_before = windowed("joined_at", &previous);
    let [spent_since, spent_until] = span.filters("occurred_at");
    let expense_filters = [
        Filter::eq("group_id", group_id),
        Filter::eq("kind", "expense"),
        spent_since,
        spent_until,
    ];

    let (activity, posts_current, posts_previous, joins_current, joins_previous, expenses) = tokio::try_join!(
        load_group_activity(accessor, group_id, span, false),
        count_rows(accessor, Collection::Posts, &posts_now),
        count_rows(accessor, Collection::Posts, &posts_before),
        count_rows(accessor, Collection::Members, &joins_now),
        count_rows(accessor, Collection::Members, &joins_before),
        fetch_rows::<_, FinanceRecord>(
            accessor,
            Collection::FinanceTransactions,
            &expense_filters,
            FINANCE_FIELDS
        ),
    )?;

    let spent = |window: &Window| -> f64 {
        expenses
            .iter()
            .filter(|record| record.kind == FinanceKind::Expense && window.contains(record.occurred_at))
            .map(|record| record.amount as f64)
            .sum()
    };

    Ok(vec![
        Observation {
            metric: AnomalyMetric::Attendance,
            current: activity.group_attendance_rate(&current) as f64,
            previous: activity.group_attendance_rate(&previous) as f64,
        },
        Observation {
            metric: AnomalyMetric::Posts,
            current: posts_current as f64,
            previous: posts_previous as f64,
        },
        Observation {
            metric: AnomalyMetric::Members,
            current: joins_current as f64,
            previous: joins_previous as f64,
        },
        Observation {
            metric: AnomalyMetric::Finance,
            current: spent(&current),
            previous: spent(&previous),
        },
    ])
}

/// Findings for every observation outside its bands, critical first.
/// Findings of equal level keep observation order.
pub fn detect(
    observations: &[Observation],
    config: &AnomalyConfig,
    detected_at: DateTime<Utc>,
) -> Vec<ActivityAnomaly> {
    let mut anomalies: Vec<ActivityAnomaly> = observations
        .iter()
        .filter_map(|observation| {
            let level = config
                .bands(observation.metric)
                .level(observation.current, observation.previous)?;
            let deviation = deviation_percent(observation.current, observation.previous);
            let (title, description) = describe(observation, level, deviation);

            Some(ActivityAnomaly {
                id: Uuid::new_v4(),
                metric_type: observation.metric,
                level,
                title,
                description,
                current_value: observation.current,
                expected_value: observation.previous,
                deviation_percent: deviation,
                detected_at,
            })
        })
        .collect();

    anomalies.sort_by(|a, b| b.level.cmp(&a.level));
    anomalies
}

pub fn build_report(
    observations: &[Observation],
    config: &AnomalyConfig,
    now: DateTime<Utc>,
) -> AnomalyReport {
    let anomalies = detect(observations, config, now);
    let health_score = health_score(&anomalies, &config.penalties);

    for anomaly in &anomalies {
        info!(
            metric = anomaly.metric_type.as_str(),
            level = anomaly.level.as_str(),
            deviation = anomaly.deviation_percent,
            "anomaly detected"
        );
    }

    AnomalyReport {
        anomalies,
        health_score,
        health_band: health_band(health_score),
        last_checked_at: now,
    }
}

fn describe(observation: &Observation, level: AnomalyLevel, deviation: i64) -> (String, String) {
    let Observation {
        metric,
        current,
        previous,
    } = *observation;
    let change = if deviation >= 0 { "up" } else { "down" };
    let magnitude = deviation.abs();

    match metric {
        AnomalyMetric::Attendance => (
            match level {
                AnomalyLevel::Info => "Attendance is climbing".to_string(),
                _ => "Attendance is falling".to_string(),
            },
            format!(
                "Attendance rate is {current:.0}% against {previous:.0}% in the previous period ({change} {magnitude}%)."
            ),
        ),
        AnomalyMetric::Posts => (
            match level {
                AnomalyLevel::Info => "Board activity surge".to_string(),
                _ => "Board activity slowdown".to_string(),
            },
            format!(
                "{current:.0} posts this period against {previous:.0} before ({change} {magnitude}%)."
            ),
        ),
        AnomalyMetric::Members => (
            match level {
                AnomalyLevel::Info => "New members picking up".to_string(),
                _ => "Fewer new members".to_string(),
            },
            format!(
                "{current:.0} members joined this period against {previous:.0} before ({change} {magnitude}%)."
            ),
        ),
        AnomalyMetric::Finance => (
            match level {
                AnomalyLevel::Info => "Spending has eased".to_string(),
                _ => "Spending spike".to_string(),
            },
            format!(
                "Expenses total {current:.0} this period against {previous:.0} before ({change} {magnitude}%)."
            ),
        ),
    }
}
