//! Two-window change classification
//!
//! Every "is this going up or down" question in the engine reduces to a
//! recent value, a previous value and whether the previous window had any
//! basis at all. [`TrendBand`] labels the difference with a fixed threshold
//! and [`change_rate`] reports it as a nullable percentage.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::aggregate::{percent, round_half_up, GroupActivity};
use crate::models::{ComparisonEntry, MemberComparison, Trend};
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendBand {
    /// Differences strictly beyond ±threshold count as a change
    pub threshold: f64,
}

impl Default for TrendBand {
    fn default() -> Self {
        Self { threshold: 10.0 }
    }
}

impl TrendBand {
    /// Without a baseline the trend is always `Stable`.
    pub fn classify(&self, recent: f64, previous: f64, has_baseline: bool) -> Trend {
        if !has_baseline {
            return Trend::Stable;
        }

        let diff = recent - previous;
        if diff > self.threshold {
            Trend::Improving
        } else if diff < -self.threshold {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

/// Percent change from `previous` to `current`, `None` when `previous` is 0.
pub fn change_rate(current: f64, previous: f64) -> Option<i64> {
    if previous == 0.0 {
        return None;
    }
    Some(round_half_up((current - previous) / previous * 100.0) as i64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowComparison {
    pub recent: f64,
    pub previous: f64,
}

impl WindowComparison {
    /// Mean of the last `recent_len` values against the mean of the rest.
    /// `None` unless both sides have at least one value.
    pub fn from_series(series: &[f64], recent_len: usize) -> Option<Self> {
        if recent_len == 0 || series.len() <= recent_len {
            return None;
        }
        let (older, recent) = series.split_at(series.len() - recent_len);
        Some(Self {
            recent: mean(recent),
            previous: mean(older),
        })
    }

    pub fn diff(&self) -> f64 {
        self.recent - self.previous
    }

    pub fn classify(&self, band: &TrendBand) -> Trend {
        band.classify(self.recent, self.previous, true)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Most improved and steadiest members by weekly attendance rate.
///
/// Each member's series holds one rate per bucket that had schedules.
pub fn compare_members(
    activity: &GroupActivity,
    buckets: &[Window],
    recent_len: usize,
    band: &TrendBand,
) -> MemberComparison {
    let per_bucket: Vec<_> = buckets
        .iter()
        .map(|bucket| {
            (
                activity.schedule_ids_in(bucket).len(),
                activity.attended_by_member(bucket),
            )
        })
        .filter(|(scheduled, _)| *scheduled > 0)
        .collect();

    let entries: Vec<ComparisonEntry> = activity
        .members
        .iter()
        .filter_map(|member| {
            let series: Vec<f64> = per_bucket
                .iter()
                .map(|(scheduled, attended)| {
                    let count = attended.get(&member.user_id).copied().unwrap_or(0);
                    percent(count, *scheduled) as f64
                })
                .collect();
            let comparison = WindowComparison::from_series(&series, recent_len)?;

            Some(ComparisonEntry {
                user_id: member.user_id,
                display_name: member.display_name.clone(),
                recent_average: comparison.recent,
                previous_average: comparison.previous,
                diff: comparison.diff(),
                trend: comparison.classify(band),
            })
        })
        .collect();

    let most_improved = entries
        .iter()
        .filter(|entry| entry.diff > 0.0)
        .fold(None::<&ComparisonEntry>, |best, entry| match best {
            Some(current) if current.diff >= entry.diff => Some(current),
            _ => Some(entry),
        })
        .cloned();

    let steadiest = entries
        .iter()
        .min_by(|a, b| {
            a.diff
                .abs()
                .partial_cmp(&b.diff.abs())
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.recent_average
                        .partial_cmp(&a.recent_average)
                        .unwrap_or(Ordering::Equal)
                })
        })
        .cloned();

    MemberComparison {
        most_improved,
        steadiest,
        compared_members: entries.len(),
    }
}
