use serde::{Deserialize, Serialize};

use crate::aggregate::GroupActivity;
use crate::models::{GroupHealthTrends, HealthMetric, WeeklyHealthPoint};
use crate::trend::change_rate;
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub bucket_count: usize,
    pub bucket_days: i64,
    /// Trailing buckets averaged as "recent" when comparing members
    pub comparison_recent_buckets: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bucket_count: 8,
            bucket_days: 7,
            comparison_recent_buckets: 2,
        }
    }
}

/// Four indicators per bucket. Every bucket yields a point, so each
/// history has exactly `buckets.len()` values, zero where nothing happened.
pub fn build_health_trends(activity: &GroupActivity, buckets: &[Window]) -> GroupHealthTrends {
    let weeks: Vec<WeeklyHealthPoint> = buckets
        .iter()
        .enumerate()
        .map(|(index, bucket)| WeeklyHealthPoint {
            label: format!("W{}", index + 1),
            week_start: bucket.start,
            attendance_rate: activity.group_attendance_rate(bucket),
            activity_count: activity.activity_count(bucket) as u32,
            new_member_count: activity.new_member_count(bucket) as u32,
            rsvp_rate: activity.rsvp_rate(bucket),
        })
        .collect();

    GroupHealthTrends {
        attendance_rate: metric(&weeks, |week| week.attendance_rate),
        activity_count: metric(&weeks, |week| week.activity_count),
        new_member_count: metric(&weeks, |week| week.new_member_count),
        rsvp_rate: metric(&weeks, |week| week.rsvp_rate),
        weeks,
    }
}

fn metric(weeks: &[WeeklyHealthPoint], value: impl Fn(&WeeklyHealthPoint) -> u32) -> HealthMetric {
    let trend: Vec<f64> = weeks.iter().map(|week| value(week) as f64).collect();
    let current = trend.last().copied().unwrap_or(0.0);
    let change_rate = match trend.len() {
        0 | 1 => None,
        len => change_rate(current, trend[len - 2]),
    };

    HealthMetric {
        current,
        change_rate,
        trend,
    }
}
