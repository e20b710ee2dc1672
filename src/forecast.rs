use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{member_metrics, GroupActivity, MetricWindows};
use crate::models::{EngagementForecastReport, EngagementLevel, MemberEngagementForecast};
use crate::scoring::{sort_by_risk, EngagementWeights, LevelBands};
use crate::trend::TrendBand;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub weights: EngagementWeights,
    pub levels: LevelBands,
    pub trend: TrendBand,
}

/// Scores and classifies every member, most at-risk first.
pub fn build_forecast(
    activity: &GroupActivity,
    windows: &MetricWindows,
    config: &EngagementConfig,
    generated_at: DateTime<Utc>,
) -> EngagementForecastReport {
    let mut forecasts: Vec<MemberEngagementForecast> = member_metrics(activity, windows)
        .into_iter()
        .map(|metrics| {
            let score = config.weights.score(
                metrics.recent_rate,
                metrics.post_count,
                metrics.comment_count,
            );
            let trend = config.trend.classify(
                metrics.recent_rate as f64,
                metrics.previous_rate as f64,
                metrics.previous_schedules > 0,
            );

            MemberEngagementForecast {
                user_id: metrics.user_id,
                display_name: metrics.display_name,
                recent_attendance_rate: metrics.recent_rate,
                previous_attendance_rate: metrics.previous_rate,
                post_count: metrics.post_count,
                comment_count: metrics.comment_count,
                engagement_score: score,
                level: config.levels.level(score),
                trend,
            }
        })
        .collect();
    sort_by_risk(&mut forecasts);

    let count = |level: EngagementLevel| forecasts.iter().filter(|f| f.level == level).count();
    EngagementForecastReport {
        total_count: forecasts.len(),
        risk_count: count(EngagementLevel::Risk),
        low_count: count(EngagementLevel::Low),
        medium_count: count(EngagementLevel::Medium),
        high_count: count(EngagementLevel::High),
        generated_at,
        forecasts,
    }
}
