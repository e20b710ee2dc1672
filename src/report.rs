use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ActivityDistribution, AnomalyReport, EngagementForecastReport, GroupHealthTrends,
    HealthMetric, MemberComparison, TimeSlotAnalysis,
};
use crate::timeslot::day_label;

pub fn render_forecast(report: &EngagementForecastReport, limit: usize) -> String {
    let mut output = String::new();

    if report.forecasts.is_empty() {
        let _ = writeln!(output, "No members in this group.");
        return output;
    }

    let _ = writeln!(
        output,
        "{} members: {} at risk, {} low, {} medium, {} high",
        report.total_count,
        report.risk_count,
        report.low_count,
        report.medium_count,
        report.high_count
    );
    for forecast in report.forecasts.iter().take(limit) {
        let _ = writeln!(
            output,
            "- {} score {} ({}, {}) attendance {}% (was {}%), {} posts, {} comments",
            forecast.display_name,
            forecast.engagement_score,
            forecast.level.as_str(),
            forecast.trend.as_str(),
            forecast.recent_attendance_rate,
            forecast.previous_attendance_rate,
            forecast.post_count,
            forecast.comment_count
        );
    }

    output
}

fn metric_line(label: &str, metric: &HealthMetric, unit: &str) -> String {
    let change = match metric.change_rate {
        Some(rate) => format!("{rate:+}% week over week"),
        None => "no prior week to compare".to_string(),
    };
    let history: Vec<String> = metric.trend.iter().map(|value| format!("{value:.0}")).collect();
    format!(
        "- {label}: {:.0}{unit} ({change}) [{}]",
        metric.current,
        history.join(", ")
    )
}

pub fn render_health(trends: &GroupHealthTrends) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "{}", metric_line("Attendance rate", &trends.attendance_rate, "%"));
    let _ = writeln!(output, "{}", metric_line("Activity", &trends.activity_count, ""));
    let _ = writeln!(output, "{}", metric_line("New members", &trends.new_member_count, ""));
    let _ = writeln!(output, "{}", metric_line("RSVP rate", &trends.rsvp_rate, "%"));

    output
}

pub fn render_anomalies(report: &AnomalyReport) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "Health score {} ({})",
        report.health_score,
        report.health_band.as_str()
    );
    if report.anomalies.is_empty() {
        let _ = writeln!(output, "No anomalies detected.");
    } else {
        for anomaly in &report.anomalies {
            let _ = writeln!(
                output,
                "- [{}] {}: {}",
                anomaly.level.as_str(),
                anomaly.title,
                anomaly.description
            );
        }
    }

    output
}

pub fn render_activity(distribution: &ActivityDistribution) -> String {
    let mut output = String::new();

    if distribution.ranked.is_empty() {
        let _ = writeln!(output, "No members in this group.");
        return output;
    }

    let summary: Vec<String> = distribution
        .grade_summary
        .iter()
        .map(|entry| format!("{} {}", entry.count, entry.grade.label()))
        .collect();
    let _ = writeln!(
        output,
        "{} members, average score {:.1} ({})",
        distribution.total_members,
        distribution.avg_score,
        summary.join(", ")
    );
    for entry in &distribution.top {
        let _ = writeln!(
            output,
            "{}. {} {} pts ({}): {} attended, {} posts, {} comments, {} rsvps",
            entry.rank,
            entry.name,
            entry.total_score,
            entry.grade.label(),
            entry.breakdown.attendance,
            entry.breakdown.posts,
            entry.breakdown.comments,
            entry.breakdown.rsvp
        );
    }

    output
}

pub fn render_time_slots(analysis: &TimeSlotAnalysis) -> String {
    let mut output = String::new();

    if !analysis.has_data() {
        let _ = writeln!(output, "No attendance or board activity in this window.");
        return output;
    }

    let _ = writeln!(output, "       morning afternoon evening night");
    for day in 0..7u32 {
        let row: Vec<String> = analysis
            .cells
            .iter()
            .filter(|cell| cell.day_of_week == day)
            .map(|cell| format!("{:>3}/{}", cell.count, cell.intensity))
            .collect();
        let _ = writeln!(output, "{:<6} {}", day_label(day), row.join("  "));
    }
    if let Some(busiest) = analysis.busiest {
        let regulars: Vec<&str> = analysis
            .forecast_for(busiest.day_of_week, busiest.time_slot)
            .iter()
            .filter(|member| member.probability >= 50)
            .map(|member| member.name.as_str())
            .collect();
        let _ = writeln!(
            output,
            "Busiest: {} {}{}",
            day_label(busiest.day_of_week),
            busiest.time_slot.label(),
            if regulars.is_empty() {
                String::new()
            } else {
                format!(" (regulars: {})", regulars.join(", "))
            }
        );
    }
    if let Some(quietest) = analysis.quietest {
        let _ = writeln!(
            output,
            "Quietest: {} {}",
            day_label(quietest.day_of_week),
            quietest.time_slot.label()
        );
    }
    for forecast in &analysis.forecasts {
        let likely: Vec<String> = forecast
            .members
            .iter()
            .filter(|member| member.probability > 0)
            .map(|member| format!("{} {}%", member.name, member.probability))
            .collect();
        let _ = writeln!(
            output,
            "- {} {}: {}",
            day_label(forecast.slot.day_of_week),
            forecast.slot.time_slot.label(),
            if likely.is_empty() {
                "nobody likely".to_string()
            } else {
                likely.join(", ")
            }
        );
    }

    output
}

pub fn render_comparison(comparison: &MemberComparison) -> String {
    let mut output = String::new();

    if comparison.compared_members == 0 {
        let _ = writeln!(output, "Not enough weekly history to compare members.");
        return output;
    }

    match &comparison.most_improved {
        Some(entry) => {
            let _ = writeln!(
                output,
                "Most improved: {} ({:.0}% -> {:.0}%, {})",
                entry.display_name,
                entry.previous_average,
                entry.recent_average,
                entry.trend.as_str()
            );
        }
        None => {
            let _ = writeln!(output, "Most improved: nobody improved");
        }
    }
    if let Some(entry) = &comparison.steadiest {
        let _ = writeln!(
            output,
            "Steadiest: {} ({:.0}% -> {:.0}%)",
            entry.display_name, entry.previous_average, entry.recent_average
        );
    }
    let _ = writeln!(output, "Compared {} members.", comparison.compared_members);

    output
}

pub struct ReportInput<'a> {
    pub group_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub forecast: &'a EngagementForecastReport,
    pub health: &'a GroupHealthTrends,
    pub anomalies: &'a AnomalyReport,
    pub activity: &'a ActivityDistribution,
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Group Analytics Report");
    let _ = writeln!(
        output,
        "Generated for group {} at {}",
        input.group_id,
        input.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Engagement Forecast");
    let _ = write!(output, "{}", render_forecast(input.forecast, 10));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Group Health");
    let _ = write!(output, "{}", render_health(input.health));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Anomalies");
    let _ = write!(output, "{}", render_anomalies(input.anomalies));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity Leaders");
    let _ = write!(output, "{}", render_activity(input.activity));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fixed_now;
    use crate::models::{
        ActivityBreakdown, ActivityGrade, AnomalyLevel, AnomalyMetric, ActivityAnomaly,
        EngagementLevel, GradeCount, HealthBand, MemberActivityScore, MemberEngagementForecast,
        MemberSlotForecast, SlotCell, SlotForecast, SlotRef, TimeSlot, Trend,
    };

    fn metric(values: &[f64], change_rate: Option<i64>) -> HealthMetric {
        HealthMetric {
            current: values.last().copied().unwrap_or(0.0),
            change_rate,
            trend: values.to_vec(),
        }
    }

    fn health() -> GroupHealthTrends {
        GroupHealthTrends {
            attendance_rate: metric(&[50.0, 75.0], Some(50)),
            activity_count: metric(&[0.0, 4.0], None),
            new_member_count: metric(&[0.0, 0.0], None),
            rsvp_rate: metric(&[80.0, 60.0], Some(-25)),
            weeks: Vec::new(),
        }
    }

    fn empty_inputs() -> (EngagementForecastReport, AnomalyReport, ActivityDistribution) {
        (
            EngagementForecastReport {
                forecasts: Vec::new(),
                total_count: 0,
                risk_count: 0,
                low_count: 0,
                medium_count: 0,
                high_count: 0,
                generated_at: fixed_now(),
            },
            AnomalyReport {
                anomalies: Vec::new(),
                health_score: 100,
                health_band: HealthBand::Good,
                last_checked_at: fixed_now(),
            },
            ActivityDistribution {
                grade_summary: Vec::new(),
                ranked: Vec::new(),
                top: Vec::new(),
                total_members: 0,
                avg_score: 0.0,
            },
        )
    }

    #[test]
    fn empty_group_report_has_every_section() {
        let (forecast, anomalies, activity) = empty_inputs();
        let group_id = Uuid::new_v4();
        let report = build_report(&ReportInput {
            group_id,
            generated_at: fixed_now(),
            forecast: &forecast,
            health: &health(),
            anomalies: &anomalies,
            activity: &activity,
        });

        assert!(report.starts_with("# Group Analytics Report"));
        assert!(report.contains(&group_id.to_string()));
        assert!(report.contains("## Engagement Forecast\nNo members in this group."));
        assert!(report.contains("## Anomalies\nHealth score 100 (good)\nNo anomalies detected."));
        assert!(report.contains("- Attendance rate: 75% (+50% week over week) [50, 75]"));
        assert!(report.contains("- Activity: 4 (no prior week to compare) [0, 4]"));
        assert!(report.contains("- RSVP rate: 60% (-25% week over week)"));
    }

    #[test]
    fn populated_sections_list_members_and_findings() {
        let (mut forecast, mut anomalies, mut activity) = empty_inputs();
        let user_id = Uuid::new_v4();
        forecast.forecasts.push(MemberEngagementForecast {
            user_id,
            display_name: "Avery".to_string(),
            recent_attendance_rate: 75,
            previous_attendance_rate: 80,
            post_count: 3,
            comment_count: 5,
            engagement_score: 52,
            level: EngagementLevel::Medium,
            trend: Trend::Stable,
        });
        forecast.total_count = 1;
        forecast.medium_count = 1;
        anomalies.anomalies.push(ActivityAnomaly {
            id: Uuid::new_v4(),
            metric_type: AnomalyMetric::Posts,
            level: AnomalyLevel::Warning,
            title: "Board activity is down".to_string(),
            description: "4 posts against 10".to_string(),
            current_value: 4.0,
            expected_value: 10.0,
            deviation_percent: -60,
            detected_at: fixed_now(),
        });
        anomalies.health_score = 90;
        let score = MemberActivityScore {
            user_id,
            name: "Avery".to_string(),
            total_score: 37,
            breakdown: ActivityBreakdown {
                attendance: 8,
                posts: 2,
                comments: 1,
                rsvp: 8,
            },
            grade: ActivityGrade::VeryActive,
            rank: 1,
        };
        activity.grade_summary = vec![GradeCount {
            grade: ActivityGrade::VeryActive,
            count: 1,
        }];
        activity.ranked = vec![score.clone()];
        activity.top = vec![score];
        activity.total_members = 1;
        activity.avg_score = 37.0;

        let output = build_report(&ReportInput {
            group_id: Uuid::new_v4(),
            generated_at: fixed_now(),
            forecast: &forecast,
            health: &health(),
            anomalies: &anomalies,
            activity: &activity,
        });

        assert!(output.contains("1 members: 0 at risk, 0 low, 1 medium, 0 high"));
        assert!(output.contains("- Avery score 52 (medium, stable) attendance 75% (was 80%), 3 posts, 5 comments"));
        assert!(output.contains("- [warning] Board activity is down: 4 posts against 10"));
        assert!(output.contains("1. Avery 37 pts (very active): 8 attended, 2 posts, 1 comments, 8 rsvps"));
    }

    #[test]
    fn forecast_respects_limit() {
        let (mut forecast, _, _) = empty_inputs();
        for name in ["A", "B", "C"] {
            forecast.forecasts.push(MemberEngagementForecast {
                user_id: Uuid::new_v4(),
                display_name: name.to_string(),
                recent_attendance_rate: 0,
                previous_attendance_rate: 0,
                post_count: 0,
                comment_count: 0,
                engagement_score: 0,
                level: EngagementLevel::Risk,
                trend: Trend::Stable,
            });
        }

        let output = render_forecast(&forecast, 2);
        assert_eq!(output.lines().filter(|line| line.starts_with("- ")).count(), 2);
    }

    #[test]
    fn busiest_slot_names_its_regulars() {
        let evening = SlotRef {
            day_of_week: 0,
            time_slot: TimeSlot::Evening,
        };
        let member = |name: &str, probability| MemberSlotForecast {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            probability,
            sample_count: 3,
        };
        let analysis = TimeSlotAnalysis {
            cells: vec![SlotCell {
                day_of_week: 0,
                time_slot: TimeSlot::Evening,
                count: 5,
                intensity: 4,
            }],
            busiest: Some(evening),
            quietest: Some(evening),
            forecasts: vec![SlotForecast {
                slot: evening,
                members: vec![member("Avery", 100), member("Jules", 67), member("Kiara", 33)],
            }],
        };

        let output = render_time_slots(&analysis);
        assert!(output.contains("Busiest: Sun evening (regulars: Avery, Jules)\n"));
        assert!(output.contains("Quietest: Sun evening\n"));
        assert!(output.contains("- Sun evening: Avery 100%, Jules 67%, Kiara 33%"));
    }
}
