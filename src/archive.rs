use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{round_half_up, GroupActivity};
use crate::models::{
    ActivityBreakdown, ActivityDistribution, ActivityGrade, GradeCount, MemberActivityScore,
};
use crate::scoring::{ActivityWeights, GradeBands};
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub weights: ActivityWeights,
    pub grades: GradeBands,
    pub top_n: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            weights: ActivityWeights::default(),
            grades: GradeBands::default(),
            top_n: 5,
        }
    }
}

/// Scores every member's activity in `window` and ranks the roster.
pub fn score_members(
    activity: &GroupActivity,
    window: &Window,
    config: &ActivityConfig,
) -> ActivityDistribution {
    let attended = activity.attended_by_member(window);
    let posts = activity.posts_by_author(window);
    let comments = activity.comments_by_author(window);
    let rsvps = activity.rsvps_by_member(window);

    let mut ranked: Vec<MemberActivityScore> = activity
        .members
        .iter()
        .map(|member| {
            let lookup =
                |counts: &HashMap<Uuid, usize>| counts.get(&member.user_id).copied().unwrap_or(0) as u32;
            let breakdown = ActivityBreakdown {
                attendance: lookup(&attended),
                posts: lookup(&posts),
                comments: lookup(&comments),
                rsvp: lookup(&rsvps),
            };
            let total_score = config.weights.score(&breakdown);

            MemberActivityScore {
                user_id: member.user_id,
                name: member.display_name.clone(),
                total_score,
                breakdown,
                grade: config.grades.grade(total_score),
                rank: 0,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.name.cmp(&b.name))
    });
    for (index, entry) in ranked.iter_mut().enumerate() {
        entry.rank = index + 1;
    }

    let grade_summary = ActivityGrade::ALL
        .iter()
        .map(|grade| GradeCount {
            grade: *grade,
            count: ranked.iter().filter(|entry| entry.grade == *grade).count(),
        })
        .collect();

    let avg_score = if ranked.is_empty() {
        0.0
    } else {
        let total: u32 = ranked.iter().map(|entry| entry.total_score).sum();
        round_half_up(total as f64 / ranked.len() as f64 * 10.0) / 10.0
    };

    ActivityDistribution {
        grade_summary,
        top: ranked.iter().take(config.top_n).cloned().collect(),
        total_members: ranked.len(),
        avg_score,
        ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::load_group_activity;
    use crate::fixtures::{fixed_now, GroupFixture};

    async fn distribution(fixture: &GroupFixture, config: &ActivityConfig) -> ActivityDistribution {
        let window = Window::trailing(fixture.now, 90);
        let activity = load_group_activity(&fixture.accessor, fixture.group_id, window, true)
            .await
            .unwrap();
        score_members(&activity, &window, config)
    }

    #[tokio::test]
    async fn points_follow_weights() {
        let mut fixture = GroupFixture::new(fixed_now());
        let avery = fixture.member("Avery", 200);

        for days_ago in [3, 10, 17, 24, 31, 38, 45, 52] {
            let schedule = fixture.schedule(days_ago);
            fixture.attend(schedule, avery, "present");
            fixture.rsvp(schedule, avery, "yes");
        }
        let post = fixture.post(avery, 4);
        fixture.post(avery, 60);
        fixture.comment(post, avery, 2);
        // outside the window
        fixture.post(avery, 120);

        let result = distribution(&fixture, &ActivityConfig::default()).await;
        let entry = &result.ranked[0];

        assert_eq!(
            entry.breakdown,
            ActivityBreakdown {
                attendance: 8,
                posts: 2,
                comments: 1,
                rsvp: 8,
            }
        );
        assert_eq!(entry.total_score, 24 + 4 + 1 + 8);
        assert_eq!(entry.grade, ActivityGrade::VeryActive);
        assert_eq!(entry.rank, 1);
    }

    #[tokio::test]
    async fn ranks_by_score_then_name() {
        let mut fixture = GroupFixture::new(fixed_now());
        let zed = fixture.member("Zed", 100);
        let amy = fixture.member("Amy", 100);
        let bo = fixture.member("Bo", 100);
        fixture.member("Idle", 100);

        let schedule = fixture.schedule(5);
        fixture.attend(schedule, bo, "present");
        fixture.post(zed, 3);
        fixture.post(amy, 3);
        fixture.post(bo, 3);

        let config = ActivityConfig {
            top_n: 2,
            ..ActivityConfig::default()
        };
        let result = distribution(&fixture, &config).await;
        let order: Vec<(&str, usize)> = result
            .ranked
            .iter()
            .map(|entry| (entry.name.as_str(), entry.rank))
            .collect();

        assert_eq!(order, vec![("Bo", 1), ("Amy", 2), ("Zed", 3), ("Idle", 4)]);
        assert_eq!(result.top.len(), 2);
        assert_eq!(result.top[1].name, "Amy");
        assert_eq!(result.total_members, 4);
        // (5 + 2 + 2 + 0) / 4
        assert_eq!(result.avg_score, 2.3);
    }

    #[tokio::test]
    async fn grade_summary_lists_every_grade() {
        let mut fixture = GroupFixture::new(fixed_now());
        fixture.member("Quiet", 100);

        let result = distribution(&fixture, &ActivityConfig::default()).await;
        let summary: Vec<(ActivityGrade, usize)> = result
            .grade_summary
            .iter()
            .map(|entry| (entry.grade, entry.count))
            .collect();

        assert_eq!(
            summary,
            vec![
                (ActivityGrade::VeryActive, 0),
                (ActivityGrade::Active, 0),
                (ActivityGrade::Moderate, 0),
                (ActivityGrade::Low, 1),
            ]
        );
    }

    #[tokio::test]
    async fn empty_roster_averages_zero() {
        let fixture = GroupFixture::new(fixed_now());
        let result = distribution(&fixture, &ActivityConfig::default()).await;

        assert!(result.ranked.is_empty());
        assert_eq!(result.avg_score, 0.0);
        assert_eq!(result.grade_summary.len(), 4);
    }
}
