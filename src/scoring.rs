use serde::{Deserialize, Serialize};

use crate::aggregate::round_half_up;
use crate::models::{ActivityBreakdown, ActivityGrade, EngagementLevel, MemberEngagementForecast};

/// One weighted term of a composite score.
///
/// With a cap the value is normalized to `min(value / cap, 1)` before the
/// weight applies, so the term saturates at `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub weight: f64,
    #[serde(default)]
    pub cap: Option<f64>,
}

impl ScoreComponent {
    pub const fn linear(weight: f64) -> Self {
        Self { weight, cap: None }
    }

    pub const fn capped(weight: f64, cap: f64) -> Self {
        Self {
            weight,
            cap: Some(cap),
        }
    }

    pub fn contribution(&self, value: f64) -> f64 {
        match self.cap {
            Some(cap) if cap > 0.0 => (value / cap).min(1.0) * self.weight,
            Some(_) => 0.0,
            None => value * self.weight,
        }
    }
}

/// Sum of each component's contribution for its paired value.
pub fn composite(terms: &[(ScoreComponent, f64)]) -> f64 {
    terms
        .iter()
        .map(|(component, value)| component.contribution(*value))
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementWeights {
    pub attendance: ScoreComponent,
    pub posts: ScoreComponent,
    pub comments: ScoreComponent,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            attendance: ScoreComponent::linear(0.5),
            posts: ScoreComponent::capped(30.0, 10.0),
            comments: ScoreComponent::capped(20.0, 20.0),
        }
    }
}

impl EngagementWeights {
    /// Composite engagement score, rounded into `0..=100`.
    pub fn score(&self, attendance_rate: u32, post_count: u32, comment_count: u32) -> u32 {
        let raw = composite(&[
            (self.attendance, attendance_rate as f64),
            (self.posts, post_count as f64),
            (self.comments, comment_count as f64),
        ]);
        round_half_up(raw).clamp(0.0, 100.0) as u32
    }
}

/// Lower bounds (inclusive) of each engagement level above `risk`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelBands {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for LevelBands {
    fn default() -> Self {
        Self {
            high: 75,
            medium: 50,
            low: 25,
        }
    }
}

impl LevelBands {
    pub fn level(&self, score: u32) -> EngagementLevel {
        if score >= self.high {
            EngagementLevel::High
        } else if score >= self.medium {
            EngagementLevel::Medium
        } else if score >= self.low {
            EngagementLevel::Low
        } else {
            EngagementLevel::Risk
        }
    }

    pub fn is_descending(&self) -> bool {
        self.high > self.medium && self.medium > self.low
    }
}

/// Most at-risk first: by level (`risk` first), then by ascending score.
/// Stable, so equal entries keep their order.
pub fn sort_by_risk(forecasts: &mut [MemberEngagementForecast]) {
    forecasts.sort_by(|a, b| {
        a.level
            .cmp(&b.level)
            .then(a.engagement_score.cmp(&b.engagement_score))
    });
}

/// Points per attended schedule, post, comment and RSVP answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityWeights {
    pub attendance: ScoreComponent,
    pub posts: ScoreComponent,
    pub comments: ScoreComponent,
    pub rsvp: ScoreComponent,
}

impl Default for ActivityWeights {
    fn default() -> Self {
        Self {
            attendance: ScoreComponent::linear(3.0),
            posts: ScoreComponent::linear(2.0),
            comments: ScoreComponent::linear(1.0),
            rsvp: ScoreComponent::linear(1.0),
        }
    }
}

impl ActivityWeights {
    pub fn score(&self, breakdown: &ActivityBreakdown) -> u32 {
        let raw = composite(&[
            (self.attendance, breakdown.attendance as f64),
            (self.posts, breakdown.posts as f64),
            (self.comments, breakdown.comments as f64),
            (self.rsvp, breakdown.rsvp as f64),
        ]);
        round_half_up(raw).max(0.0) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeBands {
    pub very_active: u32,
    pub active: u32,
    pub moderate: u32,
}

impl Default for GradeBands {
    fn default() -> Self {
        Self {
            very_active: 30,
            active: 15,
            moderate: 5,
        }
    }
}

impl GradeBands {
    pub fn grade(&self, score: u32) -> ActivityGrade {
        if score >= self.very_active {
            ActivityGrade::VeryActive
        } else if score >= self.active {
            ActivityGrade::Active
        } else if score >= self.moderate {
            ActivityGrade::Moderate
        } else {
            ActivityGrade::Low
        }
    }

    pub fn is_descending(&self) -> bool {
        self.very_active > self.active && self.active > self.moderate
    }
}
