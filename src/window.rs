use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::accessor::Filter;

/// Source of "now" for windows and cache freshness.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `now`.
    pub fn trailing(now: DateTime<Utc>, days: i64) -> Self {
        Self::new(now - Duration::days(days.max(1)), now)
    }

    /// Window of the same length ending where this one starts.
    pub fn preceding(&self) -> Self {
        let length = self.end - self.start;
        Self::new(self.start - length, self.start)
    }

    /// Smallest window covering both.
    pub fn union(&self, other: &Window) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn filters(&self, field: &'static str) -> [Filter; 2] {
        [Filter::gte(field, self.start), Filter::lt(field, self.end)]
    }

    /// `count` consecutive buckets of `days` days ending at `now`, oldest first.
    pub fn buckets(now: DateTime<Utc>, count: usize, days: i64) -> Vec<Window> {
        let length = Duration::days(days.max(1));
        (0..count)
            .rev()
            .map(|offset| {
                let end = now - length * offset as i32;
                Window::new(end - length, end)
            })
            .collect()
    }
}
