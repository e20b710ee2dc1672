//! Analytics engine
//!
//! Entry points for every analytic a group can ask for. Each one loads what
//! it needs through the record accessor, computes the result and, when its
//! analytic has a time-to-live configured, serves it from a [`ResultCache`]
//! until it goes stale. Callers can bypass a fresh entry with
//! [`Freshness::Refetch`].

use std::collections::HashMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::accessor::RecordAccessor;
use crate::aggregate::{load_group_activity, GroupActivity, MetricWindows};
use crate::anomaly::{build_report, observe};
use crate::archive::score_members;
use crate::cache::{cache_key, ResultCache};
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::forecast::build_forecast;
use crate::health::build_health_trends;
use crate::models::{
    ActivityDistribution, AnomalyReport, EngagementForecastReport, GroupHealthTrends,
    MemberComparison, TimeSlotAnalysis,
};
use crate::timeslot::analyze_time_slots;
use crate::trend::compare_members;
use crate::window::{system_clock, Clock, Window};

/// Whether a fresh cached result may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Cached,
    /// Drop any cached result and recompute
    Refetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticKind {
    EngagementForecast,
    HealthTrends,
    Anomalies,
    ActivityScores,
    TimeSlots,
    MemberComparison,
}

impl AnalyticKind {
    pub const ALL: [AnalyticKind; 6] = [
        AnalyticKind::EngagementForecast,
        AnalyticKind::HealthTrends,
        AnalyticKind::Anomalies,
        AnalyticKind::ActivityScores,
        AnalyticKind::TimeSlots,
        AnalyticKind::MemberComparison,
    ];

    pub fn cache_prefix(&self) -> &'static str {
        match self {
            AnalyticKind::EngagementForecast => "engagement-forecast",
            AnalyticKind::HealthTrends => "health-trends",
            AnalyticKind::Anomalies => "anomalies",
            AnalyticKind::ActivityScores => "activity-scores",
            AnalyticKind::TimeSlots => "time-slots",
            AnalyticKind::MemberComparison => "member-comparison",
        }
    }
}

pub struct AnalyticsEngine<A> {
    accessor: A,
    config: AnalyticsConfig,
    clock: Clock,
    caches: HashMap<AnalyticKind, ResultCache>,
}

impl<A: RecordAccessor> AnalyticsEngine<A> {
    pub fn new(accessor: A, config: AnalyticsConfig) -> Self {
        Self::with_clock(accessor, config, system_clock())
    }

    pub fn with_clock(accessor: A, config: AnalyticsConfig, clock: Clock) -> Self {
        let caches = AnalyticKind::ALL
            .iter()
            .filter_map(|kind| {
                let ttl = config.cache.ttl_for(*kind)?;
                Some((
                    *kind,
                    ResultCache::new(ttl, config.cache.max_entries, clock.clone()),
                ))
            })
            .collect();

        Self {
            accessor,
            config,
            clock,
            caches,
        }
    }

    #[cfg(test)]
    pub fn accessor(&self) -> &A {
        &self.accessor
    }

    pub async fn invalidate(&self, kind: AnalyticKind, group_id: Uuid) {
        if let Some(cache) = self.caches.get(&kind) {
            cache.invalidate(&cache_key(kind.cache_prefix(), group_id)).await;
        }
    }

    /// Drops every cached result for the group.
    pub async fn invalidate_group(&self, group_id: Uuid) {
        for kind in AnalyticKind::ALL {
            self.invalidate(kind, group_id).await;
        }
    }

    async fn run<T, F, Fut>(
        &self,
        kind: AnalyticKind,
        group_id: Uuid,
        freshness: Freshness,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(cache) = self.caches.get(&kind) else {
            return compute().await;
        };

        let key = cache_key(kind.cache_prefix(), group_id);
        if freshness == Freshness::Refetch {
            cache.invalidate(&key).await;
        }
        cache.get_or_compute(&key, compute).await
    }

    /// Per-member engagement scores and levels, most at-risk first.
    #[tracing::instrument(skip(self))]
    pub async fn engagement_forecast(
        &self,
        group_id: Uuid,
        freshness: Freshness,
    ) -> Result<EngagementForecastReport> {
        self.run(AnalyticKind::EngagementForecast, group_id, freshness, || async {
            let now = (self.clock)();
            let recent = Window::trailing(now, self.config.windows.recent_days);
            let windows = MetricWindows {
                recent,
                previous: recent.preceding(),
                activity: Window::trailing(now, self.config.windows.activity_days),
            };
            let span = windows.activity.union(&windows.previous);
            let activity = load_group_activity(&self.accessor, group_id, span, false).await?;

            Ok(build_forecast(&activity, &windows, &self.config.engagement, now))
        })
        .await
    }

    /// Weekly attendance, activity, join and RSVP history.
    #[tracing::instrument(skip(self))]
    pub async fn health_trends(
        &self,
        group_id: Uuid,
        freshness: Freshness,
    ) -> Result<GroupHealthTrends> {
        self.run(AnalyticKind::HealthTrends, group_id, freshness, || async {
            let buckets = self.health_buckets();
            let activity = self.load_buckets(group_id, &buckets, true).await?;
            Ok(build_health_trends(&activity, &buckets))
        })
        .await
    }

    /// Deviations of the last window from the one before, with a health score.
    #[tracing::instrument(skip(self))]
    pub async fn anomalies(&self, group_id: Uuid, freshness: Freshness) -> Result<AnomalyReport> {
        self.run(AnalyticKind::Anomalies, group_id, freshness, || async {
            let now = (self.clock)();
            let current = Window::trailing(now, self.config.anomaly.window_days);
            let observations = observe(&self.accessor, group_id, current).await?;
            Ok(build_report(&observations, &self.config.anomaly, now))
        })
        .await
    }

    /// Points-based activity ranking over the activity window.
    #[tracing::instrument(skip(self))]
    pub async fn activity_scores(
        &self,
        group_id: Uuid,
        freshness: Freshness,
    ) -> Result<ActivityDistribution> {
        self.run(AnalyticKind::ActivityScores, group_id, freshness, || async {
            let window = Window::trailing((self.clock)(), self.config.windows.activity_days);
            let activity = load_group_activity(&self.accessor, group_id, window, true).await?;
            Ok(score_members(&activity, &window, &self.config.activity))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn time_slots(
        &self,
        group_id: Uuid,
        freshness: Freshness,
    ) -> Result<TimeSlotAnalysis> {
        self.run(AnalyticKind::TimeSlots, group_id, freshness, || async {
            let window = Window::trailing((self.clock)(), self.config.time_slots.lookback_days);
            let activity = load_group_activity(&self.accessor, group_id, window, false).await?;
            Ok(analyze_time_slots(&activity, &window, &self.config.time_slots))
        })
        .await
    }

    /// Most improved and steadiest members across the health buckets.
    #[tracing::instrument(skip(self))]
    pub async fn member_comparison(
        &self,
        group_id: Uuid,
        freshness: Freshness,
    ) -> Result<MemberComparison> {
        self.run(AnalyticKind::MemberComparison, group_id, freshness, || async {
            let buckets = self.health_buckets();
            let activity = self.load_buckets(group_id, &buckets, false).await?;
            Ok(compare_members(
                &activity,
                &buckets,
                self.config.health.comparison_recent_buckets,
                &self.config.engagement.trend,
            ))
        })
        .await
    }

    fn health_buckets(&self) -> Vec<Window> {
        Window::buckets(
            (self.clock)(),
            self.config.health.bucket_count,
            self.config.health.bucket_days,
        )
    }

    async fn load_buckets(
        &self,
        group_id: Uuid,
        buckets: &[Window],
        include_rsvps: bool,
    ) -> Result<GroupActivity> {
        match (buckets.first(), buckets.last()) {
            (Some(first), Some(last)) => {
                load_group_activity(&self.accessor, group_id, first.union(last), include_rsvps)
                    .await
            }
            _ => Ok(GroupActivity::default()),
        }
    }
}
