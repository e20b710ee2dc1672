//! Metric aggregation
//!
//! Loads a group's raw rows through the record accessor and turns them into
//! windowed per-member and per-group counts and rates. Loading is the only
//! async part; everything after it is a pure function of the loaded rows.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::accessor::{Collection, Filter, RecordAccessor};
use crate::error::{AnalyticsError, Result};
use crate::models::{
    AttendanceRecord, CommentRecord, MemberRecord, PostRecord, RsvpRecord, RsvpResponse,
    ScheduleRecord,
};
use crate::window::Window;

const MEMBER_FIELDS: &[&str] = &["user_id", "display_name", "joined_at"];
const SCHEDULE_FIELDS: &[&str] = &["id", "starts_at"];
const ATTENDANCE_FIELDS: &[&str] = &["schedule_id", "user_id", "status"];
const RSVP_FIELDS: &[&str] = &["schedule_id", "user_id", "response"];
const POST_FIELDS: &[&str] = &["id", "author_id", "created_at"];
const COMMENT_FIELDS: &[&str] = &["id", "post_id", "author_id", "created_at"];

/// Rounds halves toward positive infinity (51.5 -> 52, -2.5 -> -2).
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// `part / whole` as a rounded percentage; 0 when `whole` is 0.
pub fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    round_half_up(part as f64 / whole as f64 * 100.0) as u32
}

/// Queries a collection and decodes every row. A filter that cannot match
/// (an empty `in` list) short-circuits without a round trip.
pub async fn fetch_rows<A, T>(
    accessor: &A,
    collection: Collection,
    filters: &[Filter],
    projection: &[&str],
) -> Result<Vec<T>>
where
    A: RecordAccessor + ?Sized,
    T: DeserializeOwned,
{
    if filters.iter().any(Filter::is_unsatisfiable) {
        return Ok(Vec::new());
    }

    let rows = accessor
        .query(collection, filters, projection)
        .await
        .map_err(|source| AnalyticsError::Fetch { collection, source })?;
    debug!(%collection, rows = rows.len(), "rows loaded");

    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|source| AnalyticsError::Decode { collection, source })
        })
        .collect()
}

pub async fn count_rows<A>(accessor: &A, collection: Collection, filters: &[Filter]) -> Result<u64>
where
    A: RecordAccessor + ?Sized,
{
    let count = accessor
        .count(collection, filters)
        .await
        .map_err(|source| AnalyticsError::Fetch { collection, source })?;
    Ok(count.max(0) as u64)
}

/// A group's rows for one span of time.
///
/// `posts`, `comments` and `schedules` only hold rows inside the span;
/// `members` holds everyone who had joined by its end.
#[derive(Debug, Clone, Default)]
pub struct GroupActivity {
    pub members: Vec<MemberRecord>,
    pub schedules: Vec<ScheduleRecord>,
    pub attendance: Vec<AttendanceRecord>,
    pub rsvps: Vec<RsvpRecord>,
    pub posts: Vec<PostRecord>,
    pub comments: Vec<CommentRecord>,
}

pub async fn load_group_activity<A>(
    accessor: &A,
    group_id: Uuid,
    span: Window,
    include_rsvps: bool,
) -> Result<GroupActivity>
where
    A: RecordAccessor + ?Sized,
{
    // Roster as of the end of the span
    let member_filters = [
        Filter::eq("group_id", group_id),
        Filter::lte("joined_at", span.end),
    ];
    let [schedule_since, schedule_until] = span.filters("starts_at");
    let schedule_filters = [Filter::eq("group_id", group_id), schedule_since, schedule_until];
    // Comments are scoped through their post, so every post of the group is
    // needed, not just the ones written inside the span.
    let post_filters = [Filter::eq("group_id", group_id)];

    let (members, schedules, group_posts) = tokio::try_join!(
        fetch_rows::<_, MemberRecord>(accessor, Collection::Members, &member_filters, MEMBER_FIELDS),
        fetch_rows::<_, ScheduleRecord>(
            accessor,
            Collection::Schedules,
            &schedule_filters,
            SCHEDULE_FIELDS
        ),
        fetch_rows::<_, PostRecord>(accessor, Collection::Posts, &post_filters, POST_FIELDS),
    )?;

    let schedule_filters = [Filter::is_in(
        "schedule_id",
        schedules.iter().map(|schedule| schedule.id),
    )];
    let [comment_since, comment_until] = span.filters("created_at");
    let comment_filters = [
        Filter::is_in("post_id", group_posts.iter().map(|post| post.id)),
        comment_since,
        comment_until,
    ];

    let (attendance, comments, rsvps) = tokio::try_join!(
        fetch_rows::<_, AttendanceRecord>(
            accessor,
            Collection::Attendance,
            &schedule_filters,
            ATTENDANCE_FIELDS
        ),
        fetch_rows::<_, CommentRecord>(
            accessor,
            Collection::Comments,
            &comment_filters,
            COMMENT_FIELDS
        ),
        async {
            if include_rsvps {
                fetch_rows::<_, RsvpRecord>(
                    accessor,
                    Collection::Rsvps,
                    &schedule_filters,
                    RSVP_FIELDS,
                )
                .await
            } else {
                Ok(Vec::new())
            }
        },
    )?;

    let posts = group_posts
        .into_iter()
        .filter(|post| span.contains(post.created_at))
        .collect();

    Ok(GroupActivity {
        members,
        schedules,
        attendance,
        rsvps,
        posts,
        comments,
    })
}

impl GroupActivity {
    pub fn schedule_ids_in(&self, window: &Window) -> HashSet<Uuid> {
        self.schedules
            .iter()
            .filter(|schedule| window.contains(schedule.starts_at))
            .map(|schedule| schedule.id)
            .collect()
    }

    /// Distinct schedules in `window` each user attended (present or late).
    pub fn attended_by_member(&self, window: &Window) -> HashMap<Uuid, usize> {
        let scheduled = self.schedule_ids_in(window);
        let attended: HashSet<(Uuid, Uuid)> = self
            .attendance
            .iter()
            .filter(|mark| mark.status.counts_as_attended() && scheduled.contains(&mark.schedule_id))
            .map(|mark| (mark.user_id, mark.schedule_id))
            .collect();

        let mut counts = HashMap::new();
        for (user_id, _) in attended {
            *counts.entry(user_id).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct schedules in `window` each user answered (yes, no or maybe).
    pub fn rsvps_by_member(&self, window: &Window) -> HashMap<Uuid, usize> {
        let scheduled = self.schedule_ids_in(window);
        let answered: HashSet<(Uuid, Uuid)> = self
            .rsvps
            .iter()
            .filter(|rsvp| rsvp.response != RsvpResponse::Other && scheduled.contains(&rsvp.schedule_id))
            .map(|rsvp| (rsvp.user_id, rsvp.schedule_id))
            .collect();

        let mut counts = HashMap::new();
        for (user_id, _) in answered {
            *counts.entry(user_id).or_insert(0) += 1;
        }
        counts
    }

    pub fn posts_by_author(&self, window: &Window) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for post in self.posts.iter().filter(|post| window.contains(post.created_at)) {
            *counts.entry(post.author_id).or_insert(0) += 1;
        }
        counts
    }

    pub fn comments_by_author(&self, window: &Window) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for comment in self
            .comments
            .iter()
            .filter(|comment| window.contains(comment.created_at))
        {
            *counts.entry(comment.author_id).or_insert(0) += 1;
        }
        counts
    }

    /// Members who had joined before `window` closed.
    fn roster_at<'a>(&'a self, window: &Window) -> impl Iterator<Item = &'a MemberRecord> {
        let end = window.end;
        self.members.iter().filter(move |member| member.joined_at < end)
    }

    /// Attended marks over every (schedule, member) pair, counting only
    /// members who had joined by the end of `window`.
    pub fn group_attendance_rate(&self, window: &Window) -> u32 {
        let schedules = self.schedule_ids_in(window).len();
        self.roster_rate(window, schedules, &self.attended_by_member(window))
    }

    /// RSVP answers over every (schedule, member) pair of the same roster.
    pub fn rsvp_rate(&self, window: &Window) -> u32 {
        let schedules = self.schedule_ids_in(window).len();
        self.roster_rate(window, schedules, &self.rsvps_by_member(window))
    }

    pub fn new_member_count(&self, window: &Window) -> usize {
        self.members
            .iter()
            .filter(|member| window.contains(member.joined_at))
            .count()
    }

    /// Posts plus comments in `window`.
    pub fn activity_count(&self, window: &Window) -> usize {
        let posts = self
            .posts
            .iter()
            .filter(|post| window.contains(post.created_at))
            .count();
        let comments = self
            .comments
            .iter()
            .filter(|comment| window.contains(comment.created_at))
            .count();
        posts + comments
    }

    fn roster_rate(&self, window: &Window, schedules: usize, counts: &HashMap<Uuid, usize>) -> u32 {
        let mut roster = 0;
        let mut total = 0;
        for member in self.roster_at(window) {
            roster += 1;
            total += counts.get(&member.user_id).copied().unwrap_or(0);
        }
        percent(total, schedules * roster)
    }
}

/// Windows one member-level aggregation runs over.
#[derive(Debug, Clone, Copy)]
pub struct MetricWindows {
    /// Attendance window being scored
    pub recent: Window,
    /// Attendance window compared against
    pub previous: Window,
    /// Board activity window
    pub activity: Window,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberWindowMetrics {
    pub user_id: Uuid,
    pub display_name: String,
    pub recent_rate: u32,
    pub previous_rate: u32,
    pub recent_schedules: usize,
    pub previous_schedules: usize,
    pub post_count: u32,
    pub comment_count: u32,
}

/// One entry per member of the roster, zeroed when the member has no rows.
pub fn member_metrics(activity: &GroupActivity, windows: &MetricWindows) -> Vec<MemberWindowMetrics> {
    let recent_schedules = activity.schedule_ids_in(&windows.recent).len();
    let previous_schedules = activity.schedule_ids_in(&windows.previous).len();
    let recent_attended = activity.attended_by_member(&windows.recent);
    let previous_attended = activity.attended_by_member(&windows.previous);
    let posts = activity.posts_by_author(&windows.activity);
    let comments = activity.comments_by_author(&windows.activity);

    activity
        .members
        .iter()
        .map(|member| {
            let lookup = |counts: &HashMap<Uuid, usize>| {
                counts.get(&member.user_id).copied().unwrap_or(0)
            };
            MemberWindowMetrics {
                user_id: member.user_id,
                display_name: member.display_name.clone(),
                recent_rate: percent(lookup(&recent_attended), recent_schedules),
                previous_rate: percent(lookup(&previous_attended), previous_schedules),
                recent_schedules,
                previous_schedules,
                post_count: lookup(&posts) as u32,
                comment_count: lookup(&comments) as u32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fixed_now, GroupFixture};

    fn windows(fixture: &GroupFixture) -> MetricWindows {
        let recent = Window::trailing(fixture.now, 30);
        MetricWindows {
            recent,
            previous: recent.preceding(),
            activity: Window::trailing(fixture.now, 90),
        }
    }

    async fn load(fixture: &GroupFixture) -> GroupActivity {
        let span = Window::trailing(fixture.now, 90);
        load_group_activity(&fixture.accessor, fixture.group_id, span, true)
            .await
            .unwrap()
    }

    #[test]
    fn percent_rounds_half_up_and_guards_zero() {
        assert_eq!(percent(15, 20), 75);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(3, 0), 0);
        assert_eq!(round_half_up(51.5), 52.0);
        assert_eq!(round_half_up(-2.5), -2.0);
    }

    #[tokio::test]
    async fn attendance_rate_counts_present_and_late() {
        let mut fixture = GroupFixture::new(fixed_now());
        let member = fixture.member("Avery", 200);
        for day in 0..20 {
            let schedule = fixture.schedule(day);
            let status = match day {
                0..=11 => "present",
                12..=14 => "late",
                _ => "absent",
            };
            fixture.attend(schedule, member, status);
        }

        let activity = load(&fixture).await;
        let metrics = member_metrics(&activity, &windows(&fixture));

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].recent_rate, 75);
        assert_eq!(metrics[0].recent_schedules, 20);
    }

    #[tokio::test]
    async fn every_member_gets_an_entry() {
        let mut fixture = GroupFixture::new(fixed_now());
        fixture.member("Avery", 10);
        fixture.member("Jules", 10);
        fixture.member("Kiara", 10);

        let activity = load(&fixture).await;
        let metrics = member_metrics(&activity, &windows(&fixture));

        assert_eq!(metrics.len(), 3);
        assert!(metrics
            .iter()
            .all(|entry| entry.recent_rate == 0 && entry.post_count == 0));
    }

    #[tokio::test]
    async fn duplicate_marks_do_not_inflate_rates() {
        let mut fixture = GroupFixture::new(fixed_now());
        let member = fixture.member("Avery", 100);
        let schedule = fixture.schedule(3);
        fixture.schedule(4);
        fixture.attend(schedule, member, "present");
        fixture.attend(schedule, member, "late");

        let activity = load(&fixture).await;
        let metrics = member_metrics(&activity, &windows(&fixture));
        assert_eq!(metrics[0].recent_rate, 50);
    }

    #[tokio::test]
    async fn comments_follow_their_post_into_the_group() {
        let mut fixture = GroupFixture::new(fixed_now());
        let author = fixture.member("Avery", 300);
        let old_post = fixture.post(author, 120);
        fixture.comment(old_post, author, 5);
        fixture.comment(Uuid::new_v4(), author, 5);

        let activity = load(&fixture).await;
        let metrics = member_metrics(&activity, &windows(&fixture));

        assert_eq!(metrics[0].post_count, 0);
        assert_eq!(metrics[0].comment_count, 1);
    }

    #[tokio::test]
    async fn group_rates_use_whole_roster() {
        let mut fixture = GroupFixture::new(fixed_now());
        let avery = fixture.member("Avery", 100);
        let jules = fixture.member("Jules", 100);
        let first = fixture.schedule(2);
        let second = fixture.schedule(9);
        fixture.attend(first, avery, "present");
        fixture.attend(second, avery, "present");
        fixture.attend(first, jules, "absent");
        fixture.rsvp(first, jules, "yes");

        let activity = load(&fixture).await;
        let week = Window::trailing(fixture.now, 30);

        assert_eq!(activity.group_attendance_rate(&week), 50);
        assert_eq!(activity.rsvp_rate(&week), 25);
    }

    #[tokio::test]
    async fn later_joiners_do_not_dilute_earlier_rates() {
        let mut fixture = GroupFixture::new(fixed_now());
        let avery = fixture.member("Avery", 100);
        let jules = fixture.member("Jules", 20);
        let early = fixture.schedule(40);
        let late = fixture.schedule(5);
        fixture.attend(early, avery, "present");
        fixture.rsvp(early, avery, "yes");
        fixture.attend(late, avery, "present");

        let activity = load(&fixture).await;
        let recent = Window::trailing(fixture.now, 30);
        let previous = recent.preceding();

        assert_eq!(activity.group_attendance_rate(&previous), 100);
        assert_eq!(activity.rsvp_rate(&previous), 100);
        assert_eq!(activity.group_attendance_rate(&recent), 50);

        // The roster query itself stops at the end of the span
        fixture.member("Invited", -3);
        let activity = load(&fixture).await;
        assert_eq!(activity.members.len(), 2);
        assert!(activity.members.iter().any(|member| member.user_id == jules));
    }

    #[tokio::test]
    async fn fetch_failure_is_not_a_zero_result() {
        let mut fixture = GroupFixture::new(fixed_now());
        fixture.member("Avery", 10);
        fixture.schedule(1);
        fixture.accessor.fail_on(Collection::Attendance);

        let span = Window::trailing(fixture.now, 90);
        let result = load_group_activity(&fixture.accessor, fixture.group_id, span, false).await;

        assert!(matches!(
            result,
            Err(AnalyticsError::Fetch {
                collection: Collection::Attendance,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_groups_skip_dependent_queries() {
        let fixture = GroupFixture::new(fixed_now());
        let activity = load(&fixture).await;

        assert!(activity.members.is_empty());
        // members, schedules and posts only
        assert_eq!(fixture.accessor.calls(), 3);
    }
}
