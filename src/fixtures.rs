//! Shared builders for unit tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::accessor::{Collection, MemoryRecordAccessor};
use crate::window::Clock;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

/// One group's rows in a memory accessor. `days_ago` places an event one
/// hour before the `days_ago`-th day boundary, so day 0..=29 falls in the
/// last 30 days and 30..=59 in the 30 days before.
pub struct GroupFixture {
    pub group_id: Uuid,
    pub now: DateTime<Utc>,
    pub accessor: MemoryRecordAccessor,
}

impl GroupFixture {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            group_id: Uuid::new_v4(),
            now,
            accessor: MemoryRecordAccessor::new(),
        }
    }

    pub fn days_ago(&self, days: i64) -> DateTime<Utc> {
        self.now - Duration::days(days) - Duration::hours(1)
    }

    pub fn member(&mut self, name: &str, joined_days_ago: i64) -> Uuid {
        let user_id = Uuid::new_v4();
        let joined_at = self.days_ago(joined_days_ago);
        self.accessor.insert(
            Collection::Members,
            &json!({
                "group_id": self.group_id,
                "user_id": user_id,
                "display_name": name,
                "joined_at": joined_at,
            }),
        );
        user_id
    }

    pub fn schedule(&mut self, days_ago: i64) -> Uuid {
        let at = self.days_ago(days_ago);
        self.schedule_at(at)
    }

    pub fn schedule_at(&mut self, starts_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.accessor.insert(
            Collection::Schedules,
            &json!({
                "id": id,
                "group_id": self.group_id,
                "title": "practice",
                "starts_at": starts_at,
            }),
        );
        id
    }

    pub fn attend(&mut self, schedule_id: Uuid, user_id: Uuid, status: &str) {
        self.accessor.insert(
            Collection::Attendance,
            &json!({
                "schedule_id": schedule_id,
                "user_id": user_id,
                "status": status,
            }),
        );
    }

    pub fn rsvp(&mut self, schedule_id: Uuid, user_id: Uuid, response: &str) {
        self.accessor.insert(
            Collection::Rsvps,
            &json!({
                "schedule_id": schedule_id,
                "user_id": user_id,
                "response": response,
            }),
        );
    }

    pub fn post(&mut self, author_id: Uuid, days_ago: i64) -> Uuid {
        let at = self.days_ago(days_ago);
        self.post_at(author_id, at)
    }

    pub fn post_at(&mut self, author_id: Uuid, created_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.accessor.insert(
            Collection::Posts,
            &json!({
                "id": id,
                "group_id": self.group_id,
                "author_id": author_id,
                "title": "update",
                "created_at": created_at,
            }),
        );
        id
    }

    pub fn comment(&mut self, post_id: Uuid, author_id: Uuid, days_ago: i64) {
        let created_at = self.days_ago(days_ago);
        self.accessor.insert(
            Collection::Comments,
            &json!({
                "id": Uuid::new_v4(),
                "post_id": post_id,
                "author_id": author_id,
                "content": "nice",
                "created_at": created_at,
            }),
        );
    }

    pub fn expense(&mut self, amount: i64, days_ago: i64) {
        let occurred_at = self.days_ago(days_ago);
        self.accessor.insert(
            Collection::FinanceTransactions,
            &json!({
                "id": Uuid::new_v4(),
                "group_id": self.group_id,
                "kind": "expense",
                "amount": amount,
                "occurred_at": occurred_at,
            }),
        );
    }
}
