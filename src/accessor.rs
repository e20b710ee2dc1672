//! Record accessor contract
//!
//! The engine never talks to a database directly. It asks a [`RecordAccessor`]
//! for rows of a named [`Collection`] narrowed by [`Filter`]s, and decodes the
//! JSON rows it gets back. Cross-collection correlation (comments of a
//! group's posts, attendance of a group's schedules) is done by the engine
//! with sequential queries; accessors never join.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Members,
    Schedules,
    Attendance,
    Rsvps,
    Posts,
    Comments,
    FinanceTransactions,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Members => "group_members",
            Collection::Schedules => "schedules",
            Collection::Attendance => "schedule_attendance",
            Collection::Rsvps => "schedule_rsvps",
            Collection::Posts => "board_posts",
            Collection::Comments => "board_comments",
            Collection::FinanceTransactions => "finance_transactions",
        }
    }

    /// Fields that filters and projections may name.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Members => &["group_id", "user_id", "display_name", "joined_at"],
            Collection::Schedules => &["id", "group_id", "title", "starts_at"],
            Collection::Attendance => &["schedule_id", "user_id", "status", "checked_at"],
            Collection::Rsvps => &["schedule_id", "user_id", "response"],
            Collection::Posts => &["id", "group_id", "author_id", "title", "created_at"],
            Collection::Comments => &["id", "post_id", "author_id", "content", "created_at"],
            Collection::FinanceTransactions => {
                &["id", "group_id", "kind", "amount", "occurred_at"]
            }
        }
    }

    pub fn check_field(&self, field: &str) -> Result<(), AccessError> {
        if self.columns().contains(&field) {
            Ok(())
        } else {
            Err(AccessError::UnknownField {
                collection: *self,
                field: field.to_string(),
            })
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Collection::Members => "member",
            Collection::Schedules => "schedule",
            Collection::Attendance => "attendance",
            Collection::Rsvps => "rsvp",
            Collection::Posts => "post",
            Collection::Comments => "comment",
            Collection::FinanceTransactions => "finance",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Int(i64),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

/// Predicate over a single named field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, FilterValue),
    Gte(&'static str, FilterValue),
    Lt(&'static str, FilterValue),
    Lte(&'static str, FilterValue),
    In(&'static str, Vec<FilterValue>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn gte(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Filter::Gte(field, value.into())
    }

    pub fn lt(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Filter::Lt(field, value.into())
    }

    pub fn lte(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Filter::Lte(field, value.into())
    }

    pub fn is_in<V: Into<FilterValue>>(
        field: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn field(&self) -> &'static str {
        match self {
            Filter::Eq(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _) => field,
        }
    }

    /// True when no row can satisfy the filter (an empty `in` list).
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Filter::In(_, values) if values.is_empty())
    }
}

#[async_trait]
pub trait RecordAccessor: Send + Sync {
    /// Rows of `collection` matching every filter. An empty projection
    /// returns whole rows.
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        projection: &[&str],
    ) -> Result<Vec<Value>, AccessError>;

    async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<i64, AccessError>;
}

#[cfg(test)]
pub use memory::MemoryRecordAccessor;

#[cfg(test)]
mod memory {
    use std::cmp::Ordering;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use serde_json::Value;
    use uuid::Uuid;

    use super::{Collection, Filter, FilterValue, RecordAccessor};
    use crate::error::AccessError;

    impl Filter {
        fn matches(&self, row: &Value) -> bool {
            let Some(actual) = row.get(self.field()) else {
                return false;
            };

            match self {
                Filter::Eq(_, expected) => compare(actual, expected) == Some(Ordering::Equal),
                Filter::Gte(_, expected) => matches!(
                    compare(actual, expected),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Filter::Lt(_, expected) => compare(actual, expected) == Some(Ordering::Less),
                Filter::Lte(_, expected) => matches!(
                    compare(actual, expected),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                Filter::In(_, values) => values
                    .iter()
                    .any(|expected| compare(actual, expected) == Some(Ordering::Equal)),
            }
        }
    }

    /// Compares a JSON field against a typed filter value, parsing the field as
    /// the filter's type. Fields that do not parse never match.
    fn compare(actual: &Value, expected: &FilterValue) -> Option<Ordering> {
        match expected {
            FilterValue::Text(text) => actual.as_str().map(|value| value.cmp(text.as_str())),
            FilterValue::Uuid(id) => actual
                .as_str()
                .and_then(|value| Uuid::parse_str(value).ok())
                .map(|value| value.cmp(id)),
            FilterValue::Timestamp(at) => actual
                .as_str()
                .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                .map(|value| value.with_timezone(&Utc).cmp(at)),
            FilterValue::Int(number) => actual.as_i64().map(|value| value.cmp(number)),
        }
    }

    /// In-memory accessor evaluating the same filters as the Postgres one.
    ///
    /// Counts every call it serves so callers can observe whether a result came
    /// from cache, and can be told to fail a collection.
    #[derive(Debug, Default)]
    pub struct MemoryRecordAccessor {
        rows: HashMap<Collection, Vec<Value>>,
        failing: Option<Collection>,
        calls: AtomicUsize,
    }

    impl MemoryRecordAccessor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert<T: Serialize>(&mut self, collection: Collection, row: &T) {
            // Rows that cannot be represented as JSON objects are ignored.
            if let Ok(value @ Value::Object(_)) = serde_json::to_value(row) {
                self.rows.entry(collection).or_default().push(value);
            }
        }

        pub fn fail_on(&mut self, collection: Collection) {
            self.failing = Some(collection);
        }

        /// Number of `query`/`count` calls served so far.
        pub fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }

        fn matching(
            &self,
            collection: Collection,
            filters: &[Filter],
        ) -> Result<Vec<&Value>, AccessError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);

            if self.failing == Some(collection) {
                return Err(AccessError::Database(sqlx::Error::PoolTimedOut));
            }
            for filter in filters {
                collection.check_field(filter.field())?;
            }

            Ok(self
                .rows
                .get(&collection)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| filters.iter().all(|filter| filter.matches(row)))
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl RecordAccessor for MemoryRecordAccessor {
        async fn query(
            &self,
            collection: Collection,
            filters: &[Filter],
            projection: &[&str],
        ) -> Result<Vec<Value>, AccessError> {
            for field in projection {
                collection.check_field(field)?;
            }
            let rows = self.matching(collection, filters)?;

            Ok(rows
                .into_iter()
                .map(|row| match (projection.is_empty(), row) {
                    (false, Value::Object(map)) => Value::Object(
                        map.iter()
                            .filter(|(key, _)| projection.contains(&key.as_str()))
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect(),
                    ),
                    _ => row.clone(),
                })
                .collect())
        }

        async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<i64, AccessError> {
            let rows = self.matching(collection, filters)?;
            Ok(rows.len() as i64)
        }
    }
}
