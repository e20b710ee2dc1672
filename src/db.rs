use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::accessor::{Collection, Filter, FilterValue, RecordAccessor};
use crate::error::AccessError;

const SCHEMA: &str = "group_analytics";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Record accessor over the `group_analytics` schema.
///
/// Filters become a parameterized `WHERE` clause; rows come back as JSON
/// objects built by Postgres so both accessors hand the engine the same
/// shape.
#[derive(Debug, Clone)]
pub struct PgRecordAccessor {
    pool: PgPool,
}

impl PgRecordAccessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordAccessor for PgRecordAccessor {
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        projection: &[&str],
    ) -> Result<Vec<Value>, AccessError> {
        if filters.iter().any(Filter::is_unsatisfiable) {
            return Ok(Vec::new());
        }
        let statement = select_statement(collection, filters, projection)?;
        let rows = statement.query().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| row.try_get::<Value, _>("doc").map_err(AccessError::from))
            .collect()
    }

    async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<i64, AccessError> {
        if filters.iter().any(Filter::is_unsatisfiable) {
            return Ok(0);
        }
        let statement = count_statement(collection, filters)?;
        let row = statement.query().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("count")?)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Int(i64),
    Texts(Vec<String>),
    Uuids(Vec<Uuid>),
    Timestamps(Vec<DateTime<Utc>>),
    Ints(Vec<i64>),
}

impl From<&FilterValue> for Bind {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Text(text) => Bind::Text(text.clone()),
            FilterValue::Uuid(id) => Bind::Uuid(*id),
            FilterValue::Timestamp(at) => Bind::Timestamp(*at),
            FilterValue::Int(number) => Bind::Int(*number),
        }
    }
}

/// One `ANY($n)` array parameter; every element must share a type.
fn list_bind(field: &str, values: &[FilterValue]) -> Result<Bind, AccessError> {
    let mixed = || AccessError::MixedList {
        field: field.to_string(),
    };

    match values.first() {
        None | Some(FilterValue::Text(_)) => values
            .iter()
            .map(|value| match value {
                FilterValue::Text(text) => Ok(text.clone()),
                _ => Err(mixed()),
            })
            .collect::<Result<_, _>>()
            .map(Bind::Texts),
        Some(FilterValue::Uuid(_)) => values
            .iter()
            .map(|value| match value {
                FilterValue::Uuid(id) => Ok(*id),
                _ => Err(mixed()),
            })
            .collect::<Result<_, _>>()
            .map(Bind::Uuids),
        Some(FilterValue::Timestamp(_)) => values
            .iter()
            .map(|value| match value {
                FilterValue::Timestamp(at) => Ok(*at),
                _ => Err(mixed()),
            })
            .collect::<Result<_, _>>()
            .map(Bind::Timestamps),
        Some(FilterValue::Int(_)) => values
            .iter()
            .map(|value| match value {
                FilterValue::Int(number) => Ok(*number),
                _ => Err(mixed()),
            })
            .collect::<Result<_, _>>()
            .map(Bind::Ints),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    sql: String,
    binds: Vec<Bind>,
}

impl Statement {
    fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for bind in &self.binds {
            query = match bind {
                Bind::Text(value) => query.bind(value.clone()),
                Bind::Uuid(value) => query.bind(*value),
                Bind::Timestamp(value) => query.bind(*value),
                Bind::Int(value) => query.bind(*value),
                Bind::Texts(values) => query.bind(values.clone()),
                Bind::Uuids(values) => query.bind(values.clone()),
                Bind::Timestamps(values) => query.bind(values.clone()),
                Bind::Ints(values) => query.bind(values.clone()),
            };
        }
        query
    }
}

fn where_clause(collection: Collection, filters: &[Filter]) -> Result<(String, Vec<Bind>), AccessError> {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    for filter in filters {
        let field = filter.field();
        collection.check_field(field)?;
        let placeholder = binds.len() + 1;

        let (operator, bind) = match filter {
            Filter::Eq(_, value) => ("=", Bind::from(value)),
            Filter::Gte(_, value) => (">=", Bind::from(value)),
            Filter::Lt(_, value) => ("<", Bind::from(value)),
            Filter::Lte(_, value) => ("<=", Bind::from(value)),
            Filter::In(_, values) => {
                binds.push(list_bind(field, values)?);
                conditions.push(format!("t.{field} = ANY(${placeholder})"));
                continue;
            }
        };
        binds.push(bind);
        conditions.push(format!("t.{field} {operator} ${placeholder}"));
    }

    if conditions.is_empty() {
        return Ok((String::new(), binds));
    }
    Ok((format!(" WHERE {}", conditions.join(" AND ")), binds))
}

fn select_statement(
    collection: Collection,
    filters: &[Filter],
    projection: &[&str],
) -> Result<Statement, AccessError> {
    let row = if projection.is_empty() {
        "to_jsonb(t)".to_string()
    } else {
        let mut pairs = Vec::with_capacity(projection.len());
        for field in projection {
            collection.check_field(field)?;
            pairs.push(format!("'{field}', t.{field}"));
        }
        format!("jsonb_build_object({})", pairs.join(", "))
    };
    let (conditions, binds) = where_clause(collection, filters)?;

    Ok(Statement {
        sql: format!(
            "SELECT {row} AS doc FROM {SCHEMA}.{} t{conditions}",
            collection.table()
        ),
        binds,
    })
}

fn count_statement(collection: Collection, filters: &[Filter]) -> Result<Statement, AccessError> {
    let (conditions, binds) = where_clause(collection, filters)?;
    Ok(Statement {
        sql: format!(
            "SELECT COUNT(*) AS count FROM {SCHEMA}.{} t{conditions}",
            collection.table()
        ),
        binds,
    })
}

/// Inserts a demo group with twelve weeks of history ending today and
/// returns its id. Re-running on the same day leaves the data unchanged.
pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let group_id = Uuid::parse_str("6f1c2a8e-3b7d-4c55-9a0e-2d9f4b1e7c31")?;
    let today = Utc::now()
        .duration_trunc(Duration::days(1))
        .context("could not truncate the current time")?;

    // (id, name, joined weeks ago, attendance profile)
    let members = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            40,
            Profile::Steady,
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            30,
            Profile::Fading,
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            20,
            Profile::Rising,
        ),
        (
            Uuid::parse_str("9b8e7a61-55c4-4f0b-8d2e-1a3c5e7f9b02")?,
            "Noah Kim",
            12,
            Profile::Occasional,
        ),
        (
            Uuid::parse_str("a4c2e6f8-1b3d-4a5c-9e7f-0d2b4c6e8a13")?,
            "Mina Cho",
            3,
            Profile::Steady,
        ),
    ];

    for (user_id, name, joined_weeks_ago, _) in &members {
        sqlx::query(
            r#"
            INSERT INTO group_analytics.group_members (group_id, user_id, display_name, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, user_id) DO UPDATE
            SET display_name = EXCLUDED.display_name
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(*name)
        .bind(today - Duration::weeks(*joined_weeks_ago))
        .execute(pool)
        .await?;
    }

    // Two sessions a week, oldest first.
    let weeks = 12i64;
    for session in 0..weeks * 2 {
        let days_ago = (weeks * 7) - session * 7 / 2 - 1;
        let hour = if session % 2 == 0 { 19 } else { 10 };
        let starts_at = today - Duration::days(days_ago) + Duration::hours(hour);
        let schedule_id: Uuid = sqlx::query(
            r#"
            INSERT INTO group_analytics.schedules (id, group_id, title, starts_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, starts_at) DO UPDATE SET title = EXCLUDED.title
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(if session % 2 == 0 { "Evening practice" } else { "Weekend session" })
        .bind(starts_at)
        .fetch_one(pool)
        .await?
        .get("id");

        let progress = session as f64 / (weeks * 2) as f64;
        for (index, (user_id, _, joined_weeks_ago, profile)) in members.iter().enumerate() {
            if days_ago > joined_weeks_ago * 7 {
                continue;
            }
            let status = profile.status(progress, session as usize + index);
            let response = if status == "absent" && (session as usize + index) % 3 == 0 {
                "no"
            } else if status == "absent" {
                "maybe"
            } else {
                "yes"
            };

            sqlx::query(
                r#"
                INSERT INTO group_analytics.schedule_attendance (schedule_id, user_id, status, checked_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (schedule_id, user_id) DO NOTHING
                "#,
            )
            .bind(schedule_id)
            .bind(user_id)
            .bind(status)
            .bind(starts_at)
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO group_analytics.schedule_rsvps (schedule_id, user_id, response)
                VALUES ($1, $2, $3)
                ON CONFLICT (schedule_id, user_id) DO NOTHING
                "#,
            )
            .bind(schedule_id)
            .bind(user_id)
            .bind(response)
            .execute(pool)
            .await?;
        }
    }

    // A post every few days, each answered by the next member.
    for day in (1..weeks * 7).step_by(4) {
        let author = &members[(day as usize / 4) % members.len()];
        let replier = &members[(day as usize / 4 + 1) % members.len()];
        let created_at = today - Duration::days(day) + Duration::hours(13);
        let inserted = sqlx::query(
            r#"
            INSERT INTO group_analytics.board_posts (id, group_id, author_id, title, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (group_id, author_id, created_at) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(author.0)
        .bind(format!("Notes from {}", author.1))
        .bind(created_at)
        .fetch_optional(pool)
        .await?;

        // Already seeded: its comment exists too.
        let Some(post) = inserted else {
            continue;
        };
        let post_id: Uuid = post.get("id");
        sqlx::query(
            r#"
            INSERT INTO group_analytics.board_comments (id, post_id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post_id)
        .bind(replier.0)
        .bind("Thanks for sharing")
        .bind(created_at + Duration::hours(2))
        .execute(pool)
        .await?;
    }

    // Weekly expenses, doubling over the last month.
    for week in 0..weeks {
        let amount: i64 = if week < 4 { 90_000 } else { 40_000 };
        sqlx::query(
            r#"
            INSERT INTO group_analytics.finance_transactions (id, group_id, kind, amount, occurred_at)
            VALUES ($1, $2, 'expense', $3, $4)
            ON CONFLICT (group_id, kind, occurred_at) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(amount)
        .bind(today - Duration::weeks(week) - Duration::days(2))
        .execute(pool)
        .await?;
    }

    info!(%group_id, members = members.len(), "demo group seeded");
    Ok(group_id)
}

#[derive(Debug, Clone, Copy)]
enum Profile {
    Steady,
    Fading,
    Rising,
    Occasional,
}

impl Profile {
    /// Attendance status for a session `progress` of the way through the
    /// seeded history; `salt` spreads absences across sessions.
    fn status(self, progress: f64, salt: usize) -> &'static str {
        let attends = match self {
            Profile::Steady => salt % 6 != 0,
            Profile::Fading => progress < 0.6 || salt % 4 == 0,
            Profile::Rising => progress > 0.5 || salt % 4 == 0,
            Profile::Occasional => salt % 3 == 0,
        };
        match (attends, salt % 5) {
            (false, _) => "absent",
            (true, 0) => "late",
            (true, _) => "present",
        }
    }
}

/// Upserts attendance marks from a CSV export and returns how many marks
/// were written.
///
/// Expected columns: `group_id, user_id, display_name, schedule_title,
/// starts_at, status` with `starts_at` in RFC 3339.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        group_id: Uuid,
        user_id: Uuid,
        display_name: String,
        schedule_title: String,
        starts_at: DateTime<Utc>,
        status: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("could not open {}", csv_path.display()))?;
    let mut written = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 1))?;

        sqlx::query(
            r#"
            INSERT INTO group_analytics.group_members (group_id, user_id, display_name, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, user_id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                joined_at = LEAST(group_analytics.group_members.joined_at, EXCLUDED.joined_at)
            "#,
        )
        .bind(row.group_id)
        .bind(row.user_id)
        .bind(&row.display_name)
        .bind(row.starts_at)
        .execute(pool)
        .await?;

        let schedule_id: Uuid = sqlx::query(
            r#"
            INSERT INTO group_analytics.schedules (id, group_id, title, starts_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, starts_at) DO UPDATE SET title = EXCLUDED.title
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.group_id)
        .bind(&row.schedule_title)
        .bind(row.starts_at)
        .fetch_one(pool)
        .await?
        .get("id");

        let result = sqlx::query(
            r#"
            INSERT INTO group_analytics.schedule_attendance (schedule_id, user_id, status, checked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (schedule_id, user_id) DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(schedule_id)
        .bind(row.user_id)
        .bind(row.status.to_lowercase())
        .bind(row.starts_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            written += 1;
        }
    }

    debug!(written, path = %csv_path.display(), "attendance imported");
    Ok(written)
}
