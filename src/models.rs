use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Rows decoded from the record accessor.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub user_id: Uuid,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    #[serde(other)]
    Other,
}

impl AttendanceStatus {
    pub fn counts_as_attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub schedule_id: Uuid,
    pub user_id: Uuid,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpResponse {
    Yes,
    No,
    Maybe,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsvpRecord {
    pub schedule_id: Uuid,
    pub user_id: Uuid,
    pub response: RsvpResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinanceRecord {
    pub kind: FinanceKind,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

// Engagement forecast

/// Ordered from most to least at-risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Risk,
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementLevel::Risk => "risk",
            EngagementLevel::Low => "low",
            EngagementLevel::Medium => "medium",
            EngagementLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Declining => "declining",
            Trend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEngagementForecast {
    pub user_id: Uuid,
    pub display_name: String,
    pub recent_attendance_rate: u32,
    pub previous_attendance_rate: u32,
    pub post_count: u32,
    pub comment_count: u32,
    pub engagement_score: u32,
    pub level: EngagementLevel,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementForecastReport {
    pub forecasts: Vec<MemberEngagementForecast>,
    pub total_count: usize,
    pub risk_count: usize,
    pub low_count: usize,
    pub medium_count: usize,
    pub high_count: usize,
    pub generated_at: DateTime<Utc>,
}

// Anomaly detection

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    Attendance,
    Posts,
    Members,
    Finance,
}

impl AnomalyMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyMetric::Attendance => "attendance",
            AnomalyMetric::Posts => "posts",
            AnomalyMetric::Members => "members",
            AnomalyMetric::Finance => "finance",
        }
    }
}

/// Ordered by severity, `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLevel {
    Info,
    Warning,
    Critical,
}

impl AnomalyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLevel::Info => "info",
            AnomalyLevel::Warning => "warning",
            AnomalyLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAnomaly {
    pub id: Uuid,
    pub metric_type: AnomalyMetric,
    pub level: AnomalyLevel,
    pub title: String,
    pub description: String,
    pub current_value: f64,
    pub expected_value: f64,
    pub deviation_percent: i64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Poor,
    Fair,
    Good,
}

impl HealthBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBand::Poor => "poor",
            HealthBand::Fair => "fair",
            HealthBand::Good => "good",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<ActivityAnomaly>,
    pub health_score: u32,
    pub health_band: HealthBand,
    pub last_checked_at: DateTime<Utc>,
}

// Group health trends

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    /// Value of the most recent bucket
    pub current: f64,
    /// Percent change against the previous bucket, `None` without a baseline
    pub change_rate: Option<i64>,
    /// One value per bucket, oldest first
    pub trend: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyHealthPoint {
    pub label: String,
    pub week_start: DateTime<Utc>,
    pub attendance_rate: u32,
    pub activity_count: u32,
    pub new_member_count: u32,
    pub rsvp_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupHealthTrends {
    pub attendance_rate: HealthMetric,
    pub activity_count: HealthMetric,
    pub new_member_count: HealthMetric,
    pub rsvp_rate: HealthMetric,
    pub weeks: Vec<WeeklyHealthPoint>,
}

// Activity archive scoring

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityGrade {
    VeryActive,
    Active,
    Moderate,
    Low,
}

impl ActivityGrade {
    pub const ALL: [ActivityGrade; 4] = [
        ActivityGrade::VeryActive,
        ActivityGrade::Active,
        ActivityGrade::Moderate,
        ActivityGrade::Low,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ActivityGrade::VeryActive => "very active",
            ActivityGrade::Active => "active",
            ActivityGrade::Moderate => "moderate",
            ActivityGrade::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityBreakdown {
    pub attendance: u32,
    pub posts: u32,
    pub comments: u32,
    pub rsvp: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberActivityScore {
    pub user_id: Uuid,
    pub name: String,
    pub total_score: u32,
    pub breakdown: ActivityBreakdown,
    pub grade: ActivityGrade,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeCount {
    pub grade: ActivityGrade,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDistribution {
    pub grade_summary: Vec<GradeCount>,
    pub ranked: Vec<MemberActivityScore>,
    pub top: Vec<MemberActivityScore>,
    pub total_members: usize,
    pub avg_score: f64,
}

// Time-slot analysis

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCell {
    /// 0 = Sunday
    pub day_of_week: u32,
    pub time_slot: TimeSlot,
    pub count: u32,
    pub intensity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub day_of_week: u32,
    pub time_slot: TimeSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSlotForecast {
    pub user_id: Uuid,
    pub name: String,
    pub probability: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotForecast {
    pub slot: SlotRef,
    pub members: Vec<MemberSlotForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlotAnalysis {
    pub cells: Vec<SlotCell>,
    pub busiest: Option<SlotRef>,
    pub quietest: Option<SlotRef>,
    pub forecasts: Vec<SlotForecast>,
}

impl TimeSlotAnalysis {
    pub fn has_data(&self) -> bool {
        self.cells.iter().any(|cell| cell.count > 0)
    }

    /// Member forecasts for one day/slot; empty when no schedule fell there.
    pub fn forecast_for(&self, day_of_week: u32, time_slot: TimeSlot) -> &[MemberSlotForecast] {
        self.forecasts
            .iter()
            .find(|forecast| {
                forecast.slot.day_of_week == day_of_week && forecast.slot.time_slot == time_slot
            })
            .map(|forecast| forecast.members.as_slice())
            .unwrap_or(&[])
    }
}

// Member comparison

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub recent_average: f64,
    pub previous_average: f64,
    pub diff: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberComparison {
    pub most_improved: Option<ComparisonEntry>,
    pub steadiest: Option<ComparisonEntry>,
    pub compared_members: usize,
}
