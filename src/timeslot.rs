//! Attendance time-slot analysis
//!
//! Buckets attended schedules, posts and comments into a 7 × 4 heatmap of
//! weekday and part of day, evaluated at a fixed UTC offset, and estimates
//! per-member attendance probability for each cell that had schedules.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{percent, GroupActivity};
use crate::models::{
    MemberSlotForecast, SlotCell, SlotForecast, SlotRef, TimeSlot, TimeSlotAnalysis,
};
use crate::window::Window;

const DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSlotConfig {
    pub utc_offset_minutes: i32,
    pub lookback_days: i64,
}

impl Default for TimeSlotConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            lookback_days: 90,
        }
    }
}

impl TimeSlotConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 4] = [
        TimeSlot::Morning,
        TimeSlot::Afternoon,
        TimeSlot::Evening,
        TimeSlot::Night,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeSlot::Morning,
            12..=17 => TimeSlot::Afternoon,
            18..=21 => TimeSlot::Evening,
            _ => TimeSlot::Night,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
            TimeSlot::Night => "night",
        }
    }

    fn index(&self) -> usize {
        match self {
            TimeSlot::Morning => 0,
            TimeSlot::Afternoon => 1,
            TimeSlot::Evening => 2,
            TimeSlot::Night => 3,
        }
    }
}

pub fn day_label(day_of_week: u32) -> &'static str {
    match day_of_week {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        _ => "Sat",
    }
}

fn slot_of(at: DateTime<Utc>, offset: &FixedOffset) -> SlotRef {
    let local = at.with_timezone(offset);
    SlotRef {
        day_of_week: local.weekday().num_days_from_sunday(),
        time_slot: TimeSlot::from_hour(local.hour()),
    }
}

fn cell_index(slot: &SlotRef) -> usize {
    slot.day_of_week as usize * TimeSlot::ALL.len() + slot.time_slot.index()
}

fn cell_ref(index: usize) -> SlotRef {
    let slots = TimeSlot::ALL.len();
    SlotRef {
        day_of_week: (index / slots) as u32,
        time_slot: TimeSlot::ALL[index % slots],
    }
}

fn intensity(count: u32, max: u32) -> u8 {
    if count == 0 || max == 0 {
        return 0;
    }
    ((count * 4).div_ceil(max)).min(4) as u8
}

pub fn analyze_time_slots(
    activity: &GroupActivity,
    window: &Window,
    config: &TimeSlotConfig,
) -> TimeSlotAnalysis {
    let offset = config.offset().unwrap_or_else(|| Utc.fix());
    let cell_count = DAYS as usize * TimeSlot::ALL.len();

    let schedule_cells: HashMap<Uuid, usize> = activity
        .schedules
        .iter()
        .filter(|schedule| window.contains(schedule.starts_at))
        .map(|schedule| (schedule.id, cell_index(&slot_of(schedule.starts_at, &offset))))
        .collect();

    let attended: HashSet<(Uuid, Uuid)> = activity
        .attendance
        .iter()
        .filter(|mark| mark.status.counts_as_attended() && schedule_cells.contains_key(&mark.schedule_id))
        .map(|mark| (mark.schedule_id, mark.user_id))
        .collect();

    let mut counts = vec![0u32; cell_count];
    for (schedule_id, _) in &attended {
        counts[schedule_cells[schedule_id]] += 1;
    }
    let board_times = activity
        .posts
        .iter()
        .map(|post| post.created_at)
        .chain(activity.comments.iter().map(|comment| comment.created_at))
        .filter(|at| window.contains(*at));
    for at in board_times {
        counts[cell_index(&slot_of(at, &offset))] += 1;
    }

    let max = counts.iter().copied().max().unwrap_or(0);
    let cells = counts
        .iter()
        .enumerate()
        .map(|(index, count)| {
            let slot = cell_ref(index);
            SlotCell {
                day_of_week: slot.day_of_week,
                time_slot: slot.time_slot,
                count: *count,
                intensity: intensity(*count, max),
            }
        })
        .collect();

    let busiest = (max > 0)
        .then(|| counts.iter().position(|count| *count == max))
        .flatten()
        .map(cell_ref);
    let quietest = counts
        .iter()
        .copied()
        .filter(|count| *count > 0)
        .min()
        .and_then(|min| counts.iter().position(|count| *count == min))
        .map(cell_ref);

    TimeSlotAnalysis {
        cells,
        busiest,
        quietest,
        forecasts: forecast_members(activity, &schedule_cells, &attended, cell_count),
    }
}

fn forecast_members(
    activity: &GroupActivity,
    schedule_cells: &HashMap<Uuid, usize>,
    attended: &HashSet<(Uuid, Uuid)>,
    cell_count: usize,
) -> Vec<SlotForecast> {
    let mut schedules_per_cell = vec![0usize; cell_count];
    for cell in schedule_cells.values() {
        schedules_per_cell[*cell] += 1;
    }
    let mut attended_per_cell: HashMap<(usize, Uuid), usize> = HashMap::new();
    for (schedule_id, user_id) in attended {
        *attended_per_cell
            .entry((schedule_cells[schedule_id], *user_id))
            .or_insert(0) += 1;
    }

    schedules_per_cell
        .iter()
        .enumerate()
        .filter(|(_, scheduled)| **scheduled > 0)
        .map(|(cell, scheduled)| {
            let mut members: Vec<MemberSlotForecast> = activity
                .members
                .iter()
                .map(|member| {
                    let count = attended_per_cell
                        .get(&(cell, member.user_id))
                        .copied()
                        .unwrap_or(0);
                    MemberSlotForecast {
                        user_id: member.user_id,
                        name: member.display_name.clone(),
                        probability: percent(count, *scheduled),
                        sample_count: *scheduled as u32,
                    }
                })
                .collect();
            members.sort_by(|a, b| {
                b.probability
                    .cmp(&a.probability)
                    .then_with(|| a.name.cmp(&b.name))
            });

            SlotForecast {
                slot: cell_ref(cell),
                members,
            }
        })
        .collect()
}
