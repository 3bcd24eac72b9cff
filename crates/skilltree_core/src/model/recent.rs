//! Day-by-day activity summary over a trailing window.
//!
//! # Invariants
//! - Days are UTC calendar days.
//! - The window holds `days` days and ends on (and includes) `today`.
//! - The streak counts consecutive active days ending today. A quiet today
//!   does not break it yet: counting then starts from yesterday.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest window a caller may ask for.
pub const MAX_RECENT_DAYS: u32 = 365;
/// Window used when the caller does not pick one.
pub const DEFAULT_RECENT_DAYS: u32 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub streak: u32,
    /// Only days with at least one activity appear.
    pub daily_activity_counts: BTreeMap<NaiveDate, u32>,
}

impl RecentActivity {
    /// Buckets activity creation times (epoch ms) into the window ending on
    /// `today`; times outside the window are ignored.
    pub fn summarize(created_at: impl IntoIterator<Item = i64>, today: NaiveDate, days: u32) -> Self {
        let start = window_start(today, days);
        let mut daily_activity_counts = BTreeMap::new();
        for day in created_at.into_iter().filter_map(day_of) {
            if day >= start && day <= today {
                *daily_activity_counts.entry(day).or_insert(0) += 1;
            }
        }

        let active = |day: &NaiveDate| daily_activity_counts.contains_key(day);
        let mut cursor = if active(&today) {
            Some(today)
        } else {
            today.pred_opt()
        };
        let mut streak = 0;
        while let Some(day) = cursor.filter(|day| *day >= start && active(day)) {
            streak += 1;
            cursor = day.pred_opt();
        }

        Self {
            streak,
            daily_activity_counts,
        }
    }
}

/// First day of a `days`-long window ending on `today`.
pub fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
    let back = TimeDelta::days(i64::from(days.max(1)) - 1);
    today.checked_sub_signed(back).unwrap_or(NaiveDate::MIN)
}

/// UTC calendar day of an epoch-millisecond timestamp.
pub fn day_of(epoch_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(epoch_ms).map(|at| at.date_naive())
}

/// Epoch milliseconds of `day` at 00:00 UTC.
pub fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}
