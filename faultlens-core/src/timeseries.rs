use crate::window::TimeWindow;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gap filling refuses ranges longer than this many buckets.
const MAX_FILLED_BUCKETS: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint<K> {
    pub bucket: K,
    pub count: u64,
}

pub type DailySeries = Vec<SeriesPoint<NaiveDate>>;
pub type HourlySeries = Vec<SeriesPoint<NaiveDateTime>>;

/// Start of the calendar hour containing `ts`.
pub fn hour_bucket(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDateTime::new(ts.date(), NaiveTime::MIN) + Duration::hours(i64::from(ts.hour()))
}

/// Daily and hourly counters. Only buckets that received an entry exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    daily: BTreeMap<NaiveDate, u64>,
    hourly: BTreeMap<NaiveDateTime, u64>,
}

impl BucketCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ts: NaiveDateTime) {
        *self.daily.entry(ts.date()).or_insert(0) += 1;
        *self.hourly.entry(hour_bucket(ts)).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.daily.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_empty()
    }

    pub fn daily_series(&self) -> DailySeries {
        self.daily
            .iter()
            .map(|(bucket, count)| SeriesPoint { bucket: *bucket, count: *count })
            .collect()
    }

    pub fn hourly_series(&self) -> HourlySeries {
        self.hourly
            .iter()
            .map(|(bucket, count)| SeriesPoint { bucket: *bucket, count: *count })
            .collect()
    }

    /// Every day touched by the window, zeros included. `None` unless both
    /// window endpoints are known and the range is reasonably small.
    pub fn daily_series_filled(&self, window: &TimeWindow) -> Option<DailySeries> {
        let (first, last) = bounded_range(window)?;
        let (first, last) = (first.date(), last.date());
        if (last - first).num_days() >= MAX_FILLED_BUCKETS {
            return None;
        }

        let series = first
            .iter_days()
            .take_while(|day| *day <= last)
            .map(|day| SeriesPoint {
                bucket: day,
                count: self.daily.get(&day).copied().unwrap_or(0),
            })
            .collect();
        Some(series)
    }

    /// Every hour touched by the window, zeros included.
    pub fn hourly_series_filled(&self, window: &TimeWindow) -> Option<HourlySeries> {
        let (first, last) = bounded_range(window)?;
        let (first, last) = (hour_bucket(first), hour_bucket(last));
        if (last - first).num_hours() >= MAX_FILLED_BUCKETS {
            return None;
        }

        let mut series = Vec::new();
        let mut hour = first;
        while hour <= last {
            series.push(SeriesPoint {
                bucket: hour,
                count: self.hourly.get(&hour).copied().unwrap_or(0),
            });
            hour += Duration::hours(1);
        }
        Some(series)
    }
}

/// First and last instant inside a fully bounded, non-empty window.
fn bounded_range(window: &TimeWindow) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let (since, until) = (window.since?, window.until?);
    if since >= until {
        return None;
    }
    Some((since, until - Duration::nanoseconds(1)))
}
