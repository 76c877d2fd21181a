use crate::error::ConfigError;
use chrono::{Duration, Local, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static DURATION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+\s*[wdhms]\s*)+$").expect("Failed to compile duration shape regex")
});

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*([wdhms])").expect("Failed to compile duration part regex")
});

// A century is far beyond any log retention we will ever scan.
const MAX_RELATIVE_SECONDS: i64 = 100 * 365 * 24 * 3600;

/// Parse a relative duration such as `24h`, `2d6h`, `1w2d`, `3h30m`,
/// `48h15m10s`, `0h` or `now`.
pub fn parse_relative_duration(expr: &str, option: &'static str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        option,
        expr: expr.to_string(),
    };

    let normalized = expr.trim().to_lowercase();
    if matches!(normalized.as_str(), "now" | "0") {
        return Ok(Duration::zero());
    }
    if !DURATION_SHAPE.is_match(&normalized) {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    for caps in DURATION_PART.captures_iter(&normalized) {
        let value: i64 = caps[1].parse().map_err(|_| invalid())?;
        let unit_seconds = match &caps[2] {
            "w" => 7 * 24 * 3600,
            "d" => 24 * 3600,
            "h" => 3600,
            "m" => 60,
            _ => 1,
        };
        total = value
            .checked_mul(unit_seconds)
            .and_then(|secs| total.checked_add(secs))
            .filter(|secs| *secs <= MAX_RELATIVE_SECONDS)
            .ok_or_else(invalid)?;
    }

    Ok(Duration::seconds(total))
}

/// Half-open analysis interval `[since, until)` in the naive wall clock of
/// the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
}

impl TimeWindow {
    /// A window that admits everything, including records without a timestamp.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(since: Option<NaiveDateTime>, until: Option<NaiveDateTime>) -> Self {
        Self { since, until }
    }

    /// Resolve relative `since`/`until` expressions against `now`, once.
    pub fn resolve(
        since: Option<&str>,
        until: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Self, ConfigError> {
        let since = since
            .map(|expr| parse_relative_duration(expr, "since").map(|d| now - d))
            .transpose()?;
        let until = until
            .map(|expr| parse_relative_duration(expr, "until").map(|d| now - d))
            .transpose()?;

        if let (Some(s), Some(u)) = (since, until) {
            if s > u {
                return Err(ConfigError::InvertedWindow {
                    since: s.to_string(),
                    until: u.to_string(),
                });
            }
        }

        Ok(Self { since, until })
    }

    /// Resolve against the process clock.
    pub fn resolve_now(since: Option<&str>, until: Option<&str>) -> Result<Self, ConfigError> {
        Self::resolve(since, until, Local::now().naive_local())
    }

    pub fn is_active(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.since.map_or(true, |since| since <= ts) && self.until.map_or(true, |until| ts < until)
    }

    /// Untimed records only pass when no window is active.
    pub fn admits(&self, ts: Option<NaiveDateTime>) -> bool {
        match ts {
            Some(ts) => self.contains(ts),
            None => !self.is_active(),
        }
    }

    pub fn filter<T: HasTimestamp>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| self.admits(item.timestamp()))
            .collect()
    }
}

/// Anything the window can be applied to.
pub trait HasTimestamp {
    fn timestamp(&self) -> Option<NaiveDateTime>;
}
