use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

// Compile regexes once at startup for performance
static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("Failed to compile ANSI regex"));

static RECORD_START_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{4}-\d{2}-\d{2}|\[\d{4}-\d{2}-\d{2}|\[\d{1,2}/\d{1,2}/\d{2,4}\s)")
        .expect("Failed to compile record start regex")
});

static ISO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?(?:Z|[+-]\d{2}:?\d{2})?",
    )
    .expect("Failed to compile ISO timestamp regex")
});

static BRACKET_ISO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?[^\]]*\]")
        .expect("Failed to compile bracketed ISO timestamp regex")
});

static BRACKET_US_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{1,2})/(\d{1,2})/(\d{2,4}) (\d{1,2}):(\d{2}):(\d{2})(?::(\d{1,3}))?[^\]]*\]")
        .expect("Failed to compile bracketed US timestamp regex")
});

/// Level words recognised as a severity token, whether or not the run
/// analyzes them. Finding one of these that is outside the configured
/// vocabulary is what excludes INFO/DEBUG records.
const KNOWN_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "FINEST", "FINER", "FINE", "CONFIG", "INFO", "INFORMATION", "NOTICE",
    "AUDIT", "WARN", "WARNING", "ERROR", "ERR", "SEVERE", "CRIT", "CRITICAL", "FATAL",
];

/// Severity search gives up after this many leading tokens of the header
/// line; Liberty layouts put the level fifth.
const MAX_SEVERITY_TOKENS: usize = 6;

/// One-letter event types written by WebSphere-style `[M/D/YY ...]` logs.
const SHORT_LEVEL_CODES: &[(&str, &str)] = &[
    ("F", "FATAL"),
    ("E", "ERROR"),
    ("W", "WARNING"),
    ("A", "AUDIT"),
    ("I", "INFO"),
    ("O", "INFO"),
    ("C", "CONFIG"),
    ("D", "DEBUG"),
];

pub const DEFAULT_SEVERITY_LEVELS: &[&str] = &["ERROR", "WARN", "WARNING", "FATAL", "SEVERE"];

/// The timestamp layouts tried by [`parse_timestamp`], in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// `2025-01-01T10:00:00.123`, `2025-01-01 10:00:00,123`, optional zone suffix.
    Iso,
    /// `[2025-01-01 10:00:00.123 ...]`
    BracketedIso,
    /// `[1/15/25 10:00:00:123 CET]`
    BracketedUs,
}

/// What the extractor found at the head of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub timestamp: Option<NaiveDateTime>,
    pub severity: Option<String>,
    /// Header line text after the timestamp and severity prefix.
    pub message: String,
}

/// Severity vocabulary the run analyzes. Everything else is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityVocabulary {
    levels: BTreeSet<String>,
}

impl SeverityVocabulary {
    pub fn new<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            levels: levels
                .into_iter()
                .map(|l| l.as_ref().trim().to_uppercase())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, level: &str) -> bool {
        self.levels.contains(level)
    }

    fn recognises(&self, token: &str) -> bool {
        KNOWN_LEVELS.contains(&token) || self.levels.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(String::as_str)
    }
}

impl Default for SeverityVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_SEVERITY_LEVELS)
    }
}

/// Strip ANSI escape codes from a string
/// Examples: "\x1b[31mERROR\x1b[0;39m" -> "ERROR"
pub fn strip_ansi_codes(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_REGEX.replace_all(text, "")
}

/// A physical line opens a new record when it starts with a recognisable
/// date prefix. Everything else is a continuation line.
pub fn is_record_start(line: &str) -> bool {
    RECORD_START_REGEX.is_match(&strip_ansi_codes(line))
}

/// Parse the leading timestamp of a line. Returns the timestamp, the format
/// that matched and the byte length of the consumed prefix.
pub fn parse_timestamp(line: &str) -> Option<(NaiveDateTime, TimestampFormat, usize)> {
    let formats: [(&Regex, TimestampFormat); 3] = [
        (&ISO_REGEX, TimestampFormat::Iso),
        (&BRACKET_ISO_REGEX, TimestampFormat::BracketedIso),
        (&BRACKET_US_REGEX, TimestampFormat::BracketedUs),
    ];

    for (regex, format) in formats {
        let Some(caps) = regex.captures(line) else {
            continue;
        };
        let end = caps.get(0).map_or(0, |m| m.end());
        let parsed = match format {
            TimestampFormat::Iso | TimestampFormat::BracketedIso => from_iso_captures(&caps),
            TimestampFormat::BracketedUs => from_us_captures(&caps),
        };
        // A prefix that looks right but holds an impossible date (month 13)
        // yields no timestamp rather than falling through to a later format.
        return parsed.map(|ts| (ts, format, end));
    }

    None
}

fn number(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn fraction_nanos(digits: Option<&str>) -> u32 {
    match digits {
        Some(d) => {
            let padded = format!("{:0<9}", d);
            padded[..9].parse().unwrap_or(0)
        }
        None => 0,
    }
}

fn from_iso_captures(caps: &Captures<'_>) -> Option<NaiveDateTime> {
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, number(caps, 2)?, number(caps, 3)?)?;
    let nanos = fraction_nanos(caps.get(7).map(|m| m.as_str()));
    date.and_hms_nano_opt(number(caps, 4)?, number(caps, 5)?, number(caps, 6)?, nanos)
}

fn from_us_captures(caps: &Captures<'_>) -> Option<NaiveDateTime> {
    let raw_year: i32 = caps.get(3)?.as_str().parse().ok()?;
    let year = if raw_year < 100 { 2000 + raw_year } else { raw_year };
    let date = NaiveDate::from_ymd_opt(year, number(caps, 1)?, number(caps, 2)?)?;
    let millis = number(caps, 7).unwrap_or(0);
    date.and_hms_milli_opt(number(caps, 4)?, number(caps, 5)?, number(caps, 6)?, millis)
}

/// Extract `(timestamp, severity, message)` from the first line of a record.
///
/// Severity is the first recognised level word among the leading tokens after
/// the timestamp. It must be written in capitals unless it is wrapped in
/// brackets or parentheses, so prose like "an error occurred" never counts.
pub fn parse_header(line: &str, vocabulary: &SeverityVocabulary) -> Header {
    let clean = strip_ansi_codes(line);
    let (timestamp, format, rest) = match parse_timestamp(&clean) {
        Some((ts, format, end)) => (Some(ts), Some(format), &clean[end..]),
        None => match RECORD_START_REGEX.find(&clean) {
            // Date-like prefix without a usable time still has to be skipped.
            Some(_) => (None, None, skip_first_token(&clean)),
            None => (None, None, &clean[..]),
        },
    };
    let short_codes = format == Some(TimestampFormat::BracketedUs);

    let mut cursor = rest;
    for _ in 0..MAX_SEVERITY_TOKENS {
        let trimmed = cursor.trim_start();
        if trimmed.is_empty() {
            break;
        }
        let token_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let token = &trimmed[..token_end];
        let after = &trimmed[token_end..];

        let level = if short_codes {
            short_level(token).or_else(|| level_from_token(token, vocabulary))
        } else {
            level_from_token(token, vocabulary)
        };
        if let Some(level) = level {
            return Header {
                timestamp,
                severity: Some(level),
                message: clean_message(after),
            };
        }
        cursor = after;
    }

    Header {
        timestamp,
        severity: None,
        message: clean_message(rest),
    }
}

fn skip_first_token(text: &str) -> &str {
    match text.find(char::is_whitespace) {
        Some(idx) => &text[idx..],
        None => "",
    }
}

fn short_level(token: &str) -> Option<String> {
    SHORT_LEVEL_CODES
        .iter()
        .find(|(code, _)| *code == token)
        .map(|(_, level)| level.to_string())
}

fn level_from_token(token: &str, vocabulary: &SeverityVocabulary) -> Option<String> {
    let bracketed = (token.starts_with('[') && token.trim_end_matches(':').ends_with(']'))
        || (token.starts_with('(') && token.trim_end_matches(':').ends_with(')'));
    let word = token.trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | ':' | '|' | '<' | '>'));
    if word.is_empty() {
        return None;
    }

    let upper = word.to_uppercase();
    if !bracketed && word != upper {
        return None;
    }
    vocabulary.recognises(&upper).then_some(upper)
}

fn clean_message(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix(": "))
        .unwrap_or(trimmed);
    trimmed.trim().to_string()
}
