use crate::assembler::LogRecord;
use crate::normalizer::Normalized;
use crate::timeseries::{BucketCounts, DailySeries, HourlySeries};
use crate::window::{HasTimestamp, TimeWindow};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record that passed the severity and window checks, with its family key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredEntry {
    pub record: LogRecord,
    pub signature: String,
    pub label: String,
}

impl FilteredEntry {
    pub fn new(record: LogRecord, normalized: Normalized) -> Self {
        Self {
            record,
            signature: normalized.signature,
            label: normalized.label,
        }
    }
}

impl HasTimestamp for FilteredEntry {
    fn timestamp(&self) -> Option<NaiveDateTime> {
        self.record.timestamp
    }
}

/// All entries sharing one signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub signature: String,
    pub label: String,
    pub count: u64,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    /// Entries without a timestamp; counted, but absent from the buckets.
    pub untimed: u64,
    pub examples: Vec<LogRecord>,
    pub buckets: BucketCounts,
}

impl Family {
    fn new(signature: String, label: String) -> Self {
        Self {
            signature,
            label,
            count: 0,
            first_seen: None,
            last_seen: None,
            untimed: 0,
            examples: Vec::new(),
            buckets: BucketCounts::new(),
        }
    }

    pub fn daily_series(&self) -> DailySeries {
        self.buckets.daily_series()
    }

    pub fn hourly_series(&self) -> HourlySeries {
        self.buckets.hourly_series()
    }
}

/// Final, read-only aggregation of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Most frequent first; equal counts ordered by signature.
    pub families: Vec<Family>,
    pub overall: BucketCounts,
    pub total_entries: u64,
    pub window: TimeWindow,
}

impl AggregationResult {
    pub fn overall_daily(&self) -> DailySeries {
        self.overall.daily_series()
    }

    pub fn overall_hourly(&self) -> HourlySeries {
        self.overall.hourly_series()
    }

    pub fn family(&self, signature: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.signature == signature)
    }
}

/// Accumulates [`FilteredEntry`]s into families. Single owner, no locking;
/// parallel runs feed it from one reducing thread.
#[derive(Debug)]
pub struct FamilyAggregator {
    max_examples: usize,
    window: TimeWindow,
    families: HashMap<String, Family>,
    overall: BucketCounts,
    total_entries: u64,
}

impl FamilyAggregator {
    pub fn new(max_examples: usize, window: TimeWindow) -> Self {
        Self {
            max_examples,
            window,
            families: HashMap::new(),
            overall: BucketCounts::new(),
            total_entries: 0,
        }
    }

    pub fn observe(&mut self, entry: FilteredEntry) {
        let FilteredEntry { record, signature, label } = entry;
        let family = self
            .families
            .entry(signature)
            .or_insert_with_key(|signature| Family::new(signature.clone(), label));

        family.count += 1;
        self.total_entries += 1;

        match record.timestamp {
            Some(ts) => {
                family.first_seen = Some(family.first_seen.map_or(ts, |seen| seen.min(ts)));
                family.last_seen = Some(family.last_seen.map_or(ts, |seen| seen.max(ts)));
                family.buckets.record(ts);
                self.overall.record(ts);
            }
            None => family.untimed += 1,
        }

        if family.examples.len() < self.max_examples {
            family.examples.push(record);
        }
    }

    pub fn observe_all<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = FilteredEntry>,
    {
        for entry in entries {
            self.observe(entry);
        }
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    pub fn finalize(self) -> AggregationResult {
        let mut families: Vec<Family> = self.families.into_values().collect();
        families.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));

        AggregationResult {
            families,
            overall: self.overall,
            total_entries: self.total_entries,
            window: self.window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{Normalizer, RuleSetNormalizer};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn entry(message: &str, timestamp: Option<NaiveDateTime>) -> FilteredEntry {
        let record = LogRecord {
            source_file: PathBuf::from("app.log"),
            line_start: 1,
            raw_text: message.to_string(),
            timestamp,
            severity: Some("ERROR".to_string()),
            message: message.to_string(),
        };
        let normalized = RuleSetNormalizer::standard(512, 140).normalize(message);
        FilteredEntry::new(record, normalized)
    }

    #[test]
    fn test_equivalent_messages_share_a_family() {
        let mut aggregator = FamilyAggregator::new(3, TimeWindow::unbounded());
        aggregator.observe(entry("conn id=123 failed", Some(at("2025-01-01 00:00:00"))));
        aggregator.observe(entry("conn id=456 failed", Some(at("2025-01-01 00:00:00"))));

        let result = aggregator.finalize();

        assert_eq!(result.families.len(), 1);
        assert_eq!(result.families[0].count, 2);
        assert_eq!(result.total_entries, 2);
        assert_eq!(result.families[0].examples.len(), 2);
    }

    #[test]
    fn test_first_and_last_seen_track_extremes() {
        let mut aggregator = FamilyAggregator::new(3, TimeWindow::unbounded());
        aggregator.observe(entry("disk full", Some(at("2025-01-02 10:00:00"))));
        aggregator.observe(entry("disk full", Some(at("2025-01-01 09:00:00"))));
        aggregator.observe(entry("disk full", Some(at("2025-01-03 08:00:00"))));

        let family = &aggregator.finalize().families[0];

        assert_eq!(family.first_seen, Some(at("2025-01-01 09:00:00")));
        assert_eq!(family.last_seen, Some(at("2025-01-03 08:00:00")));
        assert_eq!(family.daily_series().len(), 3);
    }

    #[test]
    fn test_examples_keep_first_k() {
        let mut aggregator = FamilyAggregator::new(2, TimeWindow::unbounded());
        for i in 0..5 {
            let ts = at("2025-01-01 00:00:00") + chrono::Duration::minutes(i);
            aggregator.observe(entry(&format!("timeout after {i} ms"), Some(ts)));
        }

        let family = &aggregator.finalize().families[0];

        assert_eq!(family.count, 5);
        assert_eq!(family.examples.len(), 2);
        assert_eq!(family.examples[0].raw_text, "timeout after 0 ms");
        assert_eq!(family.examples[1].raw_text, "timeout after 1 ms");
    }

    #[test]
    fn test_untimed_entries_count_but_skip_buckets() {
        let mut aggregator = FamilyAggregator::new(3, TimeWindow::unbounded());
        aggregator.observe(entry("orphan failure", None));
        aggregator.observe(entry("orphan failure", Some(at("2025-01-01 00:00:00"))));

        let result = aggregator.finalize();
        let family = &result.families[0];

        assert_eq!(family.count, 2);
        assert_eq!(family.untimed, 1);
        assert_eq!(family.buckets.total() + family.untimed, family.count);
        assert_eq!(result.overall.total(), 1);
    }

    #[test]
    fn test_ties_break_on_signature() {
        let mut aggregator = FamilyAggregator::new(3, TimeWindow::unbounded());
        aggregator.observe(entry("zeta broke", None));
        aggregator.observe(entry("alpha broke", None));
        aggregator.observe(entry("mid broke", None));
        aggregator.observe(entry("mid broke", None));

        let signatures: Vec<String> = aggregator
            .finalize()
            .families
            .into_iter()
            .map(|f| f.signature)
            .collect();

        assert_eq!(signatures, vec!["mid broke", "alpha broke", "zeta broke"]);
    }

    proptest! {
        #[test]
        fn prop_counts_caps_and_ordering(
            picks in proptest::collection::vec((0usize..6, 0i64..72), 0..200),
            cap in 0usize..5,
        ) {
            let messages = ["a failed", "b failed", "c failed", "d failed", "e failed", "f failed"];
            let base = at("2025-01-01 00:00:00");
            let mut aggregator = FamilyAggregator::new(cap, TimeWindow::unbounded());
            for (family, hours) in &picks {
                aggregator.observe(entry(messages[*family], Some(base + chrono::Duration::hours(*hours))));
            }

            let result = aggregator.finalize();

            let sum: u64 = result.families.iter().map(|f| f.count).sum();
            prop_assert_eq!(sum, result.total_entries);
            prop_assert_eq!(result.total_entries, picks.len() as u64);
            prop_assert_eq!(result.overall.total(), result.total_entries);

            for family in &result.families {
                prop_assert!(family.examples.len() <= cap);
                prop_assert_eq!(family.buckets.total(), family.count);
                prop_assert!(family.first_seen <= family.last_seen);
            }

            for pair in result.families.windows(2) {
                let ordered = pair[0].count > pair[1].count
                    || (pair[0].count == pair[1].count && pair[0].signature < pair[1].signature);
                prop_assert!(ordered);
            }
        }
    }
}
