use crate::aggregator::{AggregationResult, Family};
use crate::analyzer::AnalysisOutcome;
use crate::assembler::LogRecord;
use crate::metadata::RunMetadata;
use crate::timeseries::{DailySeries, HourlySeries};
use crate::window::TimeWindow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The shape renderers consume. Built from a finished run; owns its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub window: TimeWindow,
    pub total_entries: u64,
    pub families: Vec<FamilyReport>,
    pub overall_daily: DailySeries,
    pub overall_hourly: HourlySeries,
    /// Zero-filled between the window endpoints; absent for open windows.
    pub overall_daily_filled: Option<DailySeries>,
    pub overall_hourly_filled: Option<HourlySeries>,
    pub files: Vec<PathBuf>,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyReport {
    /// 1-based position in the frequency ranking.
    pub rank: usize,
    pub signature: String,
    pub label: String,
    pub count: u64,
    /// Percentage of all accepted entries.
    pub share: f64,
    pub first_seen: Option<NaiveDateTime>,
    pub last_seen: Option<NaiveDateTime>,
    pub examples: Vec<ExampleReport>,
    pub daily: DailySeries,
    pub hourly: HourlySeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleReport {
    pub timestamp: Option<NaiveDateTime>,
    pub source_file: PathBuf,
    pub line_start: usize,
    pub severity: Option<String>,
    pub text: String,
}

impl From<&LogRecord> for ExampleReport {
    fn from(record: &LogRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            source_file: record.source_file.clone(),
            line_start: record.line_start,
            severity: record.severity.clone(),
            text: record.raw_text.clone(),
        }
    }
}

impl FamilyReport {
    fn project(rank: usize, family: &Family, total_entries: u64) -> Self {
        let share = if total_entries == 0 {
            0.0
        } else {
            family.count as f64 * 100.0 / total_entries as f64
        };

        Self {
            rank,
            signature: family.signature.clone(),
            label: family.label.clone(),
            count: family.count,
            share,
            first_seen: family.first_seen,
            last_seen: family.last_seen,
            examples: family.examples.iter().map(ExampleReport::from).collect(),
            daily: family.daily_series(),
            hourly: family.hourly_series(),
        }
    }
}

impl ReportData {
    pub fn from_outcome(outcome: &AnalysisOutcome) -> Self {
        Self::from_parts(&outcome.result, &outcome.metadata, &outcome.files)
    }

    pub fn from_parts(result: &AggregationResult, metadata: &RunMetadata, files: &[PathBuf]) -> Self {
        let families = result
            .families
            .iter()
            .enumerate()
            .map(|(idx, family)| FamilyReport::project(idx + 1, family, result.total_entries))
            .collect();

        Self {
            window: result.window,
            total_entries: result.total_entries,
            families,
            overall_daily: result.overall_daily(),
            overall_hourly: result.overall_hourly(),
            overall_daily_filled: result.overall.daily_series_filled(&result.window),
            overall_hourly_filled: result.overall.hourly_series_filled(&result.window),
            files: files.to_vec(),
            metadata: metadata.clone(),
        }
    }

    /// The `n` most frequent families.
    pub fn top(&self, n: usize) -> &[FamilyReport] {
        &self.families[..n.min(self.families.len())]
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
