//! FaultLens core: consolidates WARN/ERROR/FATAL log entries into error
//! families with counts, examples and daily/hourly time series.

pub mod aggregator;
pub mod analyzer;
pub mod assembler;
pub mod config;
pub mod error;
pub mod input;
pub mod metadata;
pub mod normalizer;
pub mod parser;
pub mod report;
pub mod timeseries;
pub mod window;

pub use aggregator::{AggregationResult, Family, FamilyAggregator, FilteredEntry};
pub use analyzer::{AnalysisOutcome, Analyzer, CancellationToken, FileOutcome};
pub use assembler::{LogRecord, RecordAssembler};
pub use config::{AnalyzerConfig, NormalizerKind};
pub use error::{ConfigError, FaultLensError, InputError, Result};
pub use metadata::{RunMetadata, RunWarning};
pub use normalizer::{KnownFamily, KnownFamilyNormalizer, Normalized, Normalizer, RuleSetNormalizer, RuleSpec};
pub use parser::SeverityVocabulary;
pub use report::{ExampleReport, FamilyReport, ReportData};
pub use timeseries::{BucketCounts, DailySeries, HourlySeries, SeriesPoint};
pub use window::{parse_relative_duration, TimeWindow};
