//! Pipeline driver.
//!
//! Each file goes through read → assemble → severity check → window check →
//! normalize on its own, producing a [`FileOutcome`]. Outcomes are folded into
//! one [`FamilyAggregator`] on the calling thread, in file order, whether the
//! map step ran sequentially or on the worker pool.

use crate::aggregator::{AggregationResult, FamilyAggregator, FilteredEntry};
use crate::assembler::RecordAssembler;
use crate::config::AnalyzerConfig;
use crate::error::{ConfigError, Result};
use crate::input::{discover_files, read_log_file, ReadOptions};
use crate::metadata::{RunMetadata, RunWarning};
use crate::normalizer::Normalizer;
use crate::parser::SeverityVocabulary;
use crate::window::TimeWindow;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Records between two cancellation checks inside one file.
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Cooperative stop flag shared between the caller and a running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a run produced. Still complete when the run was aborted.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AggregationResult,
    pub metadata: RunMetadata,
    pub files: Vec<PathBuf>,
}

/// Per-file map result: accepted entries plus that file's counters.
#[derive(Debug, Default)]
pub struct FileOutcome {
    pub entries: Vec<FilteredEntry>,
    pub metadata: RunMetadata,
}

pub struct Analyzer {
    config: AnalyzerConfig,
    window: TimeWindow,
    vocabulary: SeverityVocabulary,
    read_options: ReadOptions,
    normalizer: Arc<dyn Normalizer>,
    cancel: CancellationToken,
}

impl Analyzer {
    /// Validate `config` and resolve its window against the process clock.
    pub fn new(config: AnalyzerConfig) -> Result<Self, ConfigError> {
        Self::at(config, chrono::Local::now().naive_local())
    }

    /// Same as [`Analyzer::new`] with an explicit "now".
    pub fn at(config: AnalyzerConfig, now: NaiveDateTime) -> Result<Self, ConfigError> {
        let window = config.resolve_window(now)?;
        Self::with_window(config, window)
    }

    /// Use an already resolved window instead of the relative expressions.
    /// The rest of `config` is validated as in [`Analyzer::new`].
    pub fn with_window(config: AnalyzerConfig, window: TimeWindow) -> Result<Self, ConfigError> {
        config.validate_options()?;
        let read_options = config.read_options()?;
        let normalizer = config.build_normalizer()?;
        let vocabulary = config.vocabulary();
        debug!(
            "Analyzer ready: window {:?}..{:?}, normalizer '{}', {} worker(s)",
            window.since,
            window.until,
            normalizer.name(),
            config.effective_workers()
        );

        Ok(Self {
            config,
            window,
            vocabulary,
            read_options,
            normalizer,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the configured canonicalization policy.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Discover files under `dir` with the configured pattern and analyze them.
    pub fn analyze_dir(&self, dir: &Path) -> Result<AnalysisOutcome> {
        let files = discover_files(dir, &self.config.file_pattern)?;
        Ok(self.analyze_files(files))
    }

    /// Analyze an explicit file list. Never fails: unreadable files become
    /// warnings in the returned metadata.
    pub fn analyze_files(&self, files: Vec<PathBuf>) -> AnalysisOutcome {
        let started = Instant::now();
        let mut aggregator = FamilyAggregator::new(self.config.max_examples_per_family, self.window);
        let mut metadata = RunMetadata::new(self.normalizer.name());
        let mut folded = 0usize;

        {
            let mut reduce = |outcome: FileOutcome| {
                aggregator.observe_all(outcome.entries);
                metadata.absorb(outcome.metadata);
                folded += 1;
            };

            let workers = self.config.effective_workers().min(files.len());
            if workers > 1 {
                info!("Processing {} files on {} workers", files.len(), workers);
                self.map_parallel(&files, workers, &mut reduce);
            } else {
                self.map_sequential(&files, &mut reduce);
            }
        }

        if folded < files.len() {
            metadata.aborted = true;
        }
        metadata.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if metadata.aborted {
            warn!("Analysis cancelled after {} of {} files", folded, files.len());
        }
        info!(
            "Analyzed {} files ({} lines): {} entries in {} families, {} warnings, {} ms",
            metadata.files_scanned,
            metadata.lines_read,
            aggregator.total_entries(),
            aggregator.family_count(),
            metadata.warnings.len(),
            metadata.elapsed_ms
        );

        AnalysisOutcome {
            result: aggregator.finalize(),
            metadata,
            files,
        }
    }

    fn map_sequential(&self, files: &[PathBuf], reduce: &mut impl FnMut(FileOutcome)) {
        for path in files {
            if self.cancel.is_cancelled() {
                break;
            }
            reduce(self.process_file(path));
        }
    }

    /// Fixed pool pulling file indices from a shared counter. Results are
    /// reordered by index before reduction so output matches a sequential run.
    fn map_parallel(&self, files: &[PathBuf], workers: usize, reduce: &mut impl FnMut(FileOutcome)) {
        let next_file = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, FileOutcome)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let next_file = &next_file;
                scope.spawn(move || loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let index = next_file.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = files.get(index) else {
                        break;
                    };
                    debug!("Worker {} took {}", worker, path.display());
                    if tx.send((index, self.process_file(path))).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            let mut pending = BTreeMap::new();
            let mut next_to_fold = 0usize;
            for (index, outcome) in rx {
                pending.insert(index, outcome);
                while let Some(outcome) = pending.remove(&next_to_fold) {
                    reduce(outcome);
                    next_to_fold += 1;
                }
            }
            // Gaps only exist after cancellation; keep what arrived.
            for outcome in pending.into_values() {
                reduce(outcome);
            }
        });
    }

    /// Run the whole per-file pipeline. Touches no shared state.
    pub fn process_file(&self, path: &Path) -> FileOutcome {
        let mut metadata = RunMetadata::default();

        let loaded = match read_log_file(path, &self.read_options) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", path.display(), e);
                metadata.warn(RunWarning::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                return FileOutcome {
                    entries: Vec::new(),
                    metadata,
                };
            }
        };

        metadata.files_scanned = 1;
        metadata.bytes_read = loaded.bytes_read;
        metadata.lines_undecodable = loaded.lines_undecodable;
        metadata.lines_recoded = loaded.lines_recoded;
        if loaded.truncated {
            metadata.warn(RunWarning::SizeLimit {
                path: loaded.path.clone(),
                file_size: loaded.file_size,
                bytes_read: loaded.bytes_read,
            });
        }
        if loaded.lines_undecodable > 0 || loaded.lines_recoded > 0 {
            metadata.warn(RunWarning::Decode {
                path: loaded.path.clone(),
                lines_undecodable: loaded.lines_undecodable,
                lines_recoded: loaded.lines_recoded,
            });
        }

        let mut entries = Vec::new();
        let mut assembler = RecordAssembler::new(path, &loaded.text, &self.vocabulary);
        for (n, record) in assembler.by_ref().enumerate() {
            if n % CANCEL_CHECK_INTERVAL == 0 && self.cancel.is_cancelled() {
                metadata.aborted = true;
                break;
            }
            metadata.records_assembled += 1;

            let wanted = record
                .severity
                .as_deref()
                .is_some_and(|level| self.vocabulary.contains(level));
            if !wanted {
                metadata.records_skipped_severity += 1;
                continue;
            }

            if !self.window.admits(record.timestamp) {
                if record.timestamp.is_some() {
                    metadata.records_outside_window += 1;
                } else {
                    metadata.records_missing_timestamp += 1;
                }
                continue;
            }

            let normalized = self.normalizer.normalize(&record.message);
            entries.push(FilteredEntry::new(record, normalized));
        }
        metadata.lines_read = assembler.physical_lines();
        metadata.entries_accepted = entries.len();

        debug!(
            "{}: {} lines, {} records, {} accepted ({})",
            path.display(),
            metadata.lines_read,
            metadata.records_assembled,
            metadata.entries_accepted,
            loaded.encoding
        );

        FileOutcome { entries, metadata }
    }
}
