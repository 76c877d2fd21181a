use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A condition the run recovered from. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Lines with bytes that were not valid in the detected encoding.
    Decode {
        path: PathBuf,
        lines_undecodable: usize,
        lines_recoded: usize,
    },
    /// File cut at the size cap; entries past `bytes_read` are absent.
    SizeLimit {
        path: PathBuf,
        file_size: u64,
        bytes_read: u64,
    },
    Unreadable { path: PathBuf, reason: String },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::Decode {
                path,
                lines_undecodable,
                lines_recoded,
            } => write!(
                f,
                "{}: {} undecodable line(s), {} recoded line(s)",
                path.display(),
                lines_undecodable,
                lines_recoded
            ),
            RunWarning::SizeLimit {
                path,
                file_size,
                bytes_read,
            } => write!(
                f,
                "{}: truncated to {} of {} bytes",
                path.display(),
                bytes_read,
                file_size
            ),
            RunWarning::Unreadable { path, reason } => {
                write!(f, "{}: unreadable ({})", path.display(), reason)
            }
        }
    }
}

/// Counters threaded through one run. Per-file instances are folded into
/// the run total with [`RunMetadata::absorb`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub files_scanned: usize,
    pub files_truncated: usize,
    pub files_unreadable: usize,
    pub bytes_read: u64,
    pub lines_read: usize,
    pub lines_undecodable: usize,
    pub lines_recoded: usize,
    pub records_assembled: usize,
    pub records_skipped_severity: usize,
    pub records_missing_timestamp: usize,
    pub records_outside_window: usize,
    pub entries_accepted: usize,
    pub elapsed_ms: u64,
    pub aborted: bool,
    pub normalizer: String,
    pub warnings: Vec<RunWarning>,
}

impl RunMetadata {
    pub fn new(normalizer: impl Into<String>) -> Self {
        Self {
            normalizer: normalizer.into(),
            ..Self::default()
        }
    }

    pub fn warn(&mut self, warning: RunWarning) {
        match &warning {
            RunWarning::SizeLimit { .. } => self.files_truncated += 1,
            RunWarning::Unreadable { .. } => self.files_unreadable += 1,
            RunWarning::Decode { .. } => {}
        }
        self.warnings.push(warning);
    }

    /// Adds another partial's counters and warnings. `elapsed_ms` and the
    /// normalizer name belong to the run and are left untouched.
    pub fn absorb(&mut self, other: RunMetadata) {
        self.files_scanned += other.files_scanned;
        self.files_truncated += other.files_truncated;
        self.files_unreadable += other.files_unreadable;
        self.bytes_read += other.bytes_read;
        self.lines_read += other.lines_read;
        self.lines_undecodable += other.lines_undecodable;
        self.lines_recoded += other.lines_recoded;
        self.records_assembled += other.records_assembled;
        self.records_skipped_severity += other.records_skipped_severity;
        self.records_missing_timestamp += other.records_missing_timestamp;
        self.records_outside_window += other.records_outside_window;
        self.entries_accepted += other.entries_accepted;
        self.aborted |= other.aborted;
        self.warnings.extend(other.warnings);
    }

    /// Records dropped for any reason after assembly.
    pub fn records_rejected(&self) -> usize {
        self.records_skipped_severity + self.records_missing_timestamp + self.records_outside_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_updates_file_counters() {
        let mut metadata = RunMetadata::new("default");
        metadata.warn(RunWarning::SizeLimit {
            path: PathBuf::from("big.log"),
            file_size: 10,
            bytes_read: 5,
        });
        metadata.warn(RunWarning::Unreadable {
            path: PathBuf::from("gone.log"),
            reason: "permission denied".to_string(),
        });
        metadata.warn(RunWarning::Decode {
            path: PathBuf::from("bad.log"),
            lines_undecodable: 2,
            lines_recoded: 0,
        });

        assert_eq!(metadata.files_truncated, 1);
        assert_eq!(metadata.files_unreadable, 1);
        assert_eq!(metadata.warnings.len(), 3);
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut total = RunMetadata::new("default");
        let mut part = RunMetadata::default();
        part.files_scanned = 1;
        part.lines_read = 10;
        part.records_assembled = 4;
        part.records_skipped_severity = 1;
        part.records_outside_window = 1;
        part.entries_accepted = 2;
        part.aborted = true;

        total.absorb(part.clone());
        total.absorb(part);

        assert_eq!(total.files_scanned, 2);
        assert_eq!(total.lines_read, 20);
        assert_eq!(total.entries_accepted, 4);
        assert_eq!(total.records_rejected(), 4);
        assert!(total.aborted);
        assert_eq!(total.normalizer, "default");
    }

    #[test]
    fn test_warning_display() {
        let warning = RunWarning::SizeLimit {
            path: PathBuf::from("big.log"),
            file_size: 2048,
            bytes_read: 1024,
        };
        assert_eq!(warning.to_string(), "big.log: truncated to 1024 of 2048 bytes");
    }
}
