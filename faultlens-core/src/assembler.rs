use crate::parser::{is_record_start, parse_header, SeverityVocabulary};
use crate::window::HasTimestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::iter::Enumerate;
use std::path::{Path, PathBuf};
use std::str::Lines;

/// One logical log entry, possibly spanning several physical lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source_file: PathBuf,
    /// 1-based line number of the record's first physical line.
    pub line_start: usize,
    pub raw_text: String,
    pub timestamp: Option<NaiveDateTime>,
    pub severity: Option<String>,
    /// Header line text after the timestamp and severity prefix.
    pub message: String,
}

impl LogRecord {
    pub fn line_count(&self) -> usize {
        self.raw_text.lines().count().max(1)
    }
}

impl HasTimestamp for LogRecord {
    fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }
}

/// Lazily turns the decoded text of one file into [`LogRecord`]s.
///
/// A line that starts with a recognisable date opens a new record; every
/// other line is appended to the open one. Lines before the first dated line
/// form a record of their own. Records never span files.
pub struct RecordAssembler<'a> {
    source: &'a Path,
    lines: Enumerate<Lines<'a>>,
    vocabulary: &'a SeverityVocabulary,
    open: Option<(usize, String)>,
    physical_lines: usize,
}

impl<'a> RecordAssembler<'a> {
    pub fn new(source: &'a Path, text: &'a str, vocabulary: &'a SeverityVocabulary) -> Self {
        Self {
            source,
            lines: text.lines().enumerate(),
            vocabulary,
            open: None,
            physical_lines: 0,
        }
    }

    /// Physical lines consumed so far.
    pub fn physical_lines(&self) -> usize {
        self.physical_lines
    }

    fn build(&self, line_start: usize, raw_text: String) -> LogRecord {
        let header = parse_header(raw_text.lines().next().unwrap_or(""), self.vocabulary);
        LogRecord {
            source_file: self.source.to_path_buf(),
            line_start,
            raw_text,
            timestamp: header.timestamp,
            severity: header.severity,
            message: header.message,
        }
    }
}

impl Iterator for RecordAssembler<'_> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        while let Some((idx, line)) = self.lines.next() {
            self.physical_lines += 1;

            if is_record_start(line) {
                let previous = self.open.replace((idx + 1, line.to_string()));
                if let Some((start, text)) = previous {
                    return Some(self.build(start, text));
                }
            } else {
                match self.open.as_mut() {
                    Some((_, text)) => {
                        text.push('\n');
                        text.push_str(line);
                    }
                    None => self.open = Some((idx + 1, line.to_string())),
                }
            }
        }

        let (start, text) = self.open.take()?;
        Some(self.build(start, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(text: &str) -> Vec<LogRecord> {
        let vocabulary = SeverityVocabulary::default();
        RecordAssembler::new(Path::new("app.log"), text, &vocabulary).collect()
    }

    #[test]
    fn test_stack_trace_is_one_record() {
        let text = "2025-01-01T00:00:00.000 ERROR java.lang.NullPointerException: boom\n\
                    \tat com.example.Service.call(Service.java:42)\n\
                    \tat com.example.Main.main(Main.java:7)";

        let records = assemble(text);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line_start, 1);
        assert_eq!(records[0].line_count(), 3);
        assert_eq!(records[0].severity.as_deref(), Some("ERROR"));
        assert_eq!(records[0].message, "java.lang.NullPointerException: boom");
        assert!(records[0].raw_text.ends_with("at com.example.Main.main(Main.java:7)"));
    }

    #[test]
    fn test_each_dated_line_opens_a_record() {
        let text = "2025-01-01T00:00:00 ERROR first\n\
                    2025-01-01T00:00:01 INFO second\n\
                    continuation of second\n\
                    2025-01-01T00:00:02 WARN third";

        let records = assemble(text);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].raw_text, "2025-01-01T00:00:00 ERROR first");
        assert_eq!(records[1].raw_text, "2025-01-01T00:00:01 INFO second\ncontinuation of second");
        assert_eq!(records[1].line_start, 2);
        assert_eq!(records[2].line_start, 4);
    }

    #[test]
    fn test_leading_orphan_lines_form_one_record() {
        let text = "  at orphan.Frame(Frame.java:1)\n  at orphan.Frame(Frame.java:2)\n2025-01-01T00:00:00 ERROR real";

        let records = assemble(text);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, None);
        assert_eq!(records[0].severity, None);
        assert_eq!(records[0].line_count(), 2);
        assert_eq!(records[1].severity.as_deref(), Some("ERROR"));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(assemble("").is_empty());
    }

    #[test]
    fn test_assembler_is_lazy_and_counts_lines() {
        let vocabulary = SeverityVocabulary::default();
        let text = "2025-01-01T00:00:00 ERROR a\nmore\n2025-01-01T00:00:01 ERROR b\n";
        let mut assembler = RecordAssembler::new(Path::new("app.log"), text, &vocabulary);

        let first = assembler.next().unwrap();
        assert_eq!(first.raw_text, "2025-01-01T00:00:00 ERROR a\nmore");
        assert_eq!(assembler.physical_lines(), 3);

        assert!(assembler.next().is_some());
        assert!(assembler.next().is_none());
        assert_eq!(assembler.physical_lines(), 3);
    }
}
