use crate::error::{ConfigError, FaultLensError, InputError};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How a single file is read.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub max_file_size_bytes: u64,
    /// Used for lines that are not valid UTF-8 instead of replacement characters.
    pub fallback_encoding: Option<&'static Encoding>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_file_size_bytes: crate::config::DEFAULT_MAX_FILE_SIZE_BYTES,
            fallback_encoding: None,
        }
    }
}

/// A file's decoded contents plus everything that was recovered on the way.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub text: String,
    pub file_size: u64,
    pub bytes_read: u64,
    pub truncated: bool,
    pub encoding: &'static str,
    /// Lines that needed replacement characters.
    pub lines_undecodable: usize,
    /// Lines decoded with the fallback encoding.
    pub lines_recoded: usize,
}

/// Find every file under `dir` (recursively) whose name matches `pattern`,
/// sorted by path.
pub fn discover_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, FaultLensError> {
    if !dir.exists() {
        return Err(InputError::MissingDirectory(dir.to_path_buf()).into());
    }
    if !dir.is_dir() {
        return Err(InputError::NotADirectory(dir.to_path_buf()).into());
    }
    fs::read_dir(dir).map_err(|source| InputError::UnreadableDirectory {
        path: dir.to_path_buf(),
        source,
    })?;

    let full_pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let entries = glob::glob(&full_pattern).map_err(|source| ConfigError::Glob {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable path {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(InputError::NoFiles {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        }
        .into());
    }

    info!("Found {} log files in {} matching '{}'", files.len(), dir.display(), pattern);
    Ok(files)
}

/// Read a log file, capped at `max_file_size_bytes`, and decode it.
///
/// Oversized files are cut at the last complete line inside the cap, or to
/// nothing when the cap ends inside the first line. Bytes that do not decode
/// are replaced (or handed to the fallback encoding); the file is never
/// rejected for its content.
pub fn read_log_file(path: &Path, options: &ReadOptions) -> io::Result<LoadedFile> {
    let file_size = fs::metadata(path)?.len();
    let file = File::open(path)?;

    let mut data = Vec::with_capacity(file_size.min(options.max_file_size_bytes) as usize);
    file.take(options.max_file_size_bytes).read_to_end(&mut data)?;
    debug!("Read {} bytes from file {}", data.len(), path.display());

    let encoding = detect_encoding(&data);
    let truncated = file_size > options.max_file_size_bytes;
    if truncated {
        // A cap that falls inside the first line leaves nothing worth keeping.
        data.truncate(complete_lines_len(&data, encoding));
        warn!(
            "File {} is {} bytes, truncated to {} bytes (max_file_size_bytes = {})",
            path.display(),
            file_size,
            data.len(),
            options.max_file_size_bytes
        );
    }

    let decoded = if encoding == UTF_8 {
        decode_utf8_lines(strip_utf8_bom(&data), options.fallback_encoding)
    } else {
        decode_whole(&data, encoding)
    };

    if decoded.lines_undecodable > 0 {
        warn!(
            "{} lines in {} contained undecodable bytes (replaced)",
            decoded.lines_undecodable,
            path.display()
        );
    }

    Ok(LoadedFile {
        path: path.to_path_buf(),
        text: decoded.text,
        file_size,
        bytes_read: data.len() as u64,
        truncated,
        encoding: encoding.name(),
        lines_undecodable: decoded.lines_undecodable,
        lines_recoded: decoded.lines_recoded,
    })
}

struct Decoded {
    text: String,
    lines_undecodable: usize,
    lines_recoded: usize,
}

/// BOMs win; otherwise a UTF-16 byte pattern; otherwise UTF-8, decoded line
/// by line so one bad line cannot poison its neighbours.
fn detect_encoding(data: &[u8]) -> &'static Encoding {
    if data.starts_with(&[0xFF, 0xFE]) {
        return UTF_16LE;
    }
    if data.starts_with(&[0xFE, 0xFF]) {
        return UTF_16BE;
    }
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return UTF_8;
    }

    match detect_utf16_pattern(data) {
        Some(encoding) => encoding,
        None => UTF_8,
    }
}

/// Text that is mostly ASCII encoded as UTF-16 has a NUL in every other byte.
fn detect_utf16_pattern(data: &[u8]) -> Option<&'static Encoding> {
    let sample = &data[..data.len().min(1024)];
    if sample.len() < 4 {
        return None;
    }

    let pairs = sample.len() / 2;
    let even_nulls = sample.iter().step_by(2).filter(|&&b| b == 0).count();
    let odd_nulls = sample.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();

    if odd_nulls * 10 >= pairs * 8 && even_nulls * 10 <= pairs {
        Some(UTF_16LE)
    } else if even_nulls * 10 >= pairs * 8 && odd_nulls * 10 <= pairs {
        Some(UTF_16BE)
    } else {
        None
    }
}

/// Length of the prefix that ends with the last newline of `encoding`,
/// aligned to its code units; `0` when there is no newline at all.
fn complete_lines_len(data: &[u8], encoding: &'static Encoding) -> usize {
    let newline: [u8; 2] = if encoding == UTF_16LE {
        [0x0A, 0x00]
    } else if encoding == UTF_16BE {
        [0x00, 0x0A]
    } else {
        return data.iter().rposition(|&b| b == b'\n').map_or(0, |idx| idx + 1);
    };

    data.chunks_exact(2)
        .rposition(|unit| unit == newline)
        .map_or(0, |idx| idx * 2 + 2)
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

fn decode_utf8_lines(data: &[u8], fallback: Option<&'static Encoding>) -> Decoded {
    let mut text = String::with_capacity(data.len());
    let mut lines_undecodable = 0;
    let mut lines_recoded = 0;

    if data.is_empty() {
        return Decoded {
            text,
            lines_undecodable,
            lines_recoded,
        };
    }

    let body = data.strip_suffix(b"\n").unwrap_or(data);
    for (idx, raw) in body.split(|&b| b == b'\n').enumerate() {
        if idx > 0 {
            text.push('\n');
        }
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(line) => text.push_str(line),
            Err(_) => match fallback {
                Some(encoding) => {
                    let (line, _) = encoding.decode_without_bom_handling(raw);
                    text.push_str(&line);
                    lines_recoded += 1;
                }
                None => {
                    text.push_str(&String::from_utf8_lossy(raw));
                    lines_undecodable += 1;
                }
            },
        }
    }

    Decoded {
        text,
        lines_undecodable,
        lines_recoded,
    }
}

fn decode_whole(data: &[u8], encoding: &'static Encoding) -> Decoded {
    let (decoded, _, had_errors) = encoding.decode(data);
    let text = decoded.replace("\r\n", "\n");
    let text = text.strip_suffix('\n').map(str::to_string).unwrap_or(text);
    let lines_undecodable = if had_errors {
        text.lines().filter(|l| l.contains('\u{FFFD}')).count()
    } else {
        0
    };

    Decoded {
        text,
        lines_undecodable,
        lines_recoded: 0,
    }
}
