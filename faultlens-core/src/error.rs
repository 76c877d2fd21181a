use std::path::PathBuf;
use thiserror::Error;

/// Invalid option values. Always raised before any file is read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid relative time expression '{expr}' for {option} (expected e.g. 24h, 2d6h, 1w, 0h or now)")]
    InvalidDuration { option: &'static str, expr: String },

    #[error("invalid time window: since ({since}) is after until ({until})")]
    InvertedWindow { since: String, until: String },

    #[error("severity_levels must contain at least one level")]
    EmptySeveritySet,

    #[error("invalid severity level '{0}' (levels are single words like ERROR or WARN)")]
    InvalidSeverity(String),

    #[error("{option} must be greater than zero")]
    ZeroLimit { option: &'static str },

    #[error("unknown normalizer '{0}' (expected default, filenet or custom)")]
    UnknownNormalizer(String),

    #[error("normalizer 'custom' requires at least one entry in normalizer_rules")]
    MissingRules,

    #[error("invalid normalizer rule pattern '{pattern}': {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown fallback encoding label '{0}'")]
    UnknownEncoding(String),
}

/// Filesystem failures at the run boundary. Fatal.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("log directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to read log directory {path}: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no log files in {dir} for pattern '{pattern}' (recursive)")]
    NoFiles { dir: PathBuf, pattern: String },
}

#[derive(Debug, Error)]
pub enum FaultLensError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),
}

pub type Result<T, E = FaultLensError> = std::result::Result<T, E>;

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
