use crate::error::ConfigError;
use crate::input::ReadOptions;
use crate::normalizer::{
    KnownFamilyNormalizer, Normalizer, RuleSetNormalizer, RuleSpec, DEFAULT_MAX_LABEL_LENGTH,
    DEFAULT_MAX_SIGNATURE_LENGTH,
};
use crate::parser::{SeverityVocabulary, DEFAULT_SEVERITY_LEVELS};
use crate::window::TimeWindow;
use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_FILE_PATTERN: &str = "*.log";
pub const DEFAULT_MAX_EXAMPLES_PER_FAMILY: usize = 3;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 256 * 1024 * 1024;

const PROJECT_CONFIG_FILE: &str = ".faultlens.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizerKind {
    Default,
    FileNet,
    Custom,
}

impl NormalizerKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "filenet" => Ok(Self::FileNet),
            "custom" => Ok(Self::Custom),
            _ => Err(ConfigError::UnknownNormalizer(name.to_string())),
        }
    }
}

/// Every option the analyzer recognizes. Missing keys take their defaults,
/// unknown keys are rejected when the file is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub file_pattern: String,
    /// Relative expression such as `24h` or `2d6h`; no lower bound when unset.
    pub since: Option<String>,
    /// Relative expression; `0h` means now.
    pub until: Option<String>,
    pub severity_levels: Vec<String>,
    pub max_examples_per_family: usize,
    pub max_signature_length: usize,
    pub max_label_length: usize,
    pub max_file_size_bytes: u64,
    pub enable_parallel_processing: bool,
    pub worker_threads: usize,
    pub normalizer: String,
    pub normalizer_rules: Vec<RuleSpec>,
    /// WHATWG label, e.g. `windows-1252`.
    pub fallback_encoding: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            since: None,
            until: Some("0h".to_string()),
            severity_levels: DEFAULT_SEVERITY_LEVELS.iter().map(|s| s.to_string()).collect(),
            max_examples_per_family: DEFAULT_MAX_EXAMPLES_PER_FAMILY,
            max_signature_length: DEFAULT_MAX_SIGNATURE_LENGTH,
            max_label_length: DEFAULT_MAX_LABEL_LENGTH,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            enable_parallel_processing: false,
            worker_threads: num_cpus::get(),
            normalizer: "default".to_string(),
            normalizer_rules: Vec::new(),
            fallback_encoding: None,
        }
    }
}

impl AnalyzerConfig {
    /// Load from `explicit` if given, otherwise from the first config file
    /// found in the usual places, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_path(),
        };

        match path {
            Some(path) => Self::load_from_path(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml_str(&content).map_err(|e| ConfigError::parse(path, e))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn find_config_path() -> Option<PathBuf> {
        // Project-level config first
        if let Ok(current_dir) = env::current_dir() {
            let project_config = current_dir.join(PROJECT_CONFIG_FILE);
            if project_config.exists() {
                return Some(project_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let user_config = home_dir.join(".config").join("faultlens").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Check every value. Called before any file is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_options()?;
        // Resolving against any instant catches bad expressions and inverted windows.
        self.resolve_window(chrono::Local::now().naive_local())?;
        Ok(())
    }

    /// Everything [`validate`](Self::validate) checks except the window, for
    /// callers that bring an already resolved one.
    pub fn validate_options(&self) -> Result<(), ConfigError> {
        glob::Pattern::new(&self.file_pattern).map_err(|source| ConfigError::Glob {
            pattern: self.file_pattern.clone(),
            source,
        })?;

        if self.severity_levels.is_empty() {
            return Err(ConfigError::EmptySeveritySet);
        }
        if let Some(bad) = self
            .severity_levels
            .iter()
            .find(|level| level.is_empty() || !level.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(ConfigError::InvalidSeverity(bad.clone()));
        }

        for (option, value) in [
            ("max_signature_length", self.max_signature_length as u64),
            ("max_label_length", self.max_label_length as u64),
            ("max_file_size_bytes", self.max_file_size_bytes),
            ("worker_threads", self.worker_threads as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { option });
            }
        }

        self.read_options()?;
        self.build_normalizer()?;
        Ok(())
    }

    pub fn normalizer_kind(&self) -> Result<NormalizerKind, ConfigError> {
        NormalizerKind::parse(&self.normalizer)
    }

    pub fn resolve_window(&self, now: NaiveDateTime) -> Result<TimeWindow, ConfigError> {
        TimeWindow::resolve(self.since.as_deref(), self.until.as_deref(), now)
    }

    pub fn vocabulary(&self) -> SeverityVocabulary {
        SeverityVocabulary::new(self.severity_levels.iter())
    }

    pub fn read_options(&self) -> Result<ReadOptions, ConfigError> {
        let fallback_encoding = self
            .fallback_encoding
            .as_deref()
            .map(|label| {
                Encoding::for_label(label.trim().as_bytes())
                    .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))
            })
            .transpose()?;

        Ok(ReadOptions {
            max_file_size_bytes: self.max_file_size_bytes,
            fallback_encoding,
        })
    }

    pub fn build_normalizer(&self) -> Result<Arc<dyn Normalizer>, ConfigError> {
        let standard = || RuleSetNormalizer::standard(self.max_signature_length, self.max_label_length);

        let normalizer: Arc<dyn Normalizer> = match self.normalizer_kind()? {
            NormalizerKind::Default => Arc::new(standard()),
            NormalizerKind::FileNet => Arc::new(
                KnownFamilyNormalizer::filenet(Box::new(standard()))
                    .with_limits(self.max_signature_length, self.max_label_length),
            ),
            NormalizerKind::Custom => Arc::new(RuleSetNormalizer::from_specs(
                &self.normalizer_rules,
                self.max_signature_length,
                self.max_label_length,
            )?),
        };
        Ok(normalizer)
    }

    /// Worker count actually used, `1` when parallelism is off.
    pub fn effective_workers(&self) -> usize {
        if self.enable_parallel_processing {
            self.worker_threads.max(1)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.file_pattern, "*.log");
        assert_eq!(config.max_examples_per_family, 3);
        assert_eq!(config.until.as_deref(), Some("0h"));
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalyzerConfig::from_toml_str(
            r#"
            since = "48h"
            severity_levels = ["ERROR", "FATAL"]
            enable_parallel_processing = true
            worker_threads = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.since.as_deref(), Some("48h"));
        assert_eq!(config.severity_levels, vec!["ERROR", "FATAL"]);
        assert_eq!(config.max_signature_length, DEFAULT_MAX_SIGNATURE_LENGTH);
        assert_eq!(config.effective_workers(), 4);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        assert!(AnalyzerConfig::from_toml_str("max_exampels = 5").is_err());
    }

    #[test]
    fn test_load_from_path_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file_pattern = 42").unwrap();

        let err = AnalyzerConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file_pattern = \"*.txt\"\nmax_examples_per_family = 5").unwrap();

        let config = AnalyzerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.file_pattern, "*.txt");
        assert_eq!(config.max_examples_per_family, 5);
    }

    fn validation_error(config: AnalyzerConfig) -> ConfigError {
        config.validate().unwrap_err()
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = validation_error(AnalyzerConfig { file_pattern: "[".to_string(), ..Default::default() });
        assert!(matches!(err, ConfigError::Glob { .. }));

        let err = validation_error(AnalyzerConfig { since: Some("yesterday".to_string()), ..Default::default() });
        assert!(matches!(err, ConfigError::InvalidDuration { option: "since", .. }));

        let err = validation_error(AnalyzerConfig {
            since: Some("1h".to_string()),
            until: Some("2h".to_string()),
            ..Default::default()
        });
        assert!(matches!(err, ConfigError::InvertedWindow { .. }));

        let err = validation_error(AnalyzerConfig { severity_levels: Vec::new(), ..Default::default() });
        assert!(matches!(err, ConfigError::EmptySeveritySet));

        let err = validation_error(AnalyzerConfig {
            severity_levels: vec!["ERR OR".to_string()],
            ..Default::default()
        });
        assert!(matches!(err, ConfigError::InvalidSeverity(_)));

        let err = validation_error(AnalyzerConfig { max_signature_length: 0, ..Default::default() });
        assert!(matches!(err, ConfigError::ZeroLimit { option: "max_signature_length" }));

        let err = validation_error(AnalyzerConfig { normalizer: "fancy".to_string(), ..Default::default() });
        assert!(matches!(err, ConfigError::UnknownNormalizer(_)));

        let err = validation_error(AnalyzerConfig { normalizer: "custom".to_string(), ..Default::default() });
        assert!(matches!(err, ConfigError::MissingRules));

        let err = validation_error(AnalyzerConfig {
            normalizer: "custom".to_string(),
            normalizer_rules: vec![RuleSpec {
                pattern: "(".to_string(),
                replacement: "<X>".to_string(),
            }],
            ..Default::default()
        });
        assert!(matches!(err, ConfigError::InvalidRule { .. }));

        let err = validation_error(AnalyzerConfig {
            fallback_encoding: Some("klingon".to_string()),
            ..Default::default()
        });
        assert!(matches!(err, ConfigError::UnknownEncoding(_)));
    }

    #[test]
    fn test_resolve_window() {
        let config = AnalyzerConfig {
            since: Some("24h".to_string()),
            ..Default::default()
        };
        let window = config.resolve_window(at("2025-01-02 12:00:00")).unwrap();

        assert_eq!(window.since, Some(at("2025-01-01 12:00:00")));
        assert_eq!(window.until, Some(at("2025-01-02 12:00:00")));
    }

    #[test]
    fn test_build_normalizer_by_name() {
        let config = AnalyzerConfig { normalizer: "FileNet".to_string(), ..Default::default() };
        assert_eq!(config.build_normalizer().unwrap().name(), "filenet");

        let capped = AnalyzerConfig {
            normalizer: "filenet".to_string(),
            max_signature_length: 12,
            max_label_length: 8,
            ..Default::default()
        };
        let known = capped.build_normalizer().unwrap().normalize("TTLStreamReaper stalled");
        assert_eq!(known.signature, "TTLStreamRea");
        assert_eq!(known.label, "TTLStrea…");

        let config = AnalyzerConfig {
            normalizer: "custom".to_string(),
            normalizer_rules: vec![RuleSpec {
                pattern: r"\d+".to_string(),
                replacement: "#".to_string(),
            }],
            ..Default::default()
        };
        let normalizer = config.build_normalizer().unwrap();
        assert_eq!(normalizer.name(), "custom");
        assert_eq!(normalizer.normalize("retry 3 of 5").signature, "retry # of #");
    }

    #[test]
    fn test_fallback_encoding_label() {
        let config = AnalyzerConfig {
            fallback_encoding: Some("latin1".to_string()),
            ..Default::default()
        };
        let options = config.read_options().unwrap();
        assert_eq!(options.fallback_encoding.map(|e| e.name()), Some("windows-1252"));
    }
}
