//! Configuration types for a chunking run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::{
    DEFAULT_CPU_LIMIT, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_PAGES_PER_BATCH, DEFAULT_MAX_TOKENS,
    DEFAULT_MIN_CHUNK_SIZE, DEFAULT_MIN_TOKENS, DEFAULT_OVERLAP, DEFAULT_OVERLAP_TOKENS,
    DEFAULT_TIMEOUT_PER_PAGE_SECS,
};

/// Prefix for environment variable overrides (`CHUNKER_MAX_CHUNK_SIZE`, ...).
pub const ENV_PREFIX: &str = "CHUNKER";

/// Segmentation strategy, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fixed-size character windows with overlap
    SlidingWindow,
    /// Whole paragraphs accumulated up to the size limit
    Semantic,
    /// Sentences accumulated up to a token budget
    Hybrid,
}

impl Strategy {
    /// All strategies, in documentation order.
    pub const ALL: [Strategy; 3] = [Strategy::SlidingWindow, Strategy::Semantic, Strategy::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SlidingWindow => "sliding_window",
            Strategy::Semantic => "semantic",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sliding_window" | "sliding" | "window" => Ok(Strategy::SlidingWindow),
            "semantic" | "paragraph" => Ok(Strategy::Semantic),
            "hybrid" | "token" => Ok(Strategy::Hybrid),
            other => Err(ConfigurationError::InvalidValue {
                field: "strategy",
                reason: format!("unknown strategy {other:?}"),
            }),
        }
    }
}

/// On-disk output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One JSON file per document with every chunk
    CombinedJson,
    /// One JSON file per chunk
    PerChunkJson,
    /// One chunk object per line
    JsonLines,
    /// Chunk metadata table
    Csv,
}

impl FromStr for OutputFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "combined_json" | "json" => Ok(OutputFormat::CombinedJson),
            "per_chunk_json" | "chunks" => Ok(OutputFormat::PerChunkJson),
            "json_lines" | "jsonl" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(ConfigurationError::InvalidValue {
                field: "output_formats",
                reason: format!("unknown output format {other:?}"),
            }),
        }
    }
}

/// A custom find/replace rule applied by the cleaner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Regular expression to match
    pub pattern: String,

    /// Replacement text (supports `$1` style group references)
    #[serde(default)]
    pub replacement: String,
}

impl PatternRule {
    pub fn new(pattern: &str, replacement: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }
}

/// Cleaner settings (the cleaning subset of [`JobConfig`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Domain-specific rules, applied last and in order
    pub custom_patterns: Vec<PatternRule>,

    /// Pages a line must recur on to count as a header or footer
    pub header_footer_min_pages: usize,

    /// Non-blank lines inspected at the top and bottom of each page
    pub header_scan_lines: usize,

    /// Rejoin words hyphenated across line breaks
    pub dehyphenate: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            custom_patterns: Vec::new(),
            header_footer_min_pages: 3,
            header_scan_lines: 2,
            dehyphenate: true,
        }
    }
}

impl CleanerConfig {
    /// Compile the custom patterns, failing on the first invalid one.
    pub fn compile_patterns(&self) -> Result<Vec<(Regex, String)>, ConfigurationError> {
        self.custom_patterns
            .iter()
            .map(|rule| {
                compile_pattern("cleaner.custom_patterns", &rule.pattern)
                    .map(|re| (re, rule.replacement.clone()))
            })
            .collect()
    }
}

/// Immutable configuration snapshot for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Directory scanned for PDF files
    pub input_dir: PathBuf,

    /// Directory receiving chunk output
    pub output_dir: PathBuf,

    /// Progress store path (defaults to `<output_dir>/.progress.json`)
    pub progress_file: Option<PathBuf>,

    /// Minimum chunk size in characters
    pub min_chunk_size: usize,

    /// Maximum chunk size in characters
    pub max_chunk_size: usize,

    /// Characters shared between consecutive windows
    pub overlap: usize,

    /// Segmentation strategy
    pub strategy: Strategy,

    /// Token floor per chunk (hybrid)
    pub min_tokens_per_chunk: usize,

    /// Token ceiling per chunk (hybrid)
    pub max_tokens_per_chunk: usize,

    /// Tokens of trailing sentences repeated in the next chunk (hybrid)
    pub overlap_tokens: usize,

    /// Abbreviations that never end a sentence and are never split
    pub abbreviations: Vec<String>,

    /// Extra regexes whose matches a window boundary may not cut
    pub do_not_split: Vec<String>,

    /// Worker count, 0 = available parallelism
    pub workers: usize,

    /// CPU utilization ceiling in percent
    pub cpu_limit: f32,

    /// Seconds between CPU samples
    pub cpu_sample_interval: f64,

    /// Language tag of the corpus
    pub language: Option<String>,

    /// Pages read together per extraction batch
    pub max_pages_per_batch: usize,

    /// Seconds before a single page extraction is abandoned
    pub timeout_per_page: f64,

    /// Output formats to write
    pub output_formats: Vec<OutputFormat>,

    /// Reprocess documents already marked done
    pub force: bool,

    /// Cleaner settings
    pub cleaner: CleanerConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            progress_file: None,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            strategy: Strategy::SlidingWindow,
            min_tokens_per_chunk: DEFAULT_MIN_TOKENS,
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            abbreviations: default_abbreviations(),
            do_not_split: Vec::new(),
            workers: 0,
            cpu_limit: DEFAULT_CPU_LIMIT,
            cpu_sample_interval: 1.5,
            language: Some("it".to_string()),
            max_pages_per_batch: DEFAULT_MAX_PAGES_PER_BATCH,
            timeout_per_page: DEFAULT_TIMEOUT_PER_PAGE_SECS,
            output_formats: vec![OutputFormat::CombinedJson, OutputFormat::JsonLines],
            force: false,
            cleaner: CleanerConfig::default(),
        }
    }
}

impl JobConfig {
    /// Load configuration: defaults, then an optional file, then `CHUNKER_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&JobConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Create a config with the given character bounds.
    pub fn with_sizes(min: usize, max: usize, overlap: usize) -> Self {
        Self {
            min_chunk_size: min,
            max_chunk_size: max,
            overlap,
            ..Default::default()
        }
    }

    /// Set the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the input and output directories.
    pub fn with_dirs(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.input_dir = input_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    /// Check every bound and compile every pattern.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(ConfigurationError::InvalidBounds {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            });
        }
        if self.overlap >= self.max_chunk_size {
            return Err(ConfigurationError::InvalidOverlap {
                overlap: self.overlap,
                max: self.max_chunk_size,
            });
        }

        if self.max_tokens_per_chunk == 0 {
            return Err(ConfigurationError::InvalidTokenBounds(
                "max_tokens_per_chunk must be greater than zero".to_string(),
            ));
        }
        if self.min_tokens_per_chunk > self.max_tokens_per_chunk {
            return Err(ConfigurationError::InvalidTokenBounds(format!(
                "min_tokens_per_chunk ({}) > max_tokens_per_chunk ({})",
                self.min_tokens_per_chunk, self.max_tokens_per_chunk
            )));
        }
        if self.overlap_tokens >= self.max_tokens_per_chunk {
            return Err(ConfigurationError::InvalidTokenBounds(format!(
                "overlap_tokens ({}) must be smaller than max_tokens_per_chunk ({})",
                self.overlap_tokens, self.max_tokens_per_chunk
            )));
        }

        if !(self.cpu_limit > 0.0 && self.cpu_limit <= 100.0) {
            return Err(ConfigurationError::InvalidValue {
                field: "cpu_limit",
                reason: format!("{} is outside (0, 100]", self.cpu_limit),
            });
        }
        if self.max_pages_per_batch == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_pages_per_batch",
                reason: "must be at least 1".to_string(),
            });
        }
        check_seconds("timeout_per_page", self.timeout_per_page)?;
        check_seconds("cpu_sample_interval", self.cpu_sample_interval)?;

        if self.output_formats.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "output_formats",
                reason: "at least one format is required".to_string(),
            });
        }
        if self.cleaner.header_footer_min_pages < 2 {
            return Err(ConfigurationError::InvalidValue {
                field: "cleaner.header_footer_min_pages",
                reason: "must be at least 2".to_string(),
            });
        }

        self.cleaner.compile_patterns()?;
        self.compile_do_not_split()?;

        Ok(())
    }

    /// Compile the do-not-split regexes.
    pub fn compile_do_not_split(&self) -> Result<Vec<Regex>, ConfigurationError> {
        self.do_not_split
            .iter()
            .map(|p| compile_pattern("do_not_split", p))
            .collect()
    }

    /// Resolved worker count.
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Resolved progress store path.
    pub fn progress_path(&self) -> PathBuf {
        self.progress_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".progress.json"))
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_per_page)
    }

    pub fn cpu_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cpu_sample_interval)
    }
}

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidValue {
            field,
            reason: format!("{value} is not a positive number of seconds"),
        })
    }
}

fn compile_pattern(field: &'static str, pattern: &str) -> Result<Regex, ConfigurationError> {
    Regex::new(pattern).map_err(|source| ConfigurationError::InvalidPattern {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// Abbreviations common in Italian and English legal writing.
pub fn default_abbreviations() -> Vec<String> {
    [
        "art.", "artt.", "op. cit.", "ex art.", "cfr.", "cit.", "co.", "lett.", "n.", "nn.",
        "p.", "pp.", "pag.", "sez.", "cass.", "civ.", "pen.", "proc.", "d.lgs.", "d.l.",
        "c.c.", "c.p.", "c.p.c.", "l.", "ss.", "sent.", "ord.", "e.g.", "i.e.", "etc.", "vs.",
        "no.", "dr.", "mr.", "mrs.", "prof.", "sec.", "para.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        JobConfig::default().validate().unwrap();
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = JobConfig::with_sizes(6000, 3000, 500);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidBounds { min: 6000, max: 3000 }
        ));
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let config = JobConfig::with_sizes(100, 500, 500);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidOverlap { .. })
        ));
    }

    #[test]
    fn test_invalid_custom_pattern_fails_validation() {
        let mut config = JobConfig::default();
        config.cleaner.custom_patterns.push(PatternRule::new("[unclosed", ""));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPattern { field, .. } if field == "cleaner.custom_patterns"));
    }

    #[test]
    fn test_cpu_limit_range() {
        let mut config = JobConfig::default();
        config.cpu_limit = 0.0;
        assert!(config.validate().is_err());
        config.cpu_limit = 100.0;
        assert!(config.validate().is_ok());
        config.cpu_limit = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("sliding_window".parse::<Strategy>().unwrap(), Strategy::SlidingWindow);
        assert_eq!("Semantic".parse::<Strategy>().unwrap(), Strategy::Semantic);
        assert_eq!("hybrid".parse::<Strategy>().unwrap(), Strategy::Hybrid);
        assert!("boolean-flags".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_progress_path_defaults_into_output_dir() {
        let config = JobConfig::default().with_dirs("in", "out");
        assert_eq!(config.progress_path(), PathBuf::from("out").join(".progress.json"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(
            &path,
            r#"
min_chunk_size = 1000
max_chunk_size = 2000
overlap = 200
strategy = "semantic"
output_formats = ["csv", "json_lines"]

[cleaner]
custom_patterns = [{ pattern = "\\[\\d+\\]", replacement = "" }]
"#,
        )
        .unwrap();

        let config = JobConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_chunk_size, 2000);
        assert_eq!(config.strategy, Strategy::Semantic);
        assert_eq!(config.output_formats, vec![OutputFormat::Csv, OutputFormat::JsonLines]);
        assert_eq!(config.cleaner.custom_patterns.len(), 1);
        assert_eq!(config.cleaner.header_footer_min_pages, 3);
        config.validate().unwrap();
    }
}
