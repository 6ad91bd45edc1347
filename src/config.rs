//! Configuration system for the compliance engine
//!
//! Reads configuration from:
//! - `.conformrc.yaml` / `.conformrc.json` / `conform.yaml` (project-level)
//! - the same names in the home directory (user-level)
//!
//! A file may `extends` other files; the extending file wins.

use crate::cache::DEFAULT_CAPACITY;
use crate::finding::Severity;
use crate::registry::RuleOverrides;
use crate::session::SessionOptions;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_NAMES: [&str; 6] = [
    ".conformrc.yaml",
    ".conformrc.yml",
    ".conformrc.json",
    "conform.yaml",
    "conform.yml",
    "conform.json",
];

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable parallel processing
    pub parallel: bool,

    /// Number of parallel jobs (0 = auto-detect)
    pub jobs: usize,

    /// Enable the finding cache
    pub cache: bool,

    /// Cache directory
    pub cache_dir: Option<PathBuf>,

    /// Maximum cached files
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
            cache: false,
            cache_dir: None,
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,

    /// Color mode
    pub color: ColorMode,

    /// Verbose output
    pub verbose: bool,

    /// Show statistics
    pub statistics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: ColorMode::Auto,
            verbose: false,
            statistics: true,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// File handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Include patterns
    pub include: Vec<String>,

    /// Exclude patterns
    pub exclude: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            include: vec![
                "**/*.java".to_string(),
                "**/*.py".to_string(),
                "**/*.pyi".to_string(),
            ],
            exclude: vec![
                "**/generated/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/.venv/**".to_string(),
                "**/__pycache__/**".to_string(),
            ],
        }
    }
}

impl FilesConfig {
    /// Compile include/exclude patterns into a filter
    pub fn filter(&self) -> Result<FileFilter, ConfigError> {
        Ok(FileFilter {
            include: build_globset(&self.include)?,
            exclude: build_globset(&self.exclude)?,
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ConfigError::Invalid(format!("bad pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Compiled file patterns
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl FileFilter {
    /// Whether a path is included and not excluded
    ///
    /// An empty include list admits every path.
    pub fn accepts(&self, path: &Path) -> bool {
        (self.include.is_empty() || self.include.is_match(path)) && !self.exclude.is_match(path)
    }
}

/// Rule configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule-set files or directories, relative to the config file
    pub sets: Vec<PathBuf>,

    /// Rule-set names, lowest precedence first
    pub precedence: Vec<String>,

    /// Disabled rules
    pub disabled: Vec<String>,

    /// Severity overrides (rule_id -> severity)
    pub severity: BTreeMap<String, Severity>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Other configuration files this one builds on
    pub extends: Vec<String>,

    /// Engine settings
    pub engine: EngineConfig,

    /// Output settings
    pub output: OutputConfig,

    /// File handling settings
    pub files: FilesConfig,

    /// Rule configuration
    pub rules: RulesConfig,
}

impl Config {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_depth(path, 0)
    }

    /// Load with recursion depth limit (to prevent infinite loops)
    fn load_with_depth(path: &Path, depth: usize) -> Result<Self, ConfigError> {
        const MAX_DEPTH: usize = 10;
        if depth >= MAX_DEPTH {
            return Err(ConfigError::Invalid(
                "Maximum config inheritance depth exceeded".to_string(),
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        let base_dir = path.parent().unwrap_or(Path::new("."));
        config.rules.sets = config
            .rules
            .sets
            .iter()
            .map(|set| resolve(base_dir, set))
            .collect();

        if !config.extends.is_empty() {
            let mut base_config = Self::default();
            for extend in &config.extends.clone() {
                let extended = Self::load_with_depth(&resolve(base_dir, Path::new(extend)), depth + 1)?;
                base_config.merge(extended);
            }

            // Merge current config on top of base
            base_config.merge(config);
            config = base_config;
        }

        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        // Engine settings - other takes precedence if non-default
        if other.engine.jobs != 0 {
            self.engine.jobs = other.engine.jobs;
        }
        self.engine.parallel = other.engine.parallel;
        if other.engine.cache {
            self.engine.cache = true;
        }
        if other.engine.cache_dir.is_some() {
            self.engine.cache_dir = other.engine.cache_dir;
        }
        if other.engine.cache_capacity != DEFAULT_CAPACITY {
            self.engine.cache_capacity = other.engine.cache_capacity;
        }

        // Output settings
        if other.output.format != OutputFormat::Text {
            self.output.format = other.output.format;
        }
        if other.output.verbose {
            self.output.verbose = true;
        }
        if other.output.color != ColorMode::Auto {
            self.output.color = other.output.color;
        }
        self.output.statistics = other.output.statistics;

        // Files - replace when the other side changed them
        let defaults = FilesConfig::default();
        if other.files.include != defaults.include {
            self.files.include = other.files.include;
        }
        for pattern in other.files.exclude {
            if !self.files.exclude.contains(&pattern) {
                self.files.exclude.push(pattern);
            }
        }

        // Rules - sets accumulate, precedence is replaced as a whole
        for set in other.rules.sets {
            if !self.rules.sets.contains(&set) {
                self.rules.sets.push(set);
            }
        }
        if !other.rules.precedence.is_empty() {
            self.rules.precedence = other.rules.precedence;
        }
        self.rules.disabled.extend(other.rules.disabled);
        self.rules.severity.extend(other.rules.severity);
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::discover(Path::new(".")) {
            return Self::load(&path);
        }
        if let Some(home) = dirs::home_dir() {
            if let Some(path) = Self::discover(&home) {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// First configuration file present in `dir`
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(
        &mut self,
        format: Option<OutputFormat>,
        verbose: Option<bool>,
        jobs: Option<usize>,
        cache: Option<bool>,
        disabled_rules: Option<Vec<String>>,
    ) {
        if let Some(f) = format {
            self.output.format = f;
        }
        if let Some(v) = verbose {
            self.output.verbose = v;
        }
        if let Some(j) = jobs {
            self.engine.jobs = j;
            if j == 1 {
                self.engine.parallel = false;
            }
        }
        if let Some(c) = cache {
            self.engine.cache = c;
        }
        if let Some(disabled) = disabled_rules {
            self.rules.disabled.extend(disabled);
        }
    }

    /// Overrides applied by the rule registry
    pub fn rule_overrides(&self) -> RuleOverrides {
        RuleOverrides {
            disabled: self.rules.disabled.iter().cloned().collect(),
            severity: self.rules.severity.clone(),
        }
    }

    /// Worker pool settings for an evaluation session
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            parallel: self.engine.parallel,
            jobs: self.engine.jobs,
        }
    }

    /// Where the persistent cache lives, if caching is on
    pub fn cache_file(&self) -> Option<PathBuf> {
        if !self.engine.cache {
            return None;
        }
        match &self.engine.cache_dir {
            Some(dir) => Some(dir.join("cache.json")),
            None => crate::cache::default_cache_path(),
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
