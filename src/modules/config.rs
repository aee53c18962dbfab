use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use thiserror::Error;

use crate::modules::cache::LogLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("cannot parse config {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot open log file {path}: {source}")]
    LogFile { path: String, source: io::Error },
    #[error("logger already initialised")]
    Logger(#[from] log::SetLoggerError),
}

/// Which dashboard arrangement the panel runs as.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Every task as a card, detail view opened on demand.
    #[default]
    Board,
    /// Follows the most recently started task, as the single-crawler page did.
    Single,
}

/// Optional panels. An operation aimed at a missing panel is skipped.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Files,
    Summaries,
    Logs,
    DirTree,
    KnowledgeBase,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Features(BTreeSet<Feature>);

impl Features {
    pub fn all() -> Self {
        Self(
            [
                Feature::Files,
                Feature::Summaries,
                Feature::Logs,
                Feature::DirTree,
                Feature::KnowledgeBase,
            ]
            .into_iter()
            .collect(),
        )
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    pub refresh_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub summary_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5000,
            settle_delay_ms: 1000,
            summary_delay_ms: 2000,
            request_timeout_ms: 30_000,
        }
    }
}

impl Timing {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn summary_delay(&self) -> Duration {
        Duration::from_millis(self.summary_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    pub max_logs: usize,
    pub keep_logs: usize,
}

impl Default for Limits {
    fn default() -> Self {
        let limits = LogLimits::default();
        Self { max_logs: limits.max, keep_logs: limits.keep }
    }
}

impl Limits {
    pub fn log_limits(&self) -> LogLimits {
        LogLimits { max: self.max_logs, keep: self.keep_logs }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    pub server_url: String,
    pub log_file: String,
    pub log_level: String,
    pub layout: Layout,
    pub features: Features,
    pub default_max_pages: u32,
    pub timing: Timing,
    pub limits: Limits,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            log_file: "spider_panel.log".to_string(),
            log_level: "info".to_string(),
            layout: Layout::Board,
            features: Features::all(),
            default_max_pages: 10,
            timing: Timing::default(),
            limits: Limits::default(),
        }
    }
}

impl PanelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.server_url)
            .map_err(|e| ConfigError::Invalid(format!("server_url {:?}: {e}", self.server_url)))?;
        if self.limits.keep_logs == 0 || self.limits.keep_logs > self.limits.max_logs {
            return Err(ConfigError::Invalid(format!(
                "limits.keep_logs must be in 1..={}, got {}",
                self.limits.max_logs, self.limits.keep_logs
            )));
        }
        if self.timing.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid("timing.refresh_interval_ms must be > 0".into()));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log_level {:?}", self.log_level)))
    }
}

pub fn parse_config(text: &str, path: &str) -> Result<PanelConfig, ConfigError> {
    let config: PanelConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads `panel.toml`. A missing file yields the defaults.
pub fn load_config(path: &str) -> Result<PanelConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => parse_config(&text, path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PanelConfig::default()),
        Err(source) => Err(ConfigError::Read { path: path.to_string(), source }),
    }
}

/// File logger; the terminal belongs to the panel.
pub fn init_logger(log_path: &Path, level: LevelFilter) -> Result<(), ConfigError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| ConfigError::LogFile {
            path: log_path.display().to_string(),
            source,
        })?;
    WriteLogger::init(level, ConfigBuilder::new().set_time_format_rfc3339().build(), file)?;
    Ok(())
}
