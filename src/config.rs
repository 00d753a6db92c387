//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! command-line flags and environment variables (see [`crate::cli::Cli`]).
//! No default carries a secret; the generation credential must be supplied
//! and [`Config::validate`] refuses to start without it.

use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Startup configuration errors. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing generation API key (set GEMINI_API_KEY or summarizer.api_key)")]
    MissingApiKey,

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Settings for the generation provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// Truncate the text sent for summarization to this many characters.
    pub max_input_chars: Option<usize>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_input_chars: None,
        }
    }
}

impl fmt::Debug for SummarizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummarizerConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog_base_url: String,
    pub search_path: String,
    pub page_size: u32,
    pub offset: u32,
    pub download_dir: PathBuf,
    /// Prefix stripped from article links when naming downloaded files.
    pub link_prefix: String,
    pub summarizer: SummarizerConfig,
    /// Deadline for each stage call, in seconds. Zero disables deadlines.
    pub stage_timeout_secs: u64,
    pub max_concurrent_articles: usize,
    pub notification_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_base_url: "https://cyberleninka.ru".to_string(),
            search_path: "/api/search".to_string(),
            page_size: 10,
            offset: 0,
            download_dir: PathBuf::from("./downloads"),
            link_prefix: "/article/n/".to_string(),
            summarizer: SummarizerConfig::default(),
            stage_timeout_secs: 120,
            max_concurrent_articles: 4,
            notification_buffer: 256,
        }
    }
}

impl Config {
    /// Load a YAML config file. Missing keys take their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?config, "Loaded config file");
        Ok(config)
    }

    /// Build the effective configuration: file (if given) overlaid by CLI flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(url) = &cli.base_url {
            self.catalog_base_url = url.clone();
        }
        if let Some(key) = &cli.api_key {
            self.summarizer.api_key = Some(key.clone());
        }
        if let Some(model) = &cli.model {
            self.summarizer.model = model.clone();
        }
        if let Some(size) = cli.page_size {
            self.page_size = size;
        }
        if let Some(offset) = cli.offset {
            self.offset = offset;
        }
        if let Some(secs) = cli.stage_timeout_secs {
            self.stage_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.summarizer.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingApiKey),
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_articles == 0 {
            return Err(ConfigError::Invalid {
                key: "max_concurrent_articles",
                message: "must be at least 1".to_string(),
            });
        }
        if self.notification_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "notification_buffer",
                message: "must be at least 1".to_string(),
            });
        }
        url::Url::parse(&self.catalog_base_url).map_err(|e| ConfigError::Invalid {
            key: "catalog_base_url",
            message: e.to_string(),
        })?;
        url::Url::parse(&self.summarizer.endpoint).map_err(|e| ConfigError::Invalid {
            key: "summarizer.endpoint",
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }
}
