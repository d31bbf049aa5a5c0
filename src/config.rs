//! TOML configuration.
//!
//! Every key is optional; a missing file yields the defaults. API keys never
//! live in the file, only the name of the environment variable holding one.
//!
//! ```toml
//! [paths]
//! transcript = "conversations_extraites.txt"
//! index_dir = "vector_index"
//!
//! [embedder]
//! base_url = "https://api.openai.com/v1"
//! model = "text-embedding-3-small"
//! api_key_env = "OPENAI_API_KEY"
//! batch_size = 100
//! concurrency = 4
//!
//! [search]
//! default_k = 5
//!
//! [server]
//! bind = "127.0.0.1:7878"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "secondmind.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub embedder: EmbedderConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub transcript: PathBuf,
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Requests in flight at once.
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// L2-normalize vectors as they come back.
    pub normalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            transcript: PathBuf::from("conversations_extraites.txt"),
            index_dir: PathBuf::from("vector_index"),
        }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 100,
            concurrency: 4,
            timeout_secs: 60,
            normalize: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig { default_k: 5 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { bind: "127.0.0.1:7878".to_string() }
    }
}

impl Config {
    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config = Config::from_toml(&content)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| IndexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedder.batch_size == 0 {
            return Err(IndexError::Config("embedder.batch_size must be at least 1".to_string()));
        }
        if self.embedder.concurrency == 0 {
            return Err(IndexError::Config("embedder.concurrency must be at least 1".to_string()));
        }
        if self.embedder.model.trim().is_empty() {
            return Err(IndexError::Config("embedder.model cannot be empty".to_string()));
        }
        if Url::parse(&self.embedder.base_url).is_err() {
            return Err(IndexError::Config(format!("embedder.base_url '{}' is not a URL", self.embedder.base_url)));
        }
        if self.search.default_k == 0 {
            return Err(IndexError::Config("search.default_k must be at least 1".to_string()));
        }
        Ok(())
    }
}
