//! Configuration for the analyzer service
//!
//! Values come from defaults, then an optional TOML file named by
//! `ANALYZER_CONFIG`, then environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main analyzer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Result store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Document store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Ollama/LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,
}

impl AnalyzerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("ANALYZER_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BROKER_URL") {
            self.queue.broker_url = v;
        }
        if let Some(v) = lookup("RESULT_BACKEND_URL") {
            self.queue.result_backend_url = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("ANALYZER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("ANALYZER_PORT") {
            self.server.port = parse_var("ANALYZER_PORT", &v)?;
        }
        if let Some(v) = lookup("ANALYZER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ANALYZER_WORKERS") {
            self.queue.worker_count = Some(parse_var("ANALYZER_WORKERS", &v)?);
        }
        if let Some(v) = lookup("ANALYZER_JOB_TIMEOUT_SECS") {
            // 0 disables the per-attempt timeout
            let secs: u64 = parse_var("ANALYZER_JOB_TIMEOUT_SECS", &v)?;
            self.queue.job_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup("ANALYZER_MAX_RETRIES") {
            self.queue.max_retries = parse_var("ANALYZER_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("OLLAMA_MODEL") {
            self.llm.model = v;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {} ({})", key, value, e)))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024,
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker address; only `memory://` (in-process channel) is supported
    pub broker_url: String,
    /// Where job state lives: `memory://` or a SQLite URL
    pub result_backend_url: String,
    /// Concurrent analyses (default: CPU count, max 4)
    pub worker_count: Option<usize>,
    /// Per-attempt analysis timeout; `None` or 0 waits forever
    pub job_timeout_secs: Option<u64>,
    /// Extra attempts after a failed analysis
    pub max_retries: u32,
    /// Base delay between attempts, doubled each retry
    pub retry_backoff_ms: u64,
    /// How long terminal job state is retained
    pub result_ttl_secs: u64,
    /// Report unknown job ids as `not_found` instead of `pending`
    pub strict_unknown_jobs: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url: "memory://".to_string(),
            result_backend_url: "sqlite:///./financial_analyzer_jobs.db".to_string(),
            worker_count: None,
            job_timeout_secs: Some(900),
            max_retries: 0,
            retry_backoff_ms: 1000,
            result_ttl_secs: 24 * 60 * 60,
            strict_unknown_jobs: false,
        }
    }
}

impl QueueConfig {
    /// Resolved worker count
    pub fn workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }

    /// Validate the broker address
    pub fn validate_broker(&self) -> Result<()> {
        if self.broker_url.starts_with("memory://") {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "Unsupported broker '{}': only memory:// is available",
                self.broker_url
            )))
        }
    }

    /// SQLite path for the result backend, or `None` for in-memory state
    pub fn result_backend_path(&self) -> Result<Option<PathBuf>> {
        if self.result_backend_url.starts_with("memory://") {
            return Ok(None);
        }
        sqlite_path(&self.result_backend_url).map(Some)
    }
}

/// Result store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string for the result store
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///./financial_analyzer.db".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// SQLite file path for the result store
    pub fn path(&self) -> Result<PathBuf> {
        sqlite_path(&self.url)
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives uploaded documents
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
    /// Document text beyond this many characters is cut before prompting
    pub max_document_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.2,
            timeout_secs: 300,
            max_retries: 2,
            max_document_chars: 24_000,
        }
    }
}

/// Resolve a SQLite connection string to a file path.
///
/// `sqlite:///relative.db` and `sqlite:////abs/path.db` follow the usual
/// three/four slash convention; anything without a scheme is taken as a path.
pub fn sqlite_path(url: &str) -> Result<PathBuf> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        if url.contains("://") {
            return Err(Error::Config(format!("Unsupported database URL: {}", url)));
        }
        return Ok(PathBuf::from(url));
    };

    let path = rest.strip_prefix('/').unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return Err(Error::Config(format!(
            "Database URL must name a file: {}",
            url
        )));
    }
    Ok(PathBuf::from(path))
}
