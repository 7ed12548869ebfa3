use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment variable the service reads.
pub const ENV_PREFIX: &str = "TOOLSEEK_";

/// Port the resident server listens on unless `TOOLSEEK_PORT` says otherwise.
pub const DEFAULT_PORT: u16 = 8765;

/// Which embedding backend turns descriptor text into vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// ONNX Runtime bi-encoder loaded from `model_path` / `tokenizer_path`.
    Onnx,
    /// Model-free hashed n-gram embedder.
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "onnx" | "bge" | "bi-encoder" => Ok(Self::Onnx),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => anyhow::bail!("unknown embedding provider '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Always loopback: the service has no authentication.
    pub host: String,
    pub port: u16,
    /// Root of all per-user state.
    pub home_dir: PathBuf,
    /// Vector store snapshot directory.
    pub store_dir: PathBuf,
    /// PID file, status file and server log live here.
    pub runtime_dir: PathBuf,
    /// JSON file describing the current tool set, one entry per MCP server.
    pub tools_path: Option<PathBuf>,
    pub provider: EmbeddingProvider,
    /// Identity recorded in the snapshot manifest. A change invalidates every cached vector.
    pub model_id: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub max_sequence_length: usize,
    /// Threads per ONNX session.
    pub intra_threads: usize,
    /// Output dimension of the hashing backend.
    pub hashing_dims: usize,
    pub default_top_k: i64,
    /// How long `start` waits for the spawned server to answer `/health`.
    pub startup_timeout: Duration,
    /// Delay between health probes while waiting for startup.
    pub poll_interval: Duration,
    pub health_timeout: Duration,
    pub search_timeout: Duration,
    /// Updates may trigger batch embedding, so this one is long.
    pub update_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Grace period for in-flight requests after a shutdown signal.
    pub drain_secs: u64,
    /// Load the embedding backend in the background right after the server binds.
    pub preload_model: bool,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from `TOOLSEEK_*` environment variables with sensible defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    ///
    /// `lookup` receives the full variable name, e.g. `TOOLSEEK_PORT`.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let home_dir = match var("HOME") {
            Some(home) => PathBuf::from(home),
            None => default_home_dir()?,
        };
        let mut config = Self::for_home(home_dir);

        config.port = parse_or(&var, "PORT", config.port)?;
        if let Some(path) = var("TOOLS_PATH") {
            config.tools_path = Some(PathBuf::from(path));
        }
        config.provider = parse_or(&var, "EMBEDDING_PROVIDER", config.provider)?;
        if let Some(path) = var("MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(path) = var("TOKENIZER_PATH") {
            config.tokenizer_path = PathBuf::from(path);
        }
        config.max_sequence_length =
            parse_or(&var, "MAX_SEQ_LENGTH", config.max_sequence_length)?;
        config.intra_threads = parse_or(&var, "INTRA_THREADS", config.intra_threads)?;
        config.hashing_dims = parse_or(&var, "HASHING_DIMS", config.hashing_dims)?;
        if config.hashing_dims == 0 {
            anyhow::bail!("{}HASHING_DIMS must be at least 1", ENV_PREFIX);
        }
        config.model_id = var("MODEL_ID").unwrap_or_else(|| config.default_model_id());
        config.default_top_k = parse_or(&var, "DEFAULT_TOP_K", config.default_top_k)?;

        config.startup_timeout = millis_or(&var, "STARTUP_TIMEOUT_MS", config.startup_timeout)?;
        config.poll_interval = millis_or(&var, "POLL_INTERVAL_MS", config.poll_interval)?;
        config.health_timeout = millis_or(&var, "HEALTH_TIMEOUT_MS", config.health_timeout)?;
        config.search_timeout = millis_or(&var, "SEARCH_TIMEOUT_MS", config.search_timeout)?;
        config.update_timeout = millis_or(&var, "UPDATE_TIMEOUT_MS", config.update_timeout)?;
        config.shutdown_timeout =
            millis_or(&var, "SHUTDOWN_TIMEOUT_MS", config.shutdown_timeout)?;
        config.drain_secs = parse_or(&var, "DRAIN_SECS", config.drain_secs)?;
        config.preload_model = match var("PRELOAD_MODEL") {
            Some(flag) => parse_flag(&flag)
                .with_context(|| format!("invalid {}PRELOAD_MODEL '{}'", ENV_PREFIX, flag))?,
            None => config.preload_model,
        };
        config.log_format = parse_or(&var, "LOG_FORMAT", config.log_format)?;

        Ok(config)
    }

    /// Defaults rooted at `home_dir`, without consulting the environment.
    pub fn for_home(home_dir: PathBuf) -> Self {
        let provider = EmbeddingProvider::Onnx;
        let mut config = Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            store_dir: home_dir.join("tool_embeddings"),
            runtime_dir: home_dir.join("embedding_server"),
            tools_path: Some(home_dir.join("tools.json")),
            provider,
            model_id: String::new(),
            model_path: home_dir.join("models").join("model.onnx"),
            tokenizer_path: home_dir.join("models").join("tokenizer.json"),
            max_sequence_length: 512,
            intra_threads: 4,
            hashing_dims: 384,
            default_top_k: 5,
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            health_timeout: Duration::from_secs(1),
            search_timeout: Duration::from_secs(30),
            update_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(5),
            drain_secs: 1,
            preload_model: false,
            log_format: LogFormat::Text,
            home_dir,
        };
        config.model_id = config.default_model_id();
        config
    }

    /// Switch to the hashing backend, keeping the model id in step.
    pub fn with_hashing_backend(mut self, dims: usize) -> Self {
        self.provider = EmbeddingProvider::Hashing;
        self.hashing_dims = dims;
        self.model_id = self.default_model_id();
        self
    }

    /// Base URL of the resident server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn default_model_id(&self) -> String {
        match self.provider {
            EmbeddingProvider::Onnx => "bge-base-en-v1.5".to_string(),
            EmbeddingProvider::Hashing => format!("hashing-ngram-{}", self.hashing_dims),
        }
    }
}

fn default_home_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .context("cannot determine a per-user configuration directory; set TOOLSEEK_HOME")?;
    Ok(base.join("toolseek"))
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}{} '{}': {}", ENV_PREFIX, name, raw, e)),
        None => Ok(default),
    }
}

fn millis_or<F>(var: &F, name: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let millis = parse_or(var, name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}
