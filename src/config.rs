use eyre::{Context, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

static DEFAULT_TRACE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spoor")
        .join("traces")
});

/// Main spoor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: LogLevel,
    pub trace: TraceConfig,
    /// Command aliases expanded (and recorded) by the child runner
    pub aliases: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    pub fn filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Off => log::LevelFilter::Off,
        }
    }
}

/// Trace sink type
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceSinkKind {
    /// Write JSONL, one file per process under the trace directory (default)
    File,
    /// Render events to stderr
    Stderr,
    /// POST events to an HTTP endpoint
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Enable tracing
    pub enabled: bool,
    /// Which sinks receive events
    pub sinks: Vec<TraceSinkKind>,
    /// Directory holding the per-process JSONL files
    pub dir: PathBuf,
    /// Endpoint for the http sink
    pub http_endpoint: Option<String>,
    /// Terminate fatally at exit if recoverable defects were recorded
    pub escalate_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            trace: TraceConfig::default(),
            aliases: IndexMap::new(),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sinks: vec![TraceSinkKind::File],
            dir: DEFAULT_TRACE_DIR.clone(),
            http_endpoint: None,
            escalate_on_exit: false,
        }
    }
}

impl TraceConfig {
    /// The "interesting" settings reported as def_param events at startup.
    pub fn def_params(&self) -> Vec<(String, String)> {
        let sinks = self
            .sinks
            .iter()
            .map(|s| format!("{s:?}").to_lowercase())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            ("trace.sinks".to_string(), sinks),
            ("trace.dir".to_string(), self.dir.display().to_string()),
            ("trace.escalate_on_exit".to_string(), self.escalate_on_exit.to_string()),
        ]
    }

    /// Apply the `SPOOR_TRACE=<dir>` override: force-enable the file sink
    /// into `<dir>`. Children inherit the variable, so a whole spawn tree
    /// traces into one directory.
    fn apply_trace_override(&mut self, dir: Option<String>) {
        let Some(dir) = dir.filter(|d| !d.is_empty()) else {
            return;
        };
        self.enabled = true;
        self.dir = PathBuf::from(dir);
        if !self.sinks.contains(&TraceSinkKind::File) {
            self.sinks.push(TraceSinkKind::File);
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_chain(config_path)?;
        config.trace.apply_trace_override(std::env::var("SPOOR_TRACE").ok());
        Ok(config)
    }

    fn load_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Check SPOOR_CONFIG env var
        if let Ok(env_path) = std::env::var("SPOOR_CONFIG") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from SPOOR_CONFIG: {}", e);
                    }
                }
            }
        }

        // Try SPOOR_DIR/spoor.yaml
        if let Ok(spoor_dir) = std::env::var("SPOOR_DIR") {
            let path = PathBuf::from(spoor_dir).join("spoor.yaml");
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from SPOOR_DIR: {}", e);
                    }
                }
            }
        }

        // Try ~/.config/spoor/spoor.yaml
        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("spoor").join("spoor.yaml");
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Try ./spoor.yaml (for development)
        let local_config = PathBuf::from("spoor.yaml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load local config: {}", e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Expand a path that may contain ~ or env vars
    pub fn expand_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = shellexpand::full(&path_str).unwrap_or_else(|_| path_str.clone());
        PathBuf::from(expanded.as_ref())
    }
}
