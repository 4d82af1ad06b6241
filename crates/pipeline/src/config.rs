//! Pipeline configuration, loadable from TOML or JSON.

use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    thiserror::Error,
    tracing::debug,
};

use crate::diagnostics::Severity;

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("unsupported config format: {path}")]
    UnsupportedFormat { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline identifier. A UUID is generated when absent.
    pub id: Option<String>,
    /// Default outgoing payload. Caller data is layered on top.
    pub defaults: Map<String, Value>,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            id: None,
            defaults: Map::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Install the tracing-backed log sink.
    pub enabled: bool,
    /// Lines below this severity are dropped.
    pub min_severity: Severity,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: Severity::Debug,
        }
    }
}

/// Load config from `path`, choosing the parser by file extension.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loading pipeline config");
    parse_config(&raw, path)
}

/// Parse config text; `path` only selects the format.
pub fn parse_config(raw: &str, path: &Path) -> Result<PipelineConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}
