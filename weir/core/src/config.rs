//! TOML Configuration File Support
//!
//! Centralized configuration loading for weir, supporting a TOML
//! configuration file at `~/.config/weir/weir.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [multiplex]
//! timeout_secs = 30
//! terminator = "\n"
//! read_buffer = 64
//! max_line_bytes = 65536
//!
//! [[sources]]
//! tag = "modelA"
//! url = "http://localhost:8001/stream"
//!
//! [[sources]]
//! tag = "modelB"
//! url = "http://localhost:8002/stream"
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address for the merge endpoint.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Default per-source channel capacity, in lines.
pub const DEFAULT_READ_BUFFER: usize = 64;

/// Default upper bound on a single upstream line, in bytes. A line that
/// grows past this without a terminator fails its source.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// One configured upstream feed: a tag for framing and the address to GET.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Label prefixed to every line from this feed
    pub tag: String,
    /// Streaming endpoint address
    pub url: String,
}

impl SourceSpec {
    /// Create a source spec from a tag and an address.
    pub fn new(tag: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            url: url.into(),
        }
    }
}

/// Fully resolved weir configuration.
#[derive(Clone, Debug)]
pub struct WeirConfig {
    /// Listen address for the merge endpoint
    pub bind: SocketAddr,
    /// Upstream feeds to merge
    pub sources: Vec<SourceSpec>,
    /// Optional global deadline for one merge run
    pub timeout: Option<Duration>,
    /// Line terminator appended to every emitted line
    pub terminator: String,
    /// Per-source channel capacity, in lines
    pub read_buffer: usize,
    /// Upper bound on a single upstream line, in bytes
    pub max_line_bytes: usize,
}

impl Default for WeirConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().expect("default bind address parses"),
            // The two local mock feeds, same targets the daemon serves
            // under --with-mocks.
            sources: vec![
                SourceSpec::new("modelA", "http://localhost:8001/stream"),
                SourceSpec::new("modelB", "http://localhost:8002/stream"),
            ],
            timeout: None,
            terminator: "\n".to_string(),
            read_buffer: DEFAULT_READ_BUFFER,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl WeirConfig {
    /// Validate invariants that TOML parsing cannot express.
    ///
    /// Checks that source tags are unique and non-empty, that urls are
    /// non-empty, and that the terminator is non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terminator.is_empty() {
            return Err(ConfigError::ValidationError(
                "terminator must not be empty".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.tag.is_empty() {
                return Err(ConfigError::ValidationError(
                    "source tag must not be empty".to_string(),
                ));
            }
            if source.url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "source {} has an empty url",
                    source.tag
                )));
            }
            if !seen.insert(source.tag.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate source tag: {}",
                    source.tag
                )));
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (`WEIR_BIND`,
    /// `WEIR_TIMEOUT_SECS`). Unparseable values are ignored in favor of
    /// the current setting.
    pub fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("WEIR_BIND") {
            if let Ok(addr) = bind.parse() {
                self.bind = addr;
            }
        }
        if let Ok(secs) = std::env::var("WEIR_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.timeout = Some(Duration::from_secs(secs));
            }
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ServerToml {
    /// Listen address, e.g. "127.0.0.1:8080"
    bind: Option<String>,
}

/// Multiplex section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MultiplexToml {
    /// Global deadline for one merge run, in seconds
    timeout_secs: Option<u64>,
    /// Line terminator byte sequence
    terminator: Option<String>,
    /// Per-source channel capacity, in lines
    read_buffer: Option<usize>,
    /// Upper bound on a single upstream line, in bytes
    max_line_bytes: Option<usize>,
}

/// Top-level TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WeirToml {
    server: ServerToml,
    multiplex: MultiplexToml,
    sources: Vec<SourceSpec>,
}

impl WeirToml {
    fn resolve(self) -> Result<WeirConfig, ConfigError> {
        let mut config = WeirConfig::default();

        if let Some(bind) = self.server.bind {
            config.bind = bind
                .parse()
                .map_err(|e| ConfigError::ValidationError(format!("bad bind address: {e}")))?;
        }
        if let Some(secs) = self.multiplex.timeout_secs {
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(terminator) = self.multiplex.terminator {
            config.terminator = terminator;
        }
        if let Some(read_buffer) = self.multiplex.read_buffer {
            config.read_buffer = read_buffer.max(1);
        }
        if let Some(max_line_bytes) = self.multiplex.max_line_bytes {
            config.max_line_bytes = max_line_bytes;
        }
        if !self.sources.is_empty() {
            config.sources = self.sources;
        }

        Ok(config)
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default config file path.
///
/// Follows the XDG Base Directory specification:
/// `$XDG_CONFIG_HOME/weir/weir.toml` (typically `~/.config/weir/weir.toml`).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("weir").join("weir.toml"))
}

/// Load configuration from an explicit path.
///
/// Returns `ReadError` if the file cannot be read, `ParseError` if it is
/// not valid TOML, and `ValidationError` for semantic problems.
pub fn load_config_from_path(path: &Path) -> Result<WeirConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed: WeirToml = toml::from_str(&contents)?;
    let mut config = parsed.resolve()?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Load configuration, preferring an explicit path, then the default XDG
/// path if it exists, then built-in defaults. Environment overrides are
/// applied on top of whatever was loaded.
pub fn load_config(path: Option<&Path>) -> Result<WeirConfig, ConfigError> {
    if let Some(path) = path {
        return load_config_from_path(path);
    }

    if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            return load_config_from_path(&default_path);
        }
    }

    let mut config = WeirConfig::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
}
