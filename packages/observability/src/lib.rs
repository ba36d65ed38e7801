//! # Observability
//!
//! Structured logging for the Pett login tools.
//!
//! Binaries call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Library crates never install a
//! subscriber.
//!
//! Every event is written as one JSON line to `~/.pett/logs/dev.jsonl`
//! (or [`LogConfig::log_path`]), so several processes can share the file:
//!
//! - `tail -f ~/.pett/logs/dev.jsonl | jq`
//! - `lnav ~/.pett/logs/dev.jsonl`
//!
//! Fields that carry credentials (`token`, `secret`, `password`, ...) are
//! redacted before they reach the file. Length and presence fields such as
//! `token_len` are kept.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "pett-login".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     })?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

mod file;
mod json_layer;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file::{default_log_path, CentralLogWriter, WriterFactory};
pub use json_layer::{is_sensitive_field, JsonLayer, LogEntry, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the binary, included in every log line for filtering.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info"). `RUST_LOG` wins when set.
    pub default_level: String,

    /// Custom log file path. Defaults to `~/.pett/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Write the JSONL file at all.
    pub file_output: bool,

    /// Also emit compact human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            file_output: true,
            also_stderr: false,
        }
    }
}

impl LogConfig {
    /// File the JSON layer writes to, if any.
    pub fn resolved_log_path(&self) -> Option<PathBuf> {
        if !self.file_output {
            return None;
        }
        self.log_path.clone().or_else(default_log_path)
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Fails only if the log file cannot be created. A second call in the same
/// process leaves the first subscriber in place.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let log_path = config.resolved_log_path();

    let json_layer = match &log_path {
        Some(path) => {
            let writer = CentralLogWriter::new(path)?;
            Some(
                JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_filter(env_filter(&config.default_level))
    });

    if tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_err()
    {
        return Ok(());
    }

    tracing::debug!(
        service = %config.service_name,
        log_path = ?log_path,
        "observability initialized"
    );
    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
