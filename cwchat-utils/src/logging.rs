//! Logging infrastructure for cwchat
//!
//! Provides unified logging setup using the tracing ecosystem.
//!
//! The worker process must never log to stdout: stdout carries the
//! JSON-RPC stream back to the bridge. [`LogConfig::worker`] therefore
//! always writes to stderr, which the bridge forwards into its own log.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, CwchatError, Result};

/// Environment variable holding the default log filter
pub const LOG_ENV: &str = "CWCHAT_LOG";

/// Environment variable holding the worker's log filter
pub const WORKER_LOG_ENV: &str = "CWCHAT_WORKER_LOG";

/// Environment variable that, when set, also writes server logs to a file
pub const LOG_FILE_ENV: &str = "CWCHAT_LOG_FILE";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file under the state directory
    File,
    /// Log to both stderr and file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "debug", "cwchat_server=debug,tokio=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
    /// Optional custom log file name (defaults to "cwchat.log")
    pub file_name: Option<String>,
    /// Emit ANSI colors on stderr
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
            file_name: None,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Config for the front-end server
    pub fn server() -> Self {
        let output = if std::env::var_os(LOG_FILE_ENV).is_some() {
            LogOutput::Both
        } else {
            LogOutput::Stderr
        };

        Self {
            output,
            filter: std::env::var(LOG_ENV).unwrap_or_else(|_| "info".into()),
            span_events: false,
            file_line: true,
            file_name: Some("cwchat-server.log".into()),
            ansi: true,
        }
    }

    /// Config for the tool worker (stderr only, no colors)
    pub fn worker() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: std::env::var(WORKER_LOG_ENV)
                .or_else(|_| std::env::var(LOG_ENV))
                .unwrap_or_else(|_| "warn".into()),
            span_events: false,
            file_line: false,
            file_name: None,
            ansi: false,
        }
    }

    /// Config for the CLI client (quiet unless asked)
    pub fn client() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".into()),
            ..Self::default()
        }
    }

    /// Config for development (verbose stderr)
    pub fn development() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            span_events: true,
            file_line: true,
            file_name: None,
            ansi: true,
        }
    }
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| CwchatError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let fmt_layer = if config.span_events {
        fmt_layer.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
    } else {
        fmt_layer
    };

    let fmt_layer = if config.file_line {
        fmt_layer.with_file(true).with_line_number(true)
    } else {
        fmt_layer.with_file(false).with_line_number(false)
    };

    let file_name = config.file_name.as_deref().unwrap_or("cwchat.log");

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt_layer
                        .with_writer(std::io::stderr)
                        .with_ansi(config.ansi),
                )
                .try_init()
                .map_err(|e| CwchatError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let file = open_log_file(file_name)?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(file).with_ansi(false))
                .try_init()
                .map_err(|e| CwchatError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::Both => {
            let file = open_log_file(file_name)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt_layer
                        .with_writer(std::io::stderr)
                        .with_ansi(config.ansi),
                )
                .with(file_layer)
                .try_init()
                .map_err(|e| CwchatError::internal(format!("Failed to init logging: {}", e)))?;
        }
    }

    Ok(())
}

fn open_log_file(file_name: &str) -> Result<std::fs::File> {
    let log_dir = paths::log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|e| CwchatError::FileWrite {
        path: log_dir.clone(),
        source: e,
    })?;

    let log_path = log_dir.join(file_name);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| CwchatError::FileWrite {
            path: log_path,
            source: e,
        })
}
