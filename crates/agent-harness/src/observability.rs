use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "agent-harness.logs.jsonl";

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// Compact human-readable lines on stderr.
    Stderr,
    /// One JSON object per line, appended to the file.
    JsonFile(PathBuf),
}

/// Subscriber settings, usually read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directives; `None` defers to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    pub sink: LogSink,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            sink: LogSink::Stderr,
        }
    }
}

impl ObservabilityConfig {
    /// Reads the settings from the process environment:
    ///
    /// - `AGENT_HARNESS_OBSERVABILITY`: `0`/`false`/`no`/`off` disables installation.
    ///   Unrecognized values keep it enabled.
    /// - `AGENT_HARNESS_LOG_LEVEL`: filter directives (`info`, `agent_harness=debug`, ...).
    /// - `AGENT_HARNESS_JSON_LOG_PATH`: switches output to a JSONL file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("AGENT_HARNESS_OBSERVABILITY")
            .and_then(|value| parse_flag(&value))
            .unwrap_or(true);
        let filter = lookup("AGENT_HARNESS_LOG_LEVEL").filter(|level| !level.trim().is_empty());
        let sink = match lookup("AGENT_HARNESS_JSON_LOG_PATH") {
            Some(path) if !path.trim().is_empty() => LogSink::JsonFile(PathBuf::from(path)),
            _ => LogSink::Stderr,
        };
        Self {
            enabled,
            filter,
            sink,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(directives) = &self.filter
            && let Ok(filter) = EnvFilter::try_new(directives)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name `tracing-appender` expects.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_JSON_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs a global `tracing` subscriber from [`ObservabilityConfig::from_env`].
///
/// The library never calls this itself; binaries and examples opt in. Only the
/// first call in a process has an effect.
pub fn init_observability() {
    init_observability_with(ObservabilityConfig::from_env());
}

/// Like [`init_observability`], with explicit settings.
pub fn init_observability_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }
        let env_filter = config.env_filter();
        match &config.sink {
            LogSink::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init();
            }
            LogSink::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}
