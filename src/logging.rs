// ============================================
// logging.rs - Log setup and redaction helpers
// ============================================
//
// The library only EMITS tracing events; it never installs a
// subscriber and never prints. The shell calls `init_logging()` once:
//
//   <log_dir>/application.log   everything at DEBUG and above
//   console (stderr)            the configured level (default INFO)
//
// Registry keys can embed user SIDs or tenant names and file paths
// contain the user name, so anything identifying goes through the
// redact_* helpers below before it is logged.
// ============================================

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;

/// Log file written inside the log directory.
pub const LOG_FILE_NAME: &str = "application.log";

/// Install the global subscriber (file + console).
///
/// Keep the returned guard alive until exit; dropping it flushes the
/// file writer. `RUST_LOG` overrides the console level when set.
pub fn init_logging(log_dir: &Path, settings: &LoggingSettings) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("debug"));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    // try_init: a second call (tests, embedding) is not an error
    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    Ok(guard)
}

// ============================================
// REDACTION
// ============================================

/// Short stable fingerprint of a string (first 4 bytes of SHA-256, hex).
fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.to_lowercase().as_bytes());
    hex::encode(&digest[..4])
}

/// Redact a registry key for logging: keep the hive, hash the rest.
///
///   HKLM\SOFTWARE\Microsoft\Office\ClickToRun\Configuration
///     -> HKLM\#3f9a01c2
///
/// The same key always maps to the same fingerprint, so log lines for
/// one candidate can still be correlated.
pub fn redact_key(key: &str) -> String {
    match key.split_once('\\') {
        Some((hive, rest)) if !rest.is_empty() => format!("{}\\#{}", hive, fingerprint(rest)),
        _ => format!("#{}", fingerprint(key)),
    }
}

/// Redact a registry value name for logging.
pub fn redact_value_name(name: &str) -> String {
    format!("#{}", fingerprint(name))
}

/// Replace the user's home directory with %USERPROFILE% in a path.
pub fn redact_path(path: &Path) -> String {
    let text = path.display().to_string();
    match dirs::home_dir() {
        Some(home) => {
            let home = home.display().to_string();
            if !home.is_empty() && text.starts_with(&home) {
                format!("%USERPROFILE%{}", &text[home.len()..])
            } else {
                text
            }
        }
        None => text,
    }
}
