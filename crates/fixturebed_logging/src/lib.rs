//! Diagnostics setup for fixturebed test runs.
//!
//! Call [`initialize_diagnostics`] once at the start of a test binary (every
//! call after the first is a no-op). Console output goes through the test
//! writer so `cargo test` captures it per test.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the log filter directives.
pub const LOG_FILTER_ENV: &str = "FIXTUREBED_LOG";

/// Environment variable naming a directory for an additional log file.
pub const LOG_DIR_ENV: &str = "FIXTUREBED_LOG_DIR";

const DEFAULT_LOG_FILTER: &str = "fixturebed=info,fixturebed_sqlite=info,fixturebed_domain=info";
const DEFAULT_LOG_FILE_NAME: &str = "fixturebed";

static DIAGNOSTICS: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Diagnostics settings.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    /// When set, events are also appended to `<log_dir>/<file_name>.log`.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
            file_name: DEFAULT_LOG_FILE_NAME.to_string(),
        }
    }
}

impl DiagnosticsConfig {
    /// Defaults overridden by `FIXTUREBED_LOG` and `FIXTUREBED_LOG_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
            if !filter.trim().is_empty() {
                config.filter = filter;
            }
        }
        if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        config
    }

    /// Path of the log file, if a log directory is configured.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", sanitize_name(&self.file_name))))
    }
}

/// Initialize diagnostics from the environment.
pub fn initialize_diagnostics() -> Result<()> {
    initialize_diagnostics_with(DiagnosticsConfig::from_env())
}

/// Initialize diagnostics with explicit settings.
///
/// Only the first call installs anything; later calls return the outcome of
/// the first one. A subscriber installed by someone else is left in place.
pub fn initialize_diagnostics_with(config: DiagnosticsConfig) -> Result<()> {
    DIAGNOSTICS
        .get_or_init(|| install(&config).map_err(|e| format!("{:#}", e)))
        .clone()
        .map_err(|e| anyhow!(e))
}

/// Whether diagnostics were initialized successfully.
pub fn diagnostics_initialized() -> bool {
    matches!(DIAGNOSTICS.get(), Some(Ok(())))
}

fn install(config: &DiagnosticsConfig) -> Result<()> {
    let file_layer = match config.log_file_path() {
        Some(path) => {
            let writer = SharedFileWriter::open(&path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(build_filter(&config.filter)?),
            )
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_filter(build_filter(&config.filter)?);

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already set, keeping it");
    }
    Ok(())
}

fn build_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter: {}", directives))
}

/// Append-only log file shared by every event.
#[derive(Clone)]
struct SharedFileWriter {
    inner: Arc<Mutex<File>>,
}

impl SharedFileWriter {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct SharedFileWriterGuard {
    inner: Arc<Mutex<File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_is_sanitized() {
        let config = DiagnosticsConfig {
            log_dir: Some(PathBuf::from("/tmp/logs")),
            file_name: "suite one/two".to_string(),
            ..DiagnosticsConfig::default()
        };
        assert_eq!(
            config.log_file_path(),
            Some(PathBuf::from("/tmp/logs/suite_one_two.log"))
        );
        assert_eq!(DiagnosticsConfig::default().log_file_path(), None);
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        assert!(build_filter("fixturebed=notalevel").is_err());
        assert!(build_filter(DEFAULT_LOG_FILTER).is_ok());
    }

    // The only test that installs the global subscriber.
    #[test]
    fn test_initialize_is_idempotent_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiagnosticsConfig {
            filter: "info".to_string(),
            log_dir: Some(dir.path().join("logs")),
            file_name: "run".to_string(),
        };
        let path = config.log_file_path().unwrap();

        initialize_diagnostics_with(config).unwrap();
        initialize_diagnostics().unwrap();
        assert!(diagnostics_initialized());

        tracing::info!(suite = "Orders", "diagnostics ready");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("diagnostics ready"), "log file: {contents}");
    }
}
