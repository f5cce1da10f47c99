// ============================================
// config.rs - Settings (officedeploy.toml)
// ============================================
//
// All tunables live in one TOML file next to the EXE:
//
//   officedeploy.exe
//   officedeploy.toml      <- optional; missing file = defaults
//
// Every field has a default, so a settings file only needs the keys
// the user wants to change, e.g.
//
//   [retry]
//   max_attempts = 8
//
// A missing file is not an error. A file that exists but does not
// parse IS an error: silently ignoring a typo in the allow-list would
// be worse than refusing to start.
// ============================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Default settings file name (looked up next to the EXE).
pub const SETTINGS_FILE_NAME: &str = "officedeploy.toml";

/// Vendor page for a deployment tool download; `{id}` is the download ID.
pub const DEFAULT_PAGE_URL: &str = "https://www.microsoft.com/en-us/download/details.aspx?id={id}";

/// Hosts trusted to serve the deployment tool package.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &["download.microsoft.com"];

// ============================================
// SETTINGS STRUCTURES
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkSettings,
    pub retry: RetrySettings,
    pub resolver: ResolverSettings,
    pub paths: PathSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    pub user_agent: String,
    /// Vendor page template; `{id}` is replaced by the family's download ID
    pub page_url: String,
    /// Download hosts we accept (exact match or subdomain)
    pub allowed_domains: Vec<String>,
    /// Refuse plain-http download links
    pub require_https: bool,
    /// Ceiling for the vendor page body, in bytes
    pub max_page_bytes: u64,
    pub connect_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    /// Per-attempt timeout for the artifact download itself
    pub download_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("OfficeDeploy/{}", env!("CARGO_PKG_VERSION")),
            page_url: DEFAULT_PAGE_URL.to_string(),
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            require_https: true,
            max_page_bytes: 2 * 1024 * 1024, // 2 MB
            connect_timeout_secs: 10,
            page_timeout_secs: 15,
            metadata_timeout_secs: 10,
            download_timeout_secs: 300, // 5 minutes, same as the tool downloads
        }
    }
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// 0.0 = no jitter, 1.0 = +/-50% of the delay
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverSettings {
    pub cache_capacity: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self { cache_capacity: 100 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// Where deployment tools and configuration files go.
    /// Empty = <system temp>/OfficeDeploy
    pub work_dir: Option<PathBuf>,
    /// Where application.log is written. Empty = <work_dir>/logs
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Console filter, e.g. "info" or "officedeploy=debug"
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================
// LOAD / SAVE
// ============================================

impl Settings {
    /// Load settings from a specific file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file if it exists, otherwise use the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        fs::write(path, text).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reject settings that would make the core unsafe or useless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.allowed_domains.iter().all(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "network.allowed_domains",
                reason: "at least one download domain is required".to_string(),
            });
        }
        if !self.network.page_url.contains("{id}") {
            return Err(ConfigError::Invalid {
                field: "network.page_url",
                reason: "template must contain {id}".to_string(),
            });
        }
        if self.resolver.cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "resolver.cache_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Working directory, falling back to <temp>/OfficeDeploy.
    pub fn work_dir(&self) -> PathBuf {
        self.paths
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("OfficeDeploy"))
    }

    /// Log directory, falling back to <work_dir>/logs.
    pub fn log_dir(&self) -> PathBuf {
        self.paths
            .log_dir
            .clone()
            .unwrap_or_else(|| self.work_dir().join("logs"))
    }
}

// ============================================
// PATH HELPERS
// ============================================

/// Get the directory where the EXE is located.
///
/// Settings are kept next to the EXE so the tool stays portable
/// (copy it to a USB stick together with its officedeploy.toml).
pub fn app_directory() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        let resolved = exe_path.canonicalize().unwrap_or(exe_path);
        if let Some(parent) = resolved.parent() {
            // Strip \\?\ prefix that canonicalize adds on Windows
            let parent_str = parent.to_string_lossy();
            if let Some(stripped) = parent_str.strip_prefix(r"\\?\") {
                return PathBuf::from(stripped);
            }
            return parent.to_path_buf();
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Default settings path: officedeploy.toml next to the EXE.
pub fn default_settings_path() -> PathBuf {
    app_directory().join(SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [retry]
            max_attempts = 8

            [network]
            allowed_domains = ["download.microsoft.com", "officecdn.microsoft.com"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.retry.max_attempts, 8);
        assert_eq!(settings.retry.initial_delay_ms, 1_000);
        assert_eq!(settings.network.allowed_domains.len(), 2);
        assert!(settings.network.require_https);
        assert_eq!(settings.resolver.cache_capacity, 100);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "[retry\nmax_attempts = ").unwrap();

        assert!(matches!(
            Settings::load_or_default(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_allow_list_rejected() {
        let mut settings = Settings::default();
        settings.network.allowed_domains.clear();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "network.allowed_domains", .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);

        let mut settings = Settings::default();
        settings.resolver.cache_capacity = 4;
        settings.paths.work_dir = Some(dir.path().join("work"));
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.log_dir(), dir.path().join("work").join("logs"));
    }
}
