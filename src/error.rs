// ============================================
// error.rs - Typed failures returned by the core
// ============================================
//
// Every operation in the core returns one of these instead of printing
// or prompting. The command-line shell (main.rs) decides how to show
// them. Nothing here is fatal to the process.
//
//   RegistryAccessError  -> a candidate is skipped, the scan continues
//   ResolutionError      -> resolve_artifact aborts
//   DownloadError{kind}  -> download_artifact aborts (network retried first)
//   BuildError           -> configuration document not produced
//   ConfigError          -> settings file could not be loaded/saved
// ============================================

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for callers that drive several components at once.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryAccessError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================
// REGISTRY
// ============================================

/// The key exists but could not be read or its value could not be decoded.
///
/// A missing key or value is NOT an error; the accessor reports it as `None`.
#[derive(Debug, Error)]
pub enum RegistryAccessError {
    #[error("registry path has no recognised hive: {key}")]
    UnknownHive { key: String },

    #[error("access denied opening {key}")]
    AccessDenied { key: String },

    #[error("could not decode value {value} under {key}: {reason}")]
    Decode {
        key: String,
        value: String,
        reason: String,
    },

    #[error("registry call failed on {key} (status {status})")]
    Os { key: String, status: i32 },
}

// ============================================
// RESOLUTION
// ============================================

/// Failure to turn a product family into a trusted artifact descriptor.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("network failure fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("vendor page returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("vendor page exceeds {limit} bytes")]
    PageTooLarge { limit: u64 },

    #[error("no deployment tool download link found on {url}")]
    LinkNotFound { url: String },

    #[error("host {host} is not on the download allow-list")]
    DomainRejected { host: String },

    #[error("refusing non-https download URL {url}")]
    InsecureScheme { url: String },

    #[error("unusable file name advertised by vendor: {name:?}")]
    UnsafeFilename { name: String },

    #[error("download metadata incomplete for {url}: {reason}")]
    Metadata { url: String, reason: String },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client setup failed: {reason}")]
    Client { reason: String },
}

// ============================================
// DOWNLOAD
// ============================================

/// Which check a download failed.
///
/// Only `Network` is ever retried; the mismatch kinds mean the bytes
/// cannot be trusted and a retry would not change that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    Network,
    SizeMismatch,
    NameMismatch,
    DomainRejected,
    /// Local disk failure (create/write/sync/rename of the artifact).
    Storage,
}

impl fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadErrorKind::Network => write!(f, "network"),
            DownloadErrorKind::SizeMismatch => write!(f, "size-mismatch"),
            DownloadErrorKind::NameMismatch => write!(f, "name-mismatch"),
            DownloadErrorKind::DomainRejected => write!(f, "domain-rejected"),
            DownloadErrorKind::Storage => write!(f, "storage"),
        }
    }
}

#[derive(Debug, Error)]
#[error("download failed ({kind}): {detail}")]
pub struct DownloadError {
    pub kind: DownloadErrorKind,
    pub detail: String,
}

impl DownloadError {
    pub fn new(kind: DownloadErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(DownloadErrorKind::Network, detail)
    }

    pub fn storage(detail: impl Into<String>) -> Self {
        Self::new(DownloadErrorKind::Storage, detail)
    }

    /// True when the artifact itself failed validation.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self.kind,
            DownloadErrorKind::SizeMismatch | DownloadErrorKind::NameMismatch
        )
    }
}

// ============================================
// CONFIGURATION DOCUMENTS
// ============================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no installations selected")]
    EmptySelection,

    #[error("installation {display_name:?} has no product ID")]
    UnidentifiedProduct { display_name: String },

    #[error("invalid language tag {tag:?}")]
    InvalidLanguage { tag: String },
}

// ============================================
// SETTINGS
// ============================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write settings {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_kind_display() {
        assert_eq!(DownloadErrorKind::SizeMismatch.to_string(), "size-mismatch");
        assert_eq!(DownloadErrorKind::DomainRejected.to_string(), "domain-rejected");
    }

    #[test]
    fn test_validation_failures() {
        assert!(DownloadError::new(DownloadErrorKind::NameMismatch, "x").is_validation_failure());
        assert!(!DownloadError::network("reset").is_validation_failure());
    }
}
