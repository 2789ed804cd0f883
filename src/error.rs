//! Classified errors for every stage of the kindly pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the kindly core.
///
/// Every variant carries enough context to tell the user which package,
/// URL or file the failure belongs to.
#[derive(Debug, Error)]
pub enum KindlyError {
    /// A requested version is not a valid semantic version.
    #[error("invalid package version: {0}")]
    InvalidVersion(String),

    /// The spec document could not be fetched or parsed.
    #[error("spec for {name} unavailable: {reason}")]
    SpecUnavailable { name: String, reason: String },

    /// The spec document exists but names no package.
    #[error("unavailable package: {0}")]
    PackageUnavailable(String),

    /// The requested version is newer than the published one.
    #[error("version requested: {name}@{requested}, latest version: {name}@{published}")]
    VersionNotFound {
        name: String,
        requested: String,
        published: String,
    },

    /// The spec has no asset for the configured `os_arch` key.
    #[error("unavailable OS architecture for {name}: {os_arch}")]
    PlatformUnsupported { name: String, os_arch: String },

    /// A template could not be parsed or did not expand to something usable.
    #[error("invalid template {template:?}: {reason}")]
    TemplateInvalid { template: String, reason: String },

    /// Connection or request deadline elapsed.
    #[error("network timeout while fetching {0}")]
    NetworkTimeout(String),

    /// The execution context was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport failure other than a timeout.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The artifact digest differs from the published checksum.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// An archive entry would be written outside the extraction directory.
    #[error("illegal file path in archive: {0}")]
    PathTraversal(String),

    /// The archive could not be read.
    #[error("invalid archive {path}: {reason}")]
    ArchiveInvalid { path: PathBuf, reason: String },

    /// No manifest is recorded for the package.
    #[error("package {0} is not installed")]
    ManifestNotFound(String),

    /// A filesystem operation failed.
    #[error("{action} {path}: {source}")]
    FileOperationFailed {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl KindlyError {
    /// Wraps an I/O error with the operation and path it happened on.
    pub fn file_op(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOperationFailed {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn template(template: &str, reason: impl Into<String>) -> Self {
        Self::TemplateInvalid {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from a timeout or a cancelled context.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::NetworkTimeout(_) | Self::Cancelled)
    }
}

/// States of the per-package install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Fetching,
    Verifying,
    Extracting,
    Placing,
    ManifestWriting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::Verifying => "verifying",
            Stage::Extracting => "extracting",
            Stage::Placing => "placing",
            Stage::ManifestWriting => "writing manifest",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// A failed install, attributed to one package and the stage it failed in.
#[derive(Debug, Error)]
#[error("{package}: failed while {stage}: {error}")]
pub struct PipelineError {
    pub package: String,
    pub stage: Stage,
    #[source]
    pub error: KindlyError,
}

impl PipelineError {
    pub fn new(package: impl Into<String>, stage: Stage, error: KindlyError) -> Self {
        Self {
            package: package.into(),
            stage,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_not_found_reports_both_versions() {
        let err = KindlyError::VersionNotFound {
            name: "gh".to_string(),
            requested: "v3.0.0".to_string(),
            published: "v2.4.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "version requested: gh@v3.0.0, latest version: gh@v2.4.0"
        );
    }

    #[test]
    fn pipeline_error_names_package_and_stage() {
        let err = PipelineError::new(
            "ripgrep",
            Stage::Verifying,
            KindlyError::ChecksumMismatch {
                file: "rg.tar.gz".to_string(),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("ripgrep: failed while verifying"));
        assert!(msg.contains("expected aa, got bb"));
    }

    #[test]
    fn interrupted_covers_timeout_and_cancel() {
        assert!(KindlyError::Cancelled.is_interrupted());
        assert!(KindlyError::NetworkTimeout("u".into()).is_interrupted());
        assert!(!KindlyError::PathTraversal("x".into()).is_interrupted());
    }
}
