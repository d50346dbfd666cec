//! Error types shared by every filevault crate.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors produced by the sandbox, the operations engine and the job layer.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed input from the caller.
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// The path contains characters that are never accepted.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The path would resolve outside the storage root.
    #[error("Path traversal attempt detected: {path}")]
    PathTraversal { path: String },

    /// An archive entry would be written outside its destination.
    #[error("Archive entry escapes destination: {entry}")]
    UnsafeArchiveEntry { entry: String },

    /// Missing source, job or trash record.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// The write target is already taken.
    #[error("Target already exists: {path}")]
    AlreadyExists { path: String },

    /// A restore target is occupied.
    #[error("Path conflict: {path} already exists")]
    PathConflict { path: String },

    /// Collision that the caller has to resolve, optionally listing every entry.
    #[error("{message}")]
    Conflict {
        message: String,
        conflicts: Vec<String>,
    },

    /// The OS refused access.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The archive could not be read or written.
    #[error("Archive error at {path}: {message}")]
    Archive { path: String, message: String },

    /// A persistence repository failed.
    #[error("Repository error: {message}")]
    Repository { message: String },

    /// Unexpected failure.
    #[error("{message}")]
    Internal { message: String },
}

/// Coarse error taxonomy exposed to callers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    PathTraversal,
    InvalidPath,
    NotFound,
    AlreadyExists,
    Conflict,
    PermissionDenied,
    Internal,
}

impl VaultError {
    /// Create an I/O error with path context.
    ///
    /// Not-found, permission and already-exists failures are lifted into their
    /// dedicated variants so callers can match on them.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { resource: path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            _ => Self::Io { path, source },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, conflicts: Vec<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            conflicts,
        }
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::PathTraversal { .. } | Self::UnsafeArchiveEntry { .. } => {
                ErrorKind::PathTraversal
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::PathConflict { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Io { .. }
            | Self::Archive { .. }
            | Self::Repository { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, e.g. `PATH_TRAVERSAL`.
    pub fn code(&self) -> &'static str {
        self.kind().into()
    }

    /// Rewrite the filesystem path carried by path-bearing variants.
    ///
    /// `rewrite` returns `None` to keep a path unchanged.
    pub fn map_path(self, rewrite: impl Fn(&str) -> Option<String>) -> Self {
        let apply = |path: String| rewrite(&path).unwrap_or(path);
        match self {
            Self::NotFound { resource } => Self::NotFound {
                resource: apply(resource),
            },
            Self::AlreadyExists { path } => Self::AlreadyExists { path: apply(path) },
            Self::PermissionDenied { path } => Self::PermissionDenied { path: apply(path) },
            Self::Io { path, source } => Self::Io {
                path: apply(path),
                source,
            },
            Self::Archive { path, message } => Self::Archive {
                path: apply(path),
                message,
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Conflicting entry names carried by a `Conflict` error.
    pub fn conflicts(&self) -> &[String] {
        match self {
            Self::Conflict { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}
