//! Logical paths and the storage-root sandbox.
//!
//! Clients only ever see slash-rooted logical paths such as `/docs/a.txt`.
//! [`PathValidator`] is the single place where those are turned into absolute
//! filesystem paths, and it guarantees the result never leaves the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Normalize a client-supplied path into its logical form.
///
/// Backslashes become slashes, empty and `.` segments are dropped and the
/// result always starts with `/`. `..` segments are kept verbatim so the
/// validator can reject them.
pub fn normalize_logical(raw: &str) -> String {
    let replaced = raw.trim().replace('\\', "/");
    let segments: Vec<&str> = replaced
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Whether a logical path designates the storage root.
pub fn is_root(logical: &str) -> bool {
    normalize_logical(logical) == "/"
}

/// Join a name onto a logical directory.
pub fn join_logical(parent: &str, name: &str) -> String {
    let parent = normalize_logical(parent);
    if parent == "/" {
        normalize_logical(name)
    } else {
        normalize_logical(&format!("{parent}/{name}"))
    }
}

/// Parent directory of a logical path (`/` for top-level entries and the root).
pub fn logical_parent(logical: &str) -> String {
    let normalized = normalize_logical(logical);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => normalized[..index].to_string(),
    }
}

/// Last segment of a logical path, empty for the root.
pub fn logical_file_name(logical: &str) -> String {
    let normalized = normalize_logical(logical);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Resolves logical paths into absolute paths confined to a storage root.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
}

impl PathValidator {
    /// Create a validator for `root`, made absolute against the current directory.
    pub fn new(root: impl AsRef<Path>) -> VaultResult<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() || root.to_string_lossy().trim().is_empty() {
            return Err(VaultError::bad_request("storage root cannot be empty"));
        }

        let root = std::path::absolute(root).map_err(|e| VaultError::io(root, e))?;
        Ok(Self { root })
    }

    /// The absolute storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical path to an absolute path under the root.
    pub fn resolve(&self, logical: &str) -> VaultResult<PathBuf> {
        let normalized = logical.trim().replace('\\', "/");
        if normalized.is_empty() || normalized == "/" {
            return Ok(self.root.clone());
        }

        if normalized.chars().any(char::is_control) {
            return Err(VaultError::InvalidPath {
                path: logical.to_string(),
                reason: "path contains invalid characters",
            });
        }

        if normalized.split('/').any(|segment| segment == "..") {
            return Err(VaultError::PathTraversal {
                path: logical.to_string(),
            });
        }

        let mut resolved = self.root.clone();
        for segment in normalized
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
        {
            resolved.push(segment);
        }

        let resolved =
            std::path::absolute(&resolved).map_err(|e| VaultError::io(&resolved, e))?;
        if !self.is_within_root(&resolved) {
            return Err(VaultError::PathTraversal {
                path: logical.to_string(),
            });
        }

        Ok(resolved)
    }

    /// Map an absolute path under the root back to its logical form.
    pub fn to_logical(&self, absolute: &Path) -> VaultResult<String> {
        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| VaultError::PathTraversal {
                path: absolute.display().to_string(),
            })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(VaultError::PathTraversal {
                        path: absolute.display().to_string(),
                    });
                }
            }
        }

        Ok(format!("/{}", segments.join("/")))
    }

    /// `err` with absolute host paths replaced by logical ones.
    ///
    /// Host paths outside the root are reduced to their file name.
    pub fn logical_error(&self, err: VaultError) -> VaultError {
        err.map_path(|raw| {
            let path = Path::new(raw);
            if !path.is_absolute() {
                return None;
            }
            let logical = self.to_logical(path).unwrap_or_else(|_| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            Some(logical)
        })
    }

    /// Component-wise containment: the root itself or anything strictly below it.
    fn is_within_root(&self, candidate: &Path) -> bool {
        if candidate == self.root {
            return true;
        }
        candidate.starts_with(&self.root)
            && candidate
                .components()
                .skip(self.root.components().count())
                .all(|component| matches!(component, Component::Normal(_)))
    }
}
