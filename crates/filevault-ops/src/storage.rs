//! Filesystem access in terms of logical paths.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use filevault_core::path::normalize_logical;
use filevault_core::{PathValidator, VaultError, VaultResult};

/// Filesystem primitives addressed by logical path.
///
/// Every method resolves its arguments through the sandbox first, so an
/// implementation can never touch anything outside the storage root.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Resolve a logical path to its absolute location.
    fn resolve(&self, logical: &str) -> VaultResult<PathBuf>;

    /// Metadata for a path without following a trailing symlink.
    ///
    /// A missing path yields `NotFound` naming the logical path.
    fn stat(&self, logical: &str) -> VaultResult<Metadata>;

    fn mkdir_all(&self, logical: &str) -> VaultResult<()>;

    /// Names of the direct children of a directory, sorted.
    fn read_dir(&self, logical: &str) -> VaultResult<Vec<String>>;

    /// Remove a file or a whole directory tree.
    fn remove_all(&self, logical: &str) -> VaultResult<()>;

    fn rename(&self, from: &str, to: &str) -> VaultResult<()>;

    fn open_for_read(&self, logical: &str) -> VaultResult<File>;

    /// Create or truncate a file for writing.
    fn open_for_write(&self, logical: &str) -> VaultResult<File>;

    /// The sandbox this storage resolves through.
    fn validator(&self) -> &PathValidator;

    fn exists(&self, logical: &str) -> VaultResult<bool> {
        match self.stat(logical) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// [`Storage`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    validator: PathValidator,
}

impl LocalStorage {
    pub fn new(validator: PathValidator) -> Self {
        Self { validator }
    }

    /// Open storage rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> VaultResult<Self> {
        let validator = PathValidator::new(root)?;
        fs::create_dir_all(validator.root()).map_err(|e| VaultError::io(validator.root(), e))?;
        Ok(Self::new(validator))
    }
}

impl Storage for LocalStorage {
    fn resolve(&self, logical: &str) -> VaultResult<PathBuf> {
        self.validator.resolve(logical)
    }

    fn stat(&self, logical: &str) -> VaultResult<Metadata> {
        let path = self.resolve(logical)?;
        fs::symlink_metadata(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VaultError::not_found(normalize_logical(logical)),
            _ => VaultError::io(&path, e),
        })
    }

    fn mkdir_all(&self, logical: &str) -> VaultResult<()> {
        let path = self.resolve(logical)?;
        fs::create_dir_all(&path).map_err(|e| VaultError::io(&path, e))
    }

    fn read_dir(&self, logical: &str) -> VaultResult<Vec<String>> {
        let path = self.resolve(logical)?;
        let entries = fs::read_dir(&path).map_err(|e| VaultError::io(&path, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| VaultError::io(&path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn remove_all(&self, logical: &str) -> VaultResult<()> {
        let path = self.resolve(logical)?;
        if path == self.validator.root() {
            return Err(VaultError::bad_request("root path cannot be removed"));
        }
        remove_path(&path)
    }

    fn rename(&self, from: &str, to: &str) -> VaultResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path).map_err(|e| VaultError::io(&from_path, e))
    }

    fn open_for_read(&self, logical: &str) -> VaultResult<File> {
        let path = self.resolve(logical)?;
        File::open(&path).map_err(|e| VaultError::io(&path, e))
    }

    fn open_for_write(&self, logical: &str) -> VaultResult<File> {
        let path = self.resolve(logical)?;
        File::create(&path).map_err(|e| VaultError::io(&path, e))
    }

    fn validator(&self) -> &PathValidator {
        &self.validator
    }
}

/// Remove a file, symlink or directory tree at an absolute path.
pub(crate) fn remove_path(path: &Path) -> VaultResult<()> {
    let metadata = fs::symlink_metadata(path).map_err(|e| VaultError::io(path, e))?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| VaultError::io(path, e))
}
