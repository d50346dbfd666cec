//! Recursive copy and best-effort atomic moves between absolute paths.

use std::fs;
use std::io;
use std::path::Path;

use filevault_core::{VaultError, VaultResult};
use tracing::warn;
use walkdir::WalkDir;

use crate::storage::remove_path;

/// How [`move_path`] got the bytes to their destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// A single atomic rename.
    Renamed,
    /// Source and destination live on different filesystems; the tree was
    /// copied and the source removed afterwards. Not atomic.
    CopiedAcrossDevices,
}

/// Move `source` to `destination`, falling back to copy + delete across devices.
///
/// A failed copy removes whatever it left at `destination`. If the process
/// dies between the copy and the removal both copies remain.
pub fn move_path(source: &Path, destination: &Path) -> VaultResult<MoveOutcome> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(MoveOutcome::Renamed),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                "Rename crosses devices, falling back to copy and delete"
            );
            relocate_by_copy(source, destination, copy_tree)
        }
        Err(e) => Err(VaultError::io(source, e)),
    }
}

fn relocate_by_copy(
    source: &Path,
    destination: &Path,
    copy: impl FnOnce(&Path, &Path) -> VaultResult<u64>,
) -> VaultResult<MoveOutcome> {
    if let Err(e) = copy(source, destination) {
        match remove_path(destination) {
            Ok(()) => {}
            Err(cleanup) if cleanup.is_not_found() => {}
            Err(cleanup) => warn!(
                destination = %destination.display(),
                error = %cleanup,
                "Removing partial copy failed"
            ),
        }
        return Err(e);
    }
    remove_path(source)?;
    Ok(MoveOutcome::CopiedAcrossDevices)
}

/// Copy a file or directory tree, returning the number of bytes written.
///
/// Symbolic links are never followed: a symlink source is rejected and links
/// found inside a directory are skipped.
pub fn copy_tree(source: &Path, destination: &Path) -> VaultResult<u64> {
    let metadata = fs::symlink_metadata(source).map_err(|e| VaultError::io(source, e))?;

    if metadata.file_type().is_symlink() {
        return Err(VaultError::bad_request(format!(
            "symbolic links cannot be copied: {}",
            source.display()
        )));
    }

    if metadata.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
        }
        return fs::copy(source, destination).map_err(|e| VaultError::io(destination, e));
    }

    if destination.starts_with(source) {
        return Err(VaultError::bad_request(
            "cannot copy a directory into itself",
        ));
    }

    fs::create_dir_all(destination).map_err(|e| VaultError::io(destination, e))?;

    let mut total_bytes = 0u64;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(source, e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| VaultError::internal("walked entry outside its root"))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            continue;
        }

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| VaultError::io(&target, e))?;
        } else {
            total_bytes += fs::copy(entry.path(), &target).map_err(|e| VaultError::io(&target, e))?;
        }
    }

    Ok(total_bytes)
}

pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> VaultError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io_err) => VaultError::io(path, io_err),
        None => VaultError::internal(format!("filesystem loop at {}", path.display())),
    }
}
