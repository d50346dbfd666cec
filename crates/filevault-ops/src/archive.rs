//! Zip archive creation and zip-slip-safe extraction.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use filevault_core::{VaultError, VaultResult};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::transfer::walk_error;

/// A validated archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name as stored in the archive.
    pub name: String,
    /// Safe relative path under the extraction root.
    pub relative: PathBuf,
    pub is_dir: bool,
}

fn zip_error(path: &Path, err: zip::result::ZipError) -> VaultError {
    match err {
        zip::result::ZipError::Io(e) => VaultError::io(path, e),
        other => VaultError::Archive {
            path: path.display().to_string(),
            message: other.to_string(),
        },
    }
}

/// Validate an entry name and turn it into a relative path.
///
/// Absolute names, `..` segments and drive or root prefixes are rejected.
pub fn sanitize_entry_name(name: &str) -> VaultResult<PathBuf> {
    let unsafe_entry = || VaultError::UnsafeArchiveEntry {
        entry: name.to_string(),
    };

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || normalized.chars().any(char::is_control) {
        return Err(unsafe_entry());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry());
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_entry());
    }
    Ok(relative)
}

/// Read and validate every entry name of an archive without extracting.
pub fn read_entries(archive_path: &Path) -> VaultResult<Vec<ArchiveEntry>> {
    let file = File::open(archive_path).map_err(|e| VaultError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_error(archive_path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| zip_error(archive_path, e))?;
        let name = entry.name().to_string();
        let relative = sanitize_entry_name(&name)?;
        entries.push(ArchiveEntry {
            is_dir: entry.is_dir(),
            name,
            relative,
        });
    }
    Ok(entries)
}

/// Entry names that would overwrite something under `destination`.
///
/// A directory entry landing on an existing directory merges and is not a
/// conflict. Entries that would be written through a symlink leading outside
/// `root` fail the whole check.
pub fn find_conflicts(
    entries: &[ArchiveEntry],
    destination: &Path,
    root: &Path,
) -> VaultResult<Vec<String>> {
    let real_root = canonical_root(root)?;
    let mut conflicts = Vec::new();
    for entry in entries {
        let target = destination.join(&entry.relative);
        ensure_contained(entry, &target, root, &real_root)?;
        match fs::symlink_metadata(&target) {
            Ok(metadata) if entry.is_dir && metadata.is_dir() => {}
            Ok(_) => conflicts.push(entry.name.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(&target, e)),
        }
    }
    Ok(conflicts)
}

fn canonical_root(root: &Path) -> VaultResult<PathBuf> {
    root.canonicalize().map_err(|e| VaultError::io(root, e))
}

/// Reject `target` when its nearest existing ancestor below `root` resolves
/// outside `real_root` once symlinks are followed.
fn ensure_contained(
    entry: &ArchiveEntry,
    target: &Path,
    root: &Path,
    real_root: &Path,
) -> VaultResult<()> {
    let unsafe_entry = || VaultError::UnsafeArchiveEntry {
        entry: entry.name.clone(),
    };

    let Some(existing) = target
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root))
        .find(|dir| fs::symlink_metadata(dir).is_ok())
    else {
        return Ok(());
    };

    let real = existing.canonicalize().map_err(|_| unsafe_entry())?;
    if !real.starts_with(real_root) {
        warn!(entry = %entry.name, resolved = %real.display(), "Archive entry leads outside the root");
        return Err(unsafe_entry());
    }
    Ok(())
}

/// Extract every entry of `archive_path` into `destination`, overwriting.
///
/// All entry names are validated before the first byte is written, and no
/// write may pass through a symlink that leads outside `root`. Returns the
/// extracted entry names in archive order.
pub fn extract_zip(
    archive_path: &Path,
    destination: &Path,
    root: &Path,
) -> VaultResult<Vec<String>> {
    let entries = read_entries(archive_path)?;

    let file = File::open(archive_path).map_err(|e| VaultError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_error(archive_path, e))?;
    fs::create_dir_all(destination).map_err(|e| VaultError::io(destination, e))?;
    let real_root = canonical_root(root)?;

    let mut extracted = Vec::with_capacity(entries.len());
    for (index, validated) in entries.iter().enumerate() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| zip_error(archive_path, e))?;
        let target = destination.join(&validated.relative);
        ensure_contained(validated, &target, root, &real_root)?;

        if validated.is_dir {
            fs::create_dir_all(&target).map_err(|e| VaultError::io(&target, e))?;
            extracted.push(validated.name.clone());
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
        }
        match fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                fs::remove_dir_all(&target).map_err(|e| VaultError::io(&target, e))?;
            }
            Ok(metadata) if metadata.file_type().is_symlink() => {
                fs::remove_file(&target).map_err(|e| VaultError::io(&target, e))?;
            }
            _ => {}
        }

        let mut output = File::create(&target).map_err(|e| VaultError::io(&target, e))?;
        io::copy(&mut entry, &mut output).map_err(|e| VaultError::io(&target, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(mode & 0o777);
            fs::set_permissions(&target, permissions).map_err(|e| VaultError::io(&target, e))?;
        }

        debug!(entry = %validated.name, "Extracted");
        extracted.push(validated.name.clone());
    }

    Ok(extracted)
}

/// Write a zip archive containing `sources` and return its size in bytes.
///
/// Files are stored under their base name, directories recursively under
/// their own name. Symbolic links are skipped. A failed write removes the
/// partial archive.
pub fn write_zip(sources: &[PathBuf], archive_path: &Path) -> VaultResult<u64> {
    let file = File::options()
        .write(true)
        .create_new(true)
        .open(archive_path)
        .map_err(|e| VaultError::io(archive_path, e))?;

    let result = write_entries(file, sources, archive_path);
    if result.is_err() {
        if let Err(e) = fs::remove_file(archive_path) {
            warn!(path = %archive_path.display(), error = %e, "Removing partial archive failed");
        }
    }
    result
}

fn write_entries(file: File, sources: &[PathBuf], archive_path: &Path) -> VaultResult<u64> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for source in sources {
        let metadata = fs::symlink_metadata(source).map_err(|e| VaultError::io(source, e))?;
        if metadata.file_type().is_symlink() {
            continue;
        }

        let base = source.parent().unwrap_or(Path::new(""));
        for entry in WalkDir::new(source).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(source, e))?;
            if entry.file_type().is_symlink() {
                continue;
            }

            let name = entry_name(base, entry.path())?;
            if entry.file_type().is_dir() {
                writer
                    .add_directory(format!("{name}/"), options)
                    .map_err(|e| zip_error(archive_path, e))?;
                continue;
            }

            writer
                .start_file(name, options)
                .map_err(|e| zip_error(archive_path, e))?;
            let mut input = File::open(entry.path()).map_err(|e| VaultError::io(entry.path(), e))?;
            io::copy(&mut input, &mut writer).map_err(|e| VaultError::io(archive_path, e))?;
        }
    }

    let file = writer.finish().map_err(|e| zip_error(archive_path, e))?;
    let size = file
        .metadata()
        .map_err(|e| VaultError::io(archive_path, e))?
        .len();
    Ok(size)
}

/// Slash-separated name of `path` relative to `base`.
fn entry_name(base: &Path, path: &Path) -> VaultResult<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| VaultError::internal("archive source outside its parent"))?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn raw_zip(path: &Path, names: &[&str]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for name in names {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(b"payload").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_sanitize_entry_name() {
        assert_eq!(sanitize_entry_name("a/b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(sanitize_entry_name("./a").unwrap(), PathBuf::from("a"));
        assert_eq!(sanitize_entry_name("a\\b").unwrap(), PathBuf::from("a/b"));
        for bad in ["../evil", "/etc/passwd", "a/../../b", "", ".", "\\abs"] {
            assert!(sanitize_entry_name(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_write_then_extract() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("folder/sub")).unwrap();
        fs::write(src.join("folder/sub/x.txt"), b"x").unwrap();
        fs::write(src.join("single.txt"), b"single").unwrap();

        let archive = dir.path().join("out.zip");
        let size = write_zip(&[src.join("folder"), src.join("single.txt")], &archive).unwrap();
        assert!(size > 0);

        let names: Vec<String> = read_entries(&archive).unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"folder/".to_string()));
        assert!(names.contains(&"folder/sub/x.txt".to_string()));
        assert!(names.contains(&"single.txt".to_string()));

        let dest = dir.path().join("dest");
        extract_zip(&archive, &dest, &dest).unwrap();
        assert_eq!(fs::read(dest.join("folder/sub/x.txt")).unwrap(), b"x");
        assert_eq!(fs::read(dest.join("single.txt")).unwrap(), b"single");
    }

    #[test]
    fn test_write_refuses_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out.zip");
        fs::write(&archive, b"keep me").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let err = write_zip(&[dir.path().join("a.txt")], &archive).unwrap_err();
        assert!(matches!(err, VaultError::AlreadyExists { .. }));
        assert_eq!(fs::read(&archive).unwrap(), b"keep me");
    }

    #[test]
    fn test_failed_write_removes_partial_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out.zip");

        assert!(write_zip(&[dir.path().join("missing.txt")], &archive).is_err());
        assert!(!archive.exists());
    }

    #[test]
    fn test_zip_slip_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        raw_zip(&archive, &["good.txt", "../../evil.txt"]);

        let dest = dir.path().join("dest");
        let err = extract_zip(&archive, &dest, dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::UnsafeArchiveEntry { .. }));
        assert!(!dest.join("good.txt").exists());
    }

    #[test]
    fn test_find_conflicts_lists_every_collision() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        raw_zip(&archive, &["a.txt", "b.txt", "c.txt"]);
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), b"").unwrap();
        fs::write(dest.join("c.txt"), b"").unwrap();

        let entries = read_entries(&archive).unwrap();
        assert_eq!(
            find_conflicts(&entries, &dest, dir.path()).unwrap(),
            vec!["a.txt", "c.txt"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_cannot_redirect_writes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(root.join("dest")).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("dest/link")).unwrap();

        let archive = dir.path().join("a.zip");
        raw_zip(&archive, &["link/x.txt"]);
        let entries = read_entries(&archive).unwrap();

        let err = find_conflicts(&entries, &root.join("dest"), &root).unwrap_err();
        assert!(matches!(err, VaultError::UnsafeArchiveEntry { .. }));

        let err = extract_zip(&archive, &root.join("dest"), &root).unwrap_err();
        assert!(matches!(err, VaultError::UnsafeArchiveEntry { .. }));
        assert!(!outside.join("x.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_overwrite_replaces_symlink_instead_of_following_it() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        let victim = dir.path().join("victim.txt");
        fs::write(&victim, b"untouched").unwrap();
        std::os::unix::fs::symlink(&victim, dest.join("a.txt")).unwrap();

        let archive = dir.path().join("a.zip");
        raw_zip(&archive, &["a.txt"]);
        extract_zip(&archive, &dest, &dest).unwrap();

        assert_eq!(fs::read(&victim).unwrap(), b"untouched");
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"payload");
        assert!(!fs::symlink_metadata(dest.join("a.txt")).unwrap().file_type().is_symlink());
    }
}
