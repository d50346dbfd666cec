//! Soft delete, restore and purge.
//!
//! Deleted items are moved into a trash directory outside the storage root
//! under a collision-free name (`{uuid}_{basename}`) and described by a
//! [`TrashRecord`] held in a [`TrashRepository`]. A record moves through
//! `trashed -> restored` or is purged together with its bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use filevault_core::path::{is_root, join_logical, logical_file_name, normalize_logical};
use filevault_core::{Actor, TrashRecord, VaultError, VaultResult};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::storage::{Storage, remove_path};
use crate::transfer::{MoveOutcome, move_path, walk_error};

/// Persistence for trash records.
pub trait TrashRepository: Send + Sync {
    fn create(&self, record: &TrashRecord) -> VaultResult<()>;

    /// Most recently deleted, not yet restored record for a logical path.
    fn find_latest_by_path(&self, original_path: &str) -> VaultResult<Option<TrashRecord>>;

    fn find_by_id(&self, id: Uuid) -> VaultResult<Option<TrashRecord>>;

    fn mark_restored(&self, id: Uuid, restored_at: DateTime<Utc>, actor: &Actor)
    -> VaultResult<()>;

    /// Records newest first, optionally including restored ones.
    fn list(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>>;

    fn delete(&self, id: Uuid) -> VaultResult<()>;

    /// Drop every record that has not been restored, returning how many.
    fn delete_all_not_restored(&self) -> VaultResult<usize>;
}

/// Hook for cleaning up data derived from a file (thumbnails, search index rows).
pub trait DerivedArtifacts: Send + Sync {
    fn remove_derived_artifacts(&self, logical_path: &str) -> VaultResult<()>;
}

/// [`DerivedArtifacts`] for deployments that derive nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDerivedArtifacts;

impl DerivedArtifacts for NoDerivedArtifacts {
    fn remove_derived_artifacts(&self, _logical_path: &str) -> VaultResult<()> {
        Ok(())
    }
}

/// Shared record-list logic behind both repository implementations.
#[derive(Debug, Default)]
struct RecordTable {
    records: Vec<TrashRecord>,
}

impl RecordTable {
    fn find_latest_by_path(&self, original_path: &str) -> Option<TrashRecord> {
        self.records
            .iter()
            .filter(|r| r.original_path == original_path && !r.is_restored())
            .max_by_key(|r| r.deleted_at)
            .cloned()
    }

    fn find_by_id(&self, id: Uuid) -> Option<TrashRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    fn mark_restored(&mut self, id: Uuid, restored_at: DateTime<Utc>, actor: &Actor) -> VaultResult<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id && !r.is_restored())
            .ok_or_else(|| VaultError::not_found(format!("trash record {id}")))?;
        record.restored_at = Some(restored_at);
        record.restored_by = Some(actor.clone());
        Ok(())
    }

    fn list(&self, include_restored: bool) -> Vec<TrashRecord> {
        let mut records: Vec<TrashRecord> = self
            .records
            .iter()
            .filter(|r| include_restored || !r.is_restored())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        records
    }

    fn delete(&mut self, id: Uuid) -> VaultResult<()> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            return Err(VaultError::not_found(format!("trash record {id}")));
        }
        Ok(())
    }

    fn delete_all_not_restored(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(TrashRecord::is_restored);
        before - self.records.len()
    }
}

/// In-memory [`TrashRepository`].
#[derive(Debug, Default)]
pub struct MemoryTrashRepository {
    table: Mutex<RecordTable>,
}

impl MemoryTrashRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, RecordTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrashRepository for MemoryTrashRepository {
    fn create(&self, record: &TrashRecord) -> VaultResult<()> {
        self.table().records.push(record.clone());
        Ok(())
    }

    fn find_latest_by_path(&self, original_path: &str) -> VaultResult<Option<TrashRecord>> {
        Ok(self.table().find_latest_by_path(original_path))
    }

    fn find_by_id(&self, id: Uuid) -> VaultResult<Option<TrashRecord>> {
        Ok(self.table().find_by_id(id))
    }

    fn mark_restored(&self, id: Uuid, restored_at: DateTime<Utc>, actor: &Actor) -> VaultResult<()> {
        self.table().mark_restored(id, restored_at, actor)
    }

    fn list(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>> {
        Ok(self.table().list(include_restored))
    }

    fn delete(&self, id: Uuid) -> VaultResult<()> {
        self.table().delete(id)
    }

    fn delete_all_not_restored(&self) -> VaultResult<usize> {
        Ok(self.table().delete_all_not_restored())
    }
}

/// [`TrashRepository`] persisted as a JSON array in a single file.
///
/// The file is rewritten through a sibling temp file and a rename after every
/// mutation. A mutation whose write fails is rolled back in memory.
#[derive(Debug)]
pub struct JsonTrashRepository {
    path: PathBuf,
    table: Mutex<RecordTable>,
}

impl JsonTrashRepository {
    /// Open the repository, loading existing records if the file is present.
    pub fn open(path: impl Into<PathBuf>) -> VaultResult<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Vec::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                VaultError::repository(format!("corrupt trash records {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(VaultError::io(&path, e)),
        };

        debug!(path = %path.display(), records = records.len(), "Loaded trash records");
        Ok(Self {
            path,
            table: Mutex::new(RecordTable { records }),
        })
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut RecordTable) -> VaultResult<T>) -> VaultResult<T> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = table.records.clone();
        let value = apply(&mut table)?;
        if let Err(e) = self.write(&table.records) {
            table.records = snapshot;
            return Err(e);
        }
        Ok(value)
    }

    fn read<T>(&self, query: impl FnOnce(&RecordTable) -> T) -> T {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        query(&table)
    }

    fn write(&self, records: &[TrashRecord]) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| VaultError::repository(format!("encode trash records: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| VaultError::repository(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| VaultError::repository(format!("{}: {e}", self.path.display())))
    }
}

impl TrashRepository for JsonTrashRepository {
    fn create(&self, record: &TrashRecord) -> VaultResult<()> {
        self.mutate(|table| {
            table.records.push(record.clone());
            Ok(())
        })
    }

    fn find_latest_by_path(&self, original_path: &str) -> VaultResult<Option<TrashRecord>> {
        Ok(self.read(|table| table.find_latest_by_path(original_path)))
    }

    fn find_by_id(&self, id: Uuid) -> VaultResult<Option<TrashRecord>> {
        Ok(self.read(|table| table.find_by_id(id)))
    }

    fn mark_restored(&self, id: Uuid, restored_at: DateTime<Utc>, actor: &Actor) -> VaultResult<()> {
        self.mutate(|table| table.mark_restored(id, restored_at, actor))
    }

    fn list(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>> {
        Ok(self.read(|table| table.list(include_restored)))
    }

    fn delete(&self, id: Uuid) -> VaultResult<()> {
        self.mutate(|table| table.delete(id))
    }

    fn delete_all_not_restored(&self) -> VaultResult<usize> {
        self.mutate(|table| Ok(table.delete_all_not_restored()))
    }
}

/// Recoverable deletion backed by a trash directory.
pub struct TrashStore {
    storage: Arc<dyn Storage>,
    trash_root: PathBuf,
    repository: Arc<dyn TrashRepository>,
    artifacts: Arc<dyn DerivedArtifacts>,
}

impl std::fmt::Debug for TrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrashStore")
            .field("storage", &self.storage)
            .field("trash_root", &self.trash_root)
            .finish_non_exhaustive()
    }
}

impl TrashStore {
    /// Create a store whose trash area is `trash_root`.
    pub fn new(
        storage: Arc<dyn Storage>,
        trash_root: impl AsRef<Path>,
        repository: Arc<dyn TrashRepository>,
    ) -> VaultResult<Self> {
        let trash_root = trash_root.as_ref();
        let trash_root =
            std::path::absolute(trash_root).map_err(|e| VaultError::io(trash_root, e))?;
        if trash_root.starts_with(storage.validator().root()) {
            warn!(
                trash_root = %trash_root.display(),
                "Trash area is inside the storage root and reachable through logical paths"
            );
        }
        fs::create_dir_all(&trash_root).map_err(|e| VaultError::io(&trash_root, e))?;

        Ok(Self {
            storage,
            trash_root,
            repository,
            artifacts: Arc::new(NoDerivedArtifacts),
        })
    }

    /// Install the purge hook for derived data.
    pub fn with_artifacts(mut self, artifacts: Arc<dyn DerivedArtifacts>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn trash_root(&self) -> &Path {
        &self.trash_root
    }

    /// Move an existing item into the trash and record it.
    pub fn soft_delete(&self, path: &str, actor: &Actor) -> VaultResult<TrashRecord> {
        let logical = normalize_logical(path);
        if is_root(&logical) {
            return Err(VaultError::bad_request("root path cannot be deleted"));
        }

        self.storage.stat(&logical)?;
        let source = self.storage.resolve(&logical)?;

        let id = Uuid::new_v4();
        let trash_name = format!("{id}_{}", logical_file_name(&logical));
        let trashed = self.trash_root.join(&trash_name);

        self.move_logged(&source, &trashed)?;

        let record = TrashRecord {
            id,
            original_path: logical.clone(),
            trash_name,
            deleted_at: Utc::now(),
            deleted_by: actor.clone(),
            restored_at: None,
            restored_by: None,
        };

        if let Err(e) = self.repository.create(&record) {
            warn!(path = %logical, error = %e, "Recording trash entry failed, rolling back move");
            if let Err(rollback) = move_path(&trashed, &source) {
                error!(
                    path = %logical,
                    trashed = %trashed.display(),
                    error = %rollback,
                    "Rollback failed, item left in trash without a record"
                );
            }
            return Err(e);
        }

        debug!(path = %logical, trash_id = %id, "Moved to trash");
        Ok(record)
    }

    /// Restore the most recently trashed version of `path`.
    pub fn restore_latest(&self, path: &str, actor: &Actor) -> VaultResult<TrashRecord> {
        let logical = normalize_logical(path);
        let mut record = self
            .repository
            .find_latest_by_path(&logical)?
            .ok_or_else(|| VaultError::not_found(format!("no trashed version of {logical}")))?;

        let destination = self.storage.resolve(&logical)?;
        match fs::symlink_metadata(&destination) {
            Ok(_) => return Err(VaultError::PathConflict { path: logical }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(&destination, e)),
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
        }

        let trashed = self.trash_root.join(&record.trash_name);
        self.move_logged(&trashed, &destination)?;

        let restored_at = Utc::now();
        if let Err(e) = self.repository.mark_restored(record.id, restored_at, actor) {
            warn!(path = %logical, error = %e, "Marking restore failed, moving item back to trash");
            if let Err(compensate) = move_path(&destination, &trashed) {
                error!(
                    path = %logical,
                    error = %compensate,
                    "Compensation failed, item restored but record still active"
                );
            }
            return Err(e);
        }

        record.restored_at = Some(restored_at);
        record.restored_by = Some(actor.clone());
        debug!(path = %logical, trash_id = %record.id, "Restored from trash");
        Ok(record)
    }

    pub fn list(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>> {
        self.repository.list(include_restored)
    }

    /// Purge one trashed entry for good.
    pub fn permanent_delete(&self, id: Uuid) -> VaultResult<()> {
        let record = self
            .repository
            .find_by_id(id)?
            .filter(|record| !record.is_restored())
            .ok_or_else(|| VaultError::not_found(format!("trash record {id}")))?;

        self.purge_entry(&record)?;
        self.repository.delete(record.id)?;
        info!(trash_id = %id, path = %record.original_path, "Purged from trash");
        Ok(())
    }

    /// Purge every active entry and return how many were removed cleanly.
    ///
    /// Entries whose bytes or derived artifacts cannot be removed are skipped,
    /// but all active records are dropped afterwards.
    pub fn empty_trash(&self) -> VaultResult<usize> {
        let records = self.repository.list(false)?;
        let mut purged = 0;

        for record in &records {
            match self.purge_entry(record) {
                Ok(()) => purged += 1,
                Err(e) => warn!(
                    trash_id = %record.id,
                    path = %record.original_path,
                    error = %e,
                    "Skipping trash entry that could not be purged"
                ),
            }
        }

        let dropped = self.repository.delete_all_not_restored()?;
        info!(purged, dropped, "Emptied trash");
        Ok(purged)
    }

    /// Logical paths of every file held by a trash entry.
    pub fn original_file_paths(&self, record: &TrashRecord) -> VaultResult<Vec<String>> {
        let trashed = self.trash_root.join(&record.trash_name);
        let metadata = match fs::symlink_metadata(&trashed) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::io(&trashed, e)),
        };

        if !metadata.is_dir() {
            return Ok(vec![record.original_path.clone()]);
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&trashed).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| walk_error(&trashed, e))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&trashed)
                .map_err(|_| VaultError::internal("walked entry outside its root"))?;
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            paths.push(join_logical(&record.original_path, &relative.join("/")));
        }
        Ok(paths)
    }

    fn purge_entry(&self, record: &TrashRecord) -> VaultResult<()> {
        let files = self.original_file_paths(record)?;
        let trashed = self.trash_root.join(&record.trash_name);

        match remove_path(&trashed) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(trash_id = %record.id, "Trash bytes already gone");
            }
            Err(e) => return Err(e),
        }

        for logical in &files {
            self.artifacts.remove_derived_artifacts(logical)?;
        }
        Ok(())
    }

    fn move_logged(&self, from: &Path, to: &Path) -> VaultResult<()> {
        if move_path(from, to)? == MoveOutcome::CopiedAcrossDevices {
            warn!(
                from = %from.display(),
                to = %to.display(),
                "Trash move was not atomic"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::LocalStorage;

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<dyn Storage>,
        repository: Arc<MemoryTrashRepository>,
        trash: TrashStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::open(dir.path().join("root")).unwrap());
        let repository = Arc::new(MemoryTrashRepository::new());
        let trash = TrashStore::new(
            Arc::clone(&storage),
            dir.path().join("trash"),
            repository.clone(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            storage,
            repository,
            trash,
        }
    }

    fn write(storage: &Arc<dyn Storage>, logical: &str, contents: &[u8]) {
        let path = storage.resolve(logical).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_soft_delete_moves_into_trash() {
        let f = fixture();
        write(&f.storage, "/docs/a.txt", b"a");

        let record = f.trash.soft_delete("/docs/a.txt", &Actor::system()).unwrap();
        assert_eq!(record.original_path, "/docs/a.txt");
        assert_eq!(record.trash_name, format!("{}_a.txt", record.id));
        assert!(!f.storage.exists("/docs/a.txt").unwrap());
        assert!(f.trash.trash_root().join(&record.trash_name).exists());
    }

    #[test]
    fn test_soft_delete_missing_is_not_found() {
        let f = fixture();
        let err = f.trash.soft_delete("/nope", &Actor::system()).unwrap_err();
        assert!(err.is_not_found());
        assert!(f.repository.list(true).unwrap().is_empty());
    }

    #[test]
    fn test_restore_twice() {
        let f = fixture();
        write(&f.storage, "/a.txt", b"a");
        f.trash.soft_delete("/a.txt", &Actor::system()).unwrap();

        let record = f.trash.restore_latest("/a.txt", &Actor::system()).unwrap();
        assert!(record.is_restored());
        assert!(f.storage.exists("/a.txt").unwrap());

        let err = f.trash.restore_latest("/a.txt", &Actor::system()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restore_picks_latest_version() {
        let f = fixture();
        write(&f.storage, "/a.txt", b"old");
        f.trash.soft_delete("/a.txt", &Actor::system()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        write(&f.storage, "/a.txt", b"new");
        f.trash.soft_delete("/a.txt", &Actor::system()).unwrap();

        f.trash.restore_latest("/a.txt", &Actor::system()).unwrap();
        let restored = fs::read(f.storage.resolve("/a.txt").unwrap()).unwrap();
        assert_eq!(restored, b"new");
        assert_eq!(f.trash.list(false).unwrap().len(), 1);
    }

    #[test]
    fn test_restore_into_occupied_path_conflicts() {
        let f = fixture();
        write(&f.storage, "/a.txt", b"trashed");
        let record = f.trash.soft_delete("/a.txt", &Actor::system()).unwrap();
        write(&f.storage, "/a.txt", b"newer");

        let err = f.trash.restore_latest("/a.txt", &Actor::system()).unwrap_err();
        assert!(matches!(err, VaultError::PathConflict { .. }));
        assert!(f.trash.trash_root().join(&record.trash_name).exists());
        assert!(!f.repository.find_by_id(record.id).unwrap().unwrap().is_restored());
    }

    #[test]
    fn test_restore_recreates_parents() {
        let f = fixture();
        write(&f.storage, "/deep/nested/a.txt", b"a");
        f.trash.soft_delete("/deep/nested/a.txt", &Actor::system()).unwrap();
        f.storage.remove_all("/deep").unwrap();

        f.trash.restore_latest("/deep/nested/a.txt", &Actor::system()).unwrap();
        assert!(f.storage.exists("/deep/nested/a.txt").unwrap());
    }

    struct RecordingArtifacts(Mutex<Vec<String>>);

    impl DerivedArtifacts for RecordingArtifacts {
        fn remove_derived_artifacts(&self, logical_path: &str) -> VaultResult<()> {
            self.0.lock().unwrap().push(logical_path.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_permanent_delete_cleans_artifacts_for_every_file() {
        let f = fixture();
        let artifacts = Arc::new(RecordingArtifacts(Mutex::new(Vec::new())));
        let trash = TrashStore::new(
            Arc::clone(&f.storage),
            f.trash.trash_root(),
            f.repository.clone(),
        )
        .unwrap()
        .with_artifacts(artifacts.clone());

        write(&f.storage, "/photos/a.jpg", b"a");
        write(&f.storage, "/photos/2024/b.jpg", b"b");
        let record = trash.soft_delete("/photos", &Actor::system()).unwrap();

        trash.permanent_delete(record.id).unwrap();

        let mut removed = artifacts.0.lock().unwrap().clone();
        removed.sort();
        assert_eq!(removed, vec!["/photos/2024/b.jpg", "/photos/a.jpg"]);
        assert!(!trash.trash_root().join(&record.trash_name).exists());
        assert!(f.repository.find_by_id(record.id).unwrap().is_none());
        assert!(trash.permanent_delete(record.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_empty_trash_keeps_restored_records() {
        let f = fixture();
        write(&f.storage, "/a.txt", b"a");
        write(&f.storage, "/b.txt", b"b");
        write(&f.storage, "/c.txt", b"c");
        f.trash.soft_delete("/a.txt", &Actor::system()).unwrap();
        f.trash.soft_delete("/b.txt", &Actor::system()).unwrap();
        f.trash.soft_delete("/c.txt", &Actor::system()).unwrap();
        f.trash.restore_latest("/c.txt", &Actor::system()).unwrap();

        assert_eq!(f.trash.empty_trash().unwrap(), 2);
        assert!(f.trash.list(false).unwrap().is_empty());
        assert_eq!(f.trash.list(true).unwrap().len(), 1);
    }

    #[test]
    fn test_json_repository_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/trash.json");
        let record = TrashRecord {
            id: Uuid::new_v4(),
            original_path: "/a.txt".into(),
            trash_name: "x_a.txt".into(),
            deleted_at: Utc::now(),
            deleted_by: Actor::system(),
            restored_at: None,
            restored_by: None,
        };

        let repo = JsonTrashRepository::open(&path).unwrap();
        repo.create(&record).unwrap();
        repo.mark_restored(record.id, Utc::now(), &Actor::system()).unwrap();
        drop(repo);

        let reopened = JsonTrashRepository::open(&path).unwrap();
        let loaded = reopened.find_by_id(record.id).unwrap().unwrap();
        assert!(loaded.is_restored());
        assert!(reopened.find_latest_by_path("/a.txt").unwrap().is_none());
        assert_eq!(reopened.delete_all_not_restored().unwrap(), 0);
    }

    /// Memory repository whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyRepository {
        inner: MemoryTrashRepository,
        fail_create: AtomicBool,
        fail_mark_restored: AtomicBool,
    }

    impl FlakyRepository {
        fn check(flag: &AtomicBool) -> VaultResult<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(VaultError::repository("store unavailable"));
            }
            Ok(())
        }
    }

    impl TrashRepository for FlakyRepository {
        fn create(&self, record: &TrashRecord) -> VaultResult<()> {
            Self::check(&self.fail_create)?;
            self.inner.create(record)
        }

        fn find_latest_by_path(&self, original_path: &str) -> VaultResult<Option<TrashRecord>> {
            self.inner.find_latest_by_path(original_path)
        }

        fn find_by_id(&self, id: Uuid) -> VaultResult<Option<TrashRecord>> {
            self.inner.find_by_id(id)
        }

        fn mark_restored(&self, id: Uuid, restored_at: DateTime<Utc>, actor: &Actor) -> VaultResult<()> {
            Self::check(&self.fail_mark_restored)?;
            self.inner.mark_restored(id, restored_at, actor)
        }

        fn list(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>> {
            self.inner.list(include_restored)
        }

        fn delete(&self, id: Uuid) -> VaultResult<()> {
            self.inner.delete(id)
        }

        fn delete_all_not_restored(&self) -> VaultResult<usize> {
            self.inner.delete_all_not_restored()
        }
    }

    fn flaky_store(f: &Fixture) -> (Arc<FlakyRepository>, TrashStore) {
        let repository = Arc::new(FlakyRepository::default());
        let trash = TrashStore::new(
            Arc::clone(&f.storage),
            f.trash.trash_root(),
            repository.clone(),
        )
        .unwrap();
        (repository, trash)
    }

    fn trash_entries(trash: &TrashStore) -> usize {
        fs::read_dir(trash.trash_root()).unwrap().count()
    }

    #[test]
    fn test_failed_record_moves_item_back() {
        let f = fixture();
        let (repository, trash) = flaky_store(&f);
        write(&f.storage, "/docs/a.txt", b"keep");
        repository
            .fail_create
            .store(true, Ordering::SeqCst);

        let err = trash.soft_delete("/docs/a.txt", &Actor::system()).unwrap_err();
        assert!(matches!(err, VaultError::Repository { .. }));
        let restored = fs::read(f.storage.resolve("/docs/a.txt").unwrap()).unwrap();
        assert_eq!(restored, b"keep");
        assert_eq!(trash_entries(&trash), 0);
        assert!(trash.list(true).unwrap().is_empty());
    }

    #[test]
    fn test_failed_restore_mark_moves_item_back_to_trash() {
        let f = fixture();
        let (repository, trash) = flaky_store(&f);
        write(&f.storage, "/a.txt", b"a");
        let record = trash.soft_delete("/a.txt", &Actor::system()).unwrap();
        repository
            .fail_mark_restored
            .store(true, Ordering::SeqCst);

        let err = trash.restore_latest("/a.txt", &Actor::system()).unwrap_err();
        assert!(matches!(err, VaultError::Repository { .. }));
        assert!(!f.storage.exists("/a.txt").unwrap());
        assert!(trash.trash_root().join(&record.trash_name).exists());

        let active = trash.list(false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, record.id);

        repository
            .fail_mark_restored
            .store(false, Ordering::SeqCst);
        trash.restore_latest("/a.txt", &Actor::system()).unwrap();
        assert!(f.storage.exists("/a.txt").unwrap());
    }
}
