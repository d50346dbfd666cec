//! Mutating file operations over the sandbox.
//!
//! Every call follows the same pipeline: validate inputs, resolve paths,
//! settle conflicts, mutate, write an audit entry for every outcome and
//! publish a domain event for each success. Batch calls never abort on a
//! single bad item; those fold into the `failed` list of the response.

use std::sync::Arc;

use filevault_core::path::{is_root, join_logical, logical_file_name, logical_parent, normalize_logical};
use filevault_core::{
    Actor, CompressResponse, ConflictPolicy, CopyResponse, DecompressResponse, DeleteFailure,
    DeleteResponse, MoveCopyFailure, MoveCopyResult, MoveResponse, RenameResponse, RestoreFailure,
    RestoreResponse, TrashRecord, VaultConfig, VaultError, VaultResult,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive;
use crate::audit::{AuditEntry, AuditSink, TracingAuditSink};
use crate::conflict::{ConflictResolver, Resolution, SKIP_REASON};
use crate::events::{Event, EventSink};
use crate::naming::sanitize_filename;
use crate::storage::{LocalStorage, Storage};
use crate::transfer::{MoveOutcome, copy_tree, move_path};
use crate::trash::{JsonTrashRepository, TrashStore};

/// Per-item outcome reported to progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemTick {
    Success,
    Failed,
    /// Left alone under the `skip` policy.
    Skipped,
}

impl ItemTick {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Observer that ignores every tick.
fn ignore_ticks(_: ItemTick) {}

/// Internal per-item result for move and copy.
enum Transfer {
    Done(String),
    Skipped,
}

/// The operations engine.
pub struct OperationsEngine {
    storage: Arc<dyn Storage>,
    resolver: ConflictResolver,
    trash: Arc<TrashStore>,
    audit: Arc<dyn AuditSink>,
    events: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for OperationsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationsEngine")
            .field("storage", &self.storage)
            .field("trash", &self.trash)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl OperationsEngine {
    pub fn new(storage: Arc<dyn Storage>, trash: Arc<TrashStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            resolver: ConflictResolver::new(Arc::clone(&storage)),
            storage,
            trash,
            audit,
            events: None,
        }
    }

    /// Local storage, JSON trash records and tracing audit, all from config.
    pub fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::open(&config.storage_root)?);
        let repository = Arc::new(JsonTrashRepository::open(config.trash_records_file())?);
        let trash = TrashStore::new(Arc::clone(&storage), config.trash_dir(), repository)?;

        Ok(Self::new(storage, Arc::new(trash), Arc::new(TracingAuditSink))
            .with_rename_limit(config.rename_limit))
    }

    /// Publish domain events to `events`.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_rename_limit(mut self, rename_limit: u32) -> Self {
        self.resolver = ConflictResolver::with_rename_limit(Arc::clone(&self.storage), rename_limit);
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn trash(&self) -> &Arc<TrashStore> {
        &self.trash
    }

    /// Rename an item in place.
    pub fn rename(&self, path: &str, new_name: &str, actor: &Actor) -> VaultResult<RenameResponse> {
        let old_path = normalize_logical(path);
        let before = json!({ "path": old_path, "new_name": new_name });

        let result = if path.trim().is_empty() {
            Err(VaultError::bad_request("path is required"))
        } else {
            self.rename_inner(&old_path, new_name)
                .map_err(|e| self.logical(e))
        };
        match &result {
            Ok(response) => {
                self.audit_ok(
                    "rename",
                    actor,
                    &old_path,
                    before,
                    json!({ "path": response.new_path }),
                );
                self.publish(
                    Event::FileMoved(MoveCopyResult {
                        from: response.old_path.clone(),
                        to: response.new_path.clone(),
                    }),
                    actor,
                );
            }
            Err(e) => self.audit_failed("rename", actor, &old_path, Some(before), e),
        }
        result
    }

    fn rename_inner(&self, old_path: &str, new_name: &str) -> VaultResult<RenameResponse> {
        if is_root(old_path) {
            return Err(VaultError::bad_request("root path cannot be renamed"));
        }

        let name = sanitize_filename(new_name, false)?;
        self.storage.stat(old_path)?;

        let new_path = join_logical(&logical_parent(old_path), &name);
        if self.storage.exists(&new_path)? {
            return Err(VaultError::AlreadyExists { path: new_path });
        }

        self.storage.rename(old_path, &new_path)?;
        debug!(from = %old_path, to = %new_path, "Renamed");
        Ok(RenameResponse {
            old_path: old_path.to_string(),
            new_path,
            name,
        })
    }

    /// Move `sources` into `destination`.
    pub fn move_to(
        &self,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
    ) -> VaultResult<MoveResponse> {
        self.move_observed(sources, destination, conflict_policy, actor, &mut ignore_ticks)
    }

    /// [`Self::move_to`], reporting each processed item to `on_item`.
    pub fn move_observed(
        &self,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
        on_item: &mut dyn FnMut(ItemTick),
    ) -> VaultResult<MoveResponse> {
        let (destination, policy) =
            self.prepare_transfer("move", sources, destination, conflict_policy, actor)?;
        let mut response = MoveResponse::default();

        for raw in sources {
            let source = normalize_logical(raw);
            let before = json!({ "from": source, "destination": destination, "conflict_policy": policy });

            match self
                .move_one(&source, &destination, policy)
                .map_err(|e| self.logical(e))
            {
                Ok(Transfer::Done(to)) => {
                    if to != source {
                        self.audit_ok("move", actor, &source, before, json!({ "to": to }));
                        self.publish(
                            Event::FileMoved(MoveCopyResult {
                                from: source.clone(),
                                to: to.clone(),
                            }),
                            actor,
                        );
                    }
                    response.moved.push(MoveCopyResult { from: source, to });
                    on_item(ItemTick::Success);
                }
                Ok(Transfer::Skipped) => {
                    self.audit_reason("move", actor, &source, before, SKIP_REASON);
                    response.failed.push(MoveCopyFailure {
                        from: source,
                        reason: SKIP_REASON.to_string(),
                        skipped: true,
                    });
                    on_item(ItemTick::Skipped);
                }
                Err(e) => {
                    self.audit_failed("move", actor, &source, Some(before), &e);
                    response.failed.push(MoveCopyFailure {
                        from: source,
                        reason: e.to_string(),
                        skipped: false,
                    });
                    on_item(ItemTick::Failed);
                }
            }
        }

        info!(
            moved = response.moved.len(),
            failed = response.failed.len(),
            destination = %destination,
            "Move finished"
        );
        Ok(response)
    }

    fn move_one(&self, source: &str, destination: &str, policy: ConflictPolicy) -> VaultResult<Transfer> {
        if is_root(source) {
            return Err(VaultError::bad_request("root path cannot be moved"));
        }

        self.storage.stat(source)?;
        let target = join_logical(destination, &logical_file_name(source));
        if target == source {
            return Ok(Transfer::Done(target));
        }
        if is_within(destination, source) {
            return Err(VaultError::bad_request("cannot move a directory into itself"));
        }
        if is_within(source, &target) {
            return Err(VaultError::bad_request("target would replace a parent of the source"));
        }

        let to = match self.resolver.resolve_target(&target, policy)? {
            Resolution::Target(to) => to,
            Resolution::Skip => return Ok(Transfer::Skipped),
        };

        let from_path = self.storage.resolve(source)?;
        let to_path = self.storage.resolve(&to)?;
        if move_path(&from_path, &to_path)? == MoveOutcome::CopiedAcrossDevices {
            warn!(from = %source, to = %to, "Move was not atomic");
        }
        debug!(from = %source, to = %to, "Moved");
        Ok(Transfer::Done(to))
    }

    /// Copy `sources` into `destination`.
    pub fn copy_to(
        &self,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
    ) -> VaultResult<CopyResponse> {
        self.copy_observed(sources, destination, conflict_policy, actor, &mut ignore_ticks)
    }

    /// [`Self::copy_to`], reporting each processed item to `on_item`.
    pub fn copy_observed(
        &self,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
        on_item: &mut dyn FnMut(ItemTick),
    ) -> VaultResult<CopyResponse> {
        let (destination, policy) =
            self.prepare_transfer("copy", sources, destination, conflict_policy, actor)?;
        let mut response = CopyResponse::default();

        for raw in sources {
            let source = normalize_logical(raw);
            let before = json!({ "from": source, "destination": destination, "conflict_policy": policy });

            match self
                .copy_one(&source, &destination, policy)
                .map_err(|e| self.logical(e))
            {
                Ok(Transfer::Done(to)) => {
                    self.audit_ok("copy", actor, &source, before, json!({ "to": to }));
                    self.publish(
                        Event::FileCopied(MoveCopyResult {
                            from: source.clone(),
                            to: to.clone(),
                        }),
                        actor,
                    );
                    response.copied.push(MoveCopyResult { from: source, to });
                    on_item(ItemTick::Success);
                }
                Ok(Transfer::Skipped) => {
                    self.audit_reason("copy", actor, &source, before, SKIP_REASON);
                    response.failed.push(MoveCopyFailure {
                        from: source,
                        reason: SKIP_REASON.to_string(),
                        skipped: true,
                    });
                    on_item(ItemTick::Skipped);
                }
                Err(e) => {
                    self.audit_failed("copy", actor, &source, Some(before), &e);
                    response.failed.push(MoveCopyFailure {
                        from: source,
                        reason: e.to_string(),
                        skipped: false,
                    });
                    on_item(ItemTick::Failed);
                }
            }
        }

        info!(
            copied = response.copied.len(),
            failed = response.failed.len(),
            destination = %destination,
            "Copy finished"
        );
        Ok(response)
    }

    fn copy_one(&self, source: &str, destination: &str, policy: ConflictPolicy) -> VaultResult<Transfer> {
        if is_root(source) {
            return Err(VaultError::bad_request("root path cannot be copied"));
        }

        self.storage.stat(source)?;
        let target = join_logical(destination, &logical_file_name(source));
        if target == source && policy == ConflictPolicy::Overwrite {
            return Err(VaultError::bad_request("cannot overwrite an item with itself"));
        }
        if target != source && is_within(source, &target) {
            return Err(VaultError::bad_request("target would replace a parent of the source"));
        }

        let to = match self.resolver.resolve_target(&target, policy)? {
            Resolution::Target(to) => to,
            Resolution::Skip => return Ok(Transfer::Skipped),
        };

        let from_path = self.storage.resolve(source)?;
        let to_path = self.storage.resolve(&to)?;
        let bytes = copy_tree(&from_path, &to_path)?;
        debug!(from = %source, to = %to, bytes, "Copied");
        Ok(Transfer::Done(to))
    }

    /// Validation shared by move and copy. Returns the normalized destination
    /// and the parsed policy.
    fn prepare_transfer(
        &self,
        action: &str,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
    ) -> VaultResult<(String, ConflictPolicy)> {
        let destination = normalize_logical(destination);
        let before = json!({
            "sources": sources,
            "destination": destination,
            "conflict_policy": conflict_policy,
        });

        match self
            .check_transfer(sources, &destination, conflict_policy)
            .map_err(|e| self.logical(e))
        {
            Ok(policy) => Ok((destination, policy)),
            Err(e) => {
                self.audit_failed(action, actor, &destination, Some(before), &e);
                Err(e)
            }
        }
    }

    fn check_transfer(
        &self,
        sources: &[String],
        destination: &str,
        conflict_policy: &str,
    ) -> VaultResult<ConflictPolicy> {
        if sources.is_empty() {
            return Err(VaultError::bad_request("sources are required"));
        }
        let policy = ConflictPolicy::parse(conflict_policy)?;
        self.storage.mkdir_all(destination)?;
        Ok(policy)
    }

    /// Move `paths` into the trash.
    pub fn delete(&self, paths: &[String], actor: &Actor) -> VaultResult<DeleteResponse> {
        self.delete_observed(paths, actor, &mut ignore_ticks)
    }

    /// [`Self::delete`], reporting each processed item to `on_item`.
    pub fn delete_observed(
        &self,
        paths: &[String],
        actor: &Actor,
        on_item: &mut dyn FnMut(ItemTick),
    ) -> VaultResult<DeleteResponse> {
        self.require_paths("delete", paths, actor)?;
        let mut response = DeleteResponse::default();

        for raw in paths {
            let path = normalize_logical(raw);
            let before = json!({ "path": path });

            let result = if is_root(&path) {
                Err(VaultError::bad_request("root path cannot be deleted"))
            } else {
                self.trash
                    .soft_delete(&path, actor)
                    .map_err(|e| self.logical(e))
            };

            match result {
                Ok(record) => {
                    self.audit_ok(
                        "delete",
                        actor,
                        &path,
                        before,
                        json!({ "trash_id": record.id, "deleted_at": record.deleted_at }),
                    );
                    self.publish(
                        Event::FileDeleted {
                            path: path.clone(),
                            trash_id: record.id,
                        },
                        actor,
                    );
                    response.deleted.push(path);
                    on_item(ItemTick::Success);
                }
                Err(e) => {
                    self.audit_failed("delete", actor, &path, Some(before), &e);
                    response.failed.push(DeleteFailure {
                        path,
                        reason: e.to_string(),
                    });
                    on_item(ItemTick::Failed);
                }
            }
        }

        info!(
            deleted = response.deleted.len(),
            failed = response.failed.len(),
            "Delete finished"
        );
        Ok(response)
    }

    /// Restore the latest trashed version of each path.
    pub fn restore(&self, paths: &[String], actor: &Actor) -> VaultResult<RestoreResponse> {
        self.restore_observed(paths, actor, &mut ignore_ticks)
    }

    /// [`Self::restore`], reporting each processed item to `on_item`.
    pub fn restore_observed(
        &self,
        paths: &[String],
        actor: &Actor,
        on_item: &mut dyn FnMut(ItemTick),
    ) -> VaultResult<RestoreResponse> {
        self.require_paths("restore", paths, actor)?;
        let mut response = RestoreResponse::default();

        for raw in paths {
            let path = normalize_logical(raw);
            let before = json!({ "path": path });

            let result = if is_root(&path) {
                Err(VaultError::bad_request("root path cannot be restored"))
            } else {
                self.trash
                    .restore_latest(&path, actor)
                    .map_err(|e| self.logical(e))
            };

            match result {
                Ok(record) => {
                    self.audit_ok(
                        "restore",
                        actor,
                        &path,
                        json!({ "trash_id": record.id }),
                        json!({ "path": path, "restored_at": record.restored_at }),
                    );
                    self.publish(
                        Event::FileRestored {
                            path: path.clone(),
                            trash_id: record.id,
                        },
                        actor,
                    );
                    response.restored.push(path);
                    on_item(ItemTick::Success);
                }
                Err(e) => {
                    let reason = if e.is_not_found() {
                        "no trashed version found".to_string()
                    } else {
                        e.to_string()
                    };
                    self.audit_reason("restore", actor, &path, before, &reason);
                    response.failed.push(RestoreFailure { path, reason });
                    on_item(ItemTick::Failed);
                }
            }
        }

        info!(
            restored = response.restored.len(),
            failed = response.failed.len(),
            "Restore finished"
        );
        Ok(response)
    }

    fn require_paths(&self, action: &str, paths: &[String], actor: &Actor) -> VaultResult<()> {
        if paths.is_empty() {
            let e = VaultError::bad_request("paths are required");
            self.audit_failed(action, actor, "", Some(json!({ "paths": paths })), &e);
            return Err(e);
        }
        Ok(())
    }

    /// Pack `sources` into `destination/name` as a zip archive.
    pub fn compress(
        &self,
        sources: &[String],
        destination: &str,
        name: &str,
        actor: &Actor,
    ) -> VaultResult<CompressResponse> {
        let destination = normalize_logical(destination);
        let before = json!({ "sources": sources, "destination": destination, "name": name });

        let result = self
            .compress_inner(sources, &destination, name)
            .map_err(|e| self.logical(e));
        match &result {
            Ok(response) => {
                self.audit_ok(
                    "compress",
                    actor,
                    &response.path,
                    before,
                    json!({ "zip_path": response.path, "size": response.size }),
                );
                self.publish(Event::FileCompressed(response.clone()), actor);
            }
            Err(e) => self.audit_failed("compress", actor, &destination, Some(before), e),
        }
        result
    }

    fn compress_inner(&self, sources: &[String], destination: &str, name: &str) -> VaultResult<CompressResponse> {
        if sources.is_empty() {
            return Err(VaultError::bad_request("sources are required"));
        }

        let mut name = sanitize_filename(name, false)?;
        if !name.to_lowercase().ends_with(".zip") {
            name.push_str(".zip");
        }
        let archive_logical = join_logical(destination, &name);
        let archive_path = self.storage.resolve(&archive_logical)?;

        let mut resolved = Vec::with_capacity(sources.len());
        for raw in sources {
            let source = normalize_logical(raw);
            if is_root(&source) {
                return Err(VaultError::bad_request("root path cannot be compressed"));
            }
            if is_within(&archive_logical, &source) {
                return Err(VaultError::bad_request("archive cannot be placed inside a source"));
            }
            self.storage.stat(&source)?;
            resolved.push(self.storage.resolve(&source)?);
        }

        self.storage.mkdir_all(destination)?;
        if self.storage.exists(&archive_logical)? {
            return Err(VaultError::AlreadyExists {
                path: archive_logical,
            });
        }

        let size = archive::write_zip(&resolved, &archive_path)?;
        info!(path = %archive_logical, size, sources = sources.len(), "Compressed");
        Ok(CompressResponse {
            path: archive_logical,
            size,
        })
    }

    /// Extract the zip archive at `source` into `destination`.
    ///
    /// Unless the policy is `overwrite`, any collision aborts the call with a
    /// `Conflict` listing every colliding entry and nothing is written.
    pub fn decompress(
        &self,
        source: &str,
        destination: &str,
        conflict_policy: &str,
        actor: &Actor,
    ) -> VaultResult<DecompressResponse> {
        let source = normalize_logical(source);
        let destination = normalize_logical(destination);
        let before = json!({
            "source": source,
            "destination": destination,
            "conflict_policy": conflict_policy,
        });

        let result = self
            .decompress_inner(&source, &destination, conflict_policy)
            .map_err(|e| self.logical(e));
        match &result {
            Ok(response) => {
                self.audit_ok(
                    "decompress",
                    actor,
                    &source,
                    before,
                    json!({ "destination": destination, "files_count": response.files.len() }),
                );
                self.publish(Event::FileDecompressed(response.clone()), actor);
            }
            Err(e) => self.audit_failed("decompress", actor, &source, Some(before), e),
        }
        result
    }

    fn decompress_inner(
        &self,
        source: &str,
        destination: &str,
        conflict_policy: &str,
    ) -> VaultResult<DecompressResponse> {
        let policy = ConflictPolicy::parse(conflict_policy)?;
        let metadata = self.storage.stat(source)?;
        if metadata.is_dir() {
            return Err(VaultError::bad_request("source must be a zip file"));
        }
        let archive_path = self.storage.resolve(source)?;
        let destination_path = self.storage.resolve(destination)?;
        let root = self.storage.validator().root();

        let entries = archive::read_entries(&archive_path)?;
        self.storage.mkdir_all(destination)?;

        if policy != ConflictPolicy::Overwrite {
            let conflicts = archive::find_conflicts(&entries, &destination_path, root)?;
            if !conflicts.is_empty() {
                return Err(VaultError::conflict("conflicting files found", conflicts));
            }
        }

        let files = archive::extract_zip(&archive_path, &destination_path, root)?;
        info!(source = %source, destination = %destination, files = files.len(), "Decompressed");
        Ok(DecompressResponse {
            destination: destination.to_string(),
            files,
        })
    }

    /// Trash records, newest first.
    pub fn list_trash(&self, include_restored: bool) -> VaultResult<Vec<TrashRecord>> {
        self.trash.list(include_restored)
    }

    /// Purge one trash entry.
    pub fn permanent_delete_trash(&self, trash_id: Uuid, actor: &Actor) -> VaultResult<()> {
        let before = json!({ "trash_id": trash_id });
        let resource = trash_id.to_string();

        match self.trash.permanent_delete(trash_id).map_err(|e| self.logical(e)) {
            Ok(()) => {
                self.audit_ok("permanent_delete", actor, &resource, before, Value::Null);
                Ok(())
            }
            Err(e) => {
                self.audit_failed("permanent_delete", actor, &resource, Some(before), &e);
                Err(e)
            }
        }
    }

    /// Purge every active trash entry.
    pub fn empty_trash(&self, actor: &Actor) -> VaultResult<usize> {
        match self.trash.empty_trash().map_err(|e| self.logical(e)) {
            Ok(count) => {
                self.audit_ok(
                    "empty_trash",
                    actor,
                    "",
                    Value::Null,
                    json!({ "deleted_count": count }),
                );
                Ok(count)
            }
            Err(e) => {
                self.audit_failed("empty_trash", actor, "", None, &e);
                Err(e)
            }
        }
    }

    /// `err` with host paths rendered as logical paths.
    fn logical(&self, err: VaultError) -> VaultError {
        self.storage.validator().logical_error(err)
    }

    fn audit_ok(&self, action: &str, actor: &Actor, resource: &str, before: Value, after: Value) {
        self.audit.log(AuditEntry::success(
            action,
            actor,
            resource,
            non_null(before),
            non_null(after),
        ));
    }

    fn audit_failed(&self, action: &str, actor: &Actor, resource: &str, before: Option<Value>, err: &VaultError) {
        self.audit_reason(action, actor, resource, before.unwrap_or(Value::Null), &err.to_string());
    }

    fn audit_reason(&self, action: &str, actor: &Actor, resource: &str, before: Value, reason: &str) {
        self.audit
            .log(AuditEntry::failed(action, actor, resource, non_null(before), reason));
    }

    fn publish(&self, event: Event, actor: &Actor) {
        if let Some(events) = &self.events {
            events.publish(event, actor);
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}

/// Whether logical `child` equals `parent` or lies below it.
fn is_within(child: &str, parent: &str) -> bool {
    if parent == "/" {
        return true;
    }
    child == parent
        || child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
}
