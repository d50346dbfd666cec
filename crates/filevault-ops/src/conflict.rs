//! Conflict detection and resolution for write targets.

use std::sync::Arc;

use filevault_core::path::{join_logical, logical_file_name, logical_parent, normalize_logical};
use filevault_core::{ConflictPolicy, VaultError, VaultResult};
use tracing::debug;

use crate::storage::Storage;

/// Reason recorded for items left alone under the `skip` policy.
pub const SKIP_REASON: &str = "skipped: target already exists";

/// Default upper bound for `name (N).ext` candidates.
pub const DEFAULT_RENAME_LIMIT: u32 = 10_000;

/// Outcome of resolving a desired write target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write to this logical path.
    Target(String),
    /// The target exists and the policy says to leave it alone.
    Skip,
}

impl Resolution {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Decides where a write lands when the desired path may already exist.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    storage: Arc<dyn Storage>,
    rename_limit: u32,
}

impl ConflictResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_rename_limit(storage, DEFAULT_RENAME_LIMIT)
    }

    pub fn with_rename_limit(storage: Arc<dyn Storage>, rename_limit: u32) -> Self {
        Self {
            storage,
            rename_limit: rename_limit.max(1),
        }
    }

    /// Resolve `desired` against `policy`.
    ///
    /// `overwrite` removes the existing target before returning it. Nothing is
    /// mutated for `rename` or `skip`.
    pub fn resolve_target(&self, desired: &str, policy: ConflictPolicy) -> VaultResult<Resolution> {
        let desired = normalize_logical(desired);
        if !self.storage.exists(&desired)? {
            return Ok(Resolution::Target(desired));
        }

        match policy {
            ConflictPolicy::Skip => {
                debug!(target = %desired, "Target exists, skipping");
                Ok(Resolution::Skip)
            }
            ConflictPolicy::Overwrite => {
                debug!(target = %desired, "Target exists, removing before overwrite");
                self.storage.remove_all(&desired)?;
                Ok(Resolution::Target(desired))
            }
            ConflictPolicy::Rename => self.next_free_name(&desired).map(Resolution::Target),
        }
    }

    /// Like [`Self::resolve_target`] but with an unparsed policy string.
    pub fn resolve_target_raw(&self, desired: &str, policy: &str) -> VaultResult<Resolution> {
        self.resolve_target(desired, ConflictPolicy::parse(policy)?)
    }

    fn next_free_name(&self, desired: &str) -> VaultResult<String> {
        let parent = logical_parent(desired);
        let name = logical_file_name(desired);
        let (base, extension) = split_extension(&name);

        for n in 1..=self.rename_limit {
            let candidate = join_logical(&parent, &format!("{base} ({n}){extension}"));
            if !self.storage.exists(&candidate)? {
                debug!(target = %desired, renamed = %candidate, "Target exists, renaming");
                return Ok(candidate);
            }
        }

        Err(VaultError::conflict(
            format!("unable to resolve conflict for {desired}"),
            vec![desired.to_string()],
        ))
    }
}

/// Split `name` into stem and extension (with its dot).
///
/// A leading dot alone does not start an extension, so `.bashrc` has none.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}
