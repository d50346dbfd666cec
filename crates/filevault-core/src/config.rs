//! Runtime configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Configuration shared by the engine, the trash store and the job layer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct VaultConfig {
    /// Sandbox root every logical path resolves under.
    pub storage_root: PathBuf,

    /// Directory holding the JSON repositories.
    #[builder(default = "default_state_dir()")]
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Trash area. Defaults to `<state_dir>/trash`.
    #[builder(default)]
    #[serde(default)]
    pub trash_root: Option<PathBuf>,

    /// Capacity of the job queue; a full queue blocks submitters.
    #[builder(default = "default_queue_capacity()")]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-subscriber buffer of live job updates.
    #[builder(default = "default_subscriber_buffer()")]
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Highest `N` tried when renaming around a conflict.
    #[builder(default = "default_rename_limit()")]
    #[serde(default = "default_rename_limit")]
    pub rename_limit: u32,

    #[builder(default = "default_page_limit()")]
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,

    #[builder(default = "default_max_page_limit()")]
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".filevault")
}

fn default_queue_capacity() -> usize {
    256
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_rename_limit() -> u32 {
    10_000
}

fn default_page_limit() -> usize {
    100
}

fn default_max_page_limit() -> usize {
    500
}

impl VaultConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.storage_root {
            Some(ref root) if root.to_string_lossy().trim().is_empty() => {
                return Err("Storage root cannot be empty".to_string());
            }
            Some(_) => {}
            None => return Err("Storage root is required".to_string()),
        }
        if self.queue_capacity == Some(0) {
            return Err("Queue capacity must be positive".to_string());
        }
        if self.subscriber_buffer == Some(0) {
            return Err("Subscriber buffer must be positive".to_string());
        }
        if self.rename_limit == Some(0) {
            return Err("Rename limit must be positive".to_string());
        }
        let default_page = self.default_page_limit.unwrap_or_else(default_page_limit);
        let max_page = self.max_page_limit.unwrap_or_else(default_max_page_limit);
        check_page_limits(default_page, max_page)
    }
}

fn check_page_limits(default_page: usize, max_page: usize) -> Result<(), String> {
    if default_page == 0 || max_page == 0 {
        return Err("Page limits must be positive".to_string());
    }
    if default_page > max_page {
        return Err(format!(
            "Default page limit {default_page} exceeds max page limit {max_page}"
        ));
    }
    Ok(())
}

impl VaultConfig {
    /// Create a new config builder.
    pub fn builder() -> VaultConfigBuilder {
        VaultConfigBuilder::default()
    }

    /// Config for a storage root with every other field defaulted.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            state_dir: default_state_dir(),
            trash_root: None,
            queue_capacity: default_queue_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
            rename_limit: default_rename_limit(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> VaultResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| VaultError::bad_request(format!("invalid config: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML file from disk.
    pub fn load(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| VaultError::io(path, e))?;
        Self::from_toml_str(&source)
    }

    /// Effective trash directory.
    pub fn trash_dir(&self) -> PathBuf {
        self.trash_root
            .clone()
            .unwrap_or_else(|| self.state_dir.join("trash"))
    }

    pub fn trash_records_file(&self) -> PathBuf {
        self.state_dir.join("trash.json")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.state_dir.join("jobs")
    }

    fn check(&self) -> VaultResult<()> {
        if self.storage_root.to_string_lossy().trim().is_empty() {
            return Err(VaultError::bad_request("storage_root cannot be empty"));
        }
        if self.queue_capacity == 0 || self.subscriber_buffer == 0 || self.rename_limit == 0 {
            return Err(VaultError::bad_request(
                "queue_capacity, subscriber_buffer and rename_limit must be positive",
            ));
        }
        check_page_limits(self.default_page_limit, self.max_page_limit).map_err(VaultError::bad_request)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
