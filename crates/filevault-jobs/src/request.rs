//! Job submission requests and their validation.

use filevault_core::{ConflictPolicy, JobOperation, VaultError, VaultResult};
use serde::{Deserialize, Serialize};

/// A request to run a batch operation in the background.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub operation: String,
    /// Inputs for copy, move, compress and decompress.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Inputs for delete and restore.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<String>,
    /// Archive name for compress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// What a request turned into once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    pub operation: JobOperation,
    pub conflict_policy: Option<ConflictPolicy>,
    pub total_items: usize,
}

impl JobRequest {
    pub fn new(operation: JobOperation) -> Self {
        Self {
            operation: operation.to_string(),
            ..Self::default()
        }
    }

    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn conflict_policy(mut self, policy: impl Into<String>) -> Self {
        self.conflict_policy = Some(policy.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check the request and work out its operation, policy and item count.
    pub fn plan(&self) -> VaultResult<JobPlan> {
        let operation = JobOperation::parse(&self.operation)?;

        let total_items = self.inputs(operation).len();
        if total_items == 0 {
            return Err(VaultError::bad_request(
                "job requires at least one source/path",
            ));
        }

        if operation.requires_destination() && self.destination_str().trim().is_empty() {
            return Err(VaultError::bad_request(
                "destination is required for copy/move/compress/decompress",
            ));
        }

        let conflict_policy = if operation.uses_conflict_policy() {
            Some(ConflictPolicy::parse_optional(
                self.conflict_policy.as_deref(),
            )?)
        } else {
            None
        };

        Ok(JobPlan {
            operation,
            conflict_policy,
            total_items,
        })
    }

    /// The list the operation iterates over.
    pub fn inputs(&self, operation: JobOperation) -> &[String] {
        if operation.uses_paths() {
            &self.paths
        } else {
            &self.sources
        }
    }

    pub fn destination_str(&self) -> &str {
        self.destination.as_deref().unwrap_or_default()
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}
