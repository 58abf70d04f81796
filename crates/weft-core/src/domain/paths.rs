//! Logical path layout on the coordination substrate.
//!
//! ```text
//! {root}/workers/{instanceId}              ephemeral liveness marker
//! {root}/tasks/{taskUuid}                  global registry entry (data = content)
//! {root}/assignments/{workerId}/{taskUuid} assignment entry (data = content)
//! {root}/leader                            election group
//! ```

use super::errors::{Result, WeftError};
use super::ids::{Name, NameMarker, TaskUuid, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: String,
}

impl Layout {
    /// `root` は空（トップレベル）か、`/` で始まり `/` で終わらないパス
    pub fn new(root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        if !root.is_empty() && (!root.starts_with('/') || root.ends_with('/')) {
            return Err(WeftError::Config(format!(
                "root must be empty or look like /prefix, got {root:?}"
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn workers(&self) -> String {
        format!("{}/workers", self.root)
    }

    pub fn worker(&self, id: &WorkerId) -> String {
        format!("{}/{}", self.workers(), id)
    }

    pub fn tasks(&self) -> String {
        format!("{}/tasks", self.root)
    }

    pub fn task(&self, uuid: &TaskUuid) -> String {
        format!("{}/{}", self.tasks(), uuid)
    }

    pub fn assignments(&self) -> String {
        format!("{}/assignments", self.root)
    }

    pub fn worker_assignments(&self, worker: &WorkerId) -> String {
        format!("{}/{}", self.assignments(), worker)
    }

    pub fn assignment(&self, worker: &WorkerId, uuid: &TaskUuid) -> String {
        format!("{}/{}", self.worker_assignments(worker), uuid)
    }

    pub fn leader(&self) -> String {
        format!("{}/leader", self.root)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            root: String::new(),
        }
    }
}

/// Last segment of a child path, parsed as a typed name.
///
/// Watch events carry full paths; every watcher turns them back into ids here.
pub fn leaf_name<T: NameMarker>(path: &str) -> Result<Name<T>> {
    let leaf = path.rsplit('/').next().unwrap_or(path);
    Name::parse(leaf).map_err(|e| WeftError::MalformedPayload {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
