use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{TaskUuid, WorkerId};

/// Opaque task payload.
///
/// weft never interprets the bytes; they are copied byte-for-byte from the
/// registry entry into assignments and across migrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Content(Vec<u8>);

impl Content {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Human-readable rendering for logs and status views.
    pub fn to_text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text_lossy())
    }
}

/// (worker, task, content) の三つ組。`/assignments/{worker}/{task}` に対応
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub worker: WorkerId,
    pub uuid: TaskUuid,
    pub content: Content,
}

impl Assignment {
    /// Status line format: `taskUuid---content`.
    pub fn describe(&self) -> String {
        format!("{}---{}", self.uuid, self.content)
    }
}
