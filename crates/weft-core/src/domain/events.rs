//! Events - watch から届くイベントの型
//!
//! substrate の生イベント（ChildEvent）を、各 watcher が用途別の型付きイベントに変換します。
//! `Updated` は「内容は不変」というポリシーで無視しますが、fallthrough で握りつぶすのではなく
//! variant として明示しておきます。

use super::ids::{TaskUuid, WorkerId};
use super::task::Content;

/// Raw children-watch event from the coordination substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added { path: String, data: Content },
    Removed { path: String, data: Content },
    Updated { path: String, data: Content },
}

impl ChildEvent {
    pub fn path(&self) -> &str {
        match self {
            ChildEvent::Added { path, .. }
            | ChildEvent::Removed { path, .. }
            | ChildEvent::Updated { path, .. } => path,
        }
    }
}

/// Global task registry change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Added { uuid: TaskUuid, content: Content },
    Removed { uuid: TaskUuid },
    /// Task content is immutable; no action is taken.
    Updated { uuid: TaskUuid },
}

/// Worker membership change (liveness markers under `/workers`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Joined(WorkerId),
    Left(WorkerId),
    /// Marker data changed; membership is unaffected.
    Updated(WorkerId),
}

/// Change to this instance's own assignment subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentEvent {
    Added { uuid: TaskUuid, content: Content },
    Removed { uuid: TaskUuid },
    Updated { uuid: TaskUuid },
}

/// Leadership transition delivered by the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipChange {
    Acquired,
    Lost,
}

/// Everything the leader engine reacts to, merged into one queue.
///
/// Per-source order is preserved; order across sources is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Task(TaskEvent),
    Worker(WorkerEvent),
    Leadership(LeadershipChange),
}

impl From<TaskEvent> for EngineEvent {
    fn from(event: TaskEvent) -> Self {
        EngineEvent::Task(event)
    }
}

impl From<WorkerEvent> for EngineEvent {
    fn from(event: WorkerEvent) -> Self {
        EngineEvent::Worker(event)
    }
}

impl From<LeadershipChange> for EngineEvent {
    fn from(change: LeadershipChange) -> Self {
        EngineEvent::Leadership(change)
    }
}
