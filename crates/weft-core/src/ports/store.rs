//! CoordinationStore port - 階層型の監視付きストレージ
//!
//! ZooKeeper 的な substrate を想定したインターフェースです。
//! 1 つの実装インスタンス = 1 つのセッション。ephemeral ノードはセッションと寿命を共にします。
//!
//! # 実装
//! - `impls::InMemoryStore`（テスト・デモ用）

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ChildEvent, Content, Result};

/// Node lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Removed automatically when the creating session ends.
    Ephemeral,
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Stream of children events for one watched path.
///
/// The first events are an `Added` snapshot of every child present at install
/// time. Dropping the receiver closes the watch.
pub type WatchStream = mpsc::UnboundedReceiver<ChildEvent>;

/// Opaque identifier of a substrate session.
pub type SessionId = u64;

/// CoordinationStore は substrate のストレージ側の操作
///
/// # 設計原則
/// - すべての呼び出しはネットワーク I/O で待つ可能性がある（async）
/// - 呼び出し側はロックを握ったまま await しない
/// - セッションが切れた後の呼び出しは `SubstrateUnavailable`
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    fn session_id(&self) -> SessionId;

    /// Create `path` with `data`, creating missing parents as persistent nodes.
    async fn create(&self, path: &str, data: &Content, mode: CreateMode)
    -> Result<CreateOutcome>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Child names of `path` in sorted order; empty when `path` does not exist.
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    /// `NotFound` when the node does not exist.
    async fn read_data(&self, path: &str) -> Result<Content>;

    /// Delete a leaf node. `NodeNotEmpty` when it still has children.
    async fn delete(&self, path: &str) -> Result<DeleteOutcome>;

    /// Install a children watch on `path` (the node itself need not exist yet).
    async fn watch_children(&self, path: &str) -> Result<WatchStream>;

    /// End the session: ephemeral nodes go away and elections are left.
    async fn close(&self) -> Result<()>;
}
