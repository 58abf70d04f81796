//! TaskExecutor port - 割り当てられたタスクをローカルで実行する外部協力者
//!
//! payload の意味は weft の関心外です。ここでは start/stop だけを約束します。

use async_trait::async_trait;

use crate::domain::{Content, Result, TaskUuid};

/// Executes assigned tasks on this instance.
///
/// Both calls must be idempotent: watches may redeliver a snapshot, so `start`
/// can arrive for a task that is already running and `stop` for one that is not.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn start(&self, uuid: &TaskUuid, content: &Content) -> Result<()>;

    async fn stop(&self, uuid: &TaskUuid) -> Result<()>;
}
