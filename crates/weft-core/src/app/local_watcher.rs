//! LocalExecutionWatcher - 自分の割り当て（`/assignments/{self}`）を監視してローカル実行を制御
//!
//! リーダーかどうかに関係なく、全インスタンスで同じように動きます。
//! Added で executor.start、Removed で executor.stop。Updated は無視します。

use std::sync::Arc;

use tracing::{debug, warn};

use super::assignments::AssignmentStore;
use super::watch_loop::WatchLoop;
use crate::domain::paths::leaf_name;
use crate::domain::{AssignmentEvent, ChildEvent, Result, WorkerId};
use crate::ports::TaskExecutor;

pub struct LocalExecutionWatcher {
    worker_id: WorkerId,
    assignments: AssignmentStore,
    executor: Arc<dyn TaskExecutor>,
}

impl LocalExecutionWatcher {
    pub fn new(
        worker_id: WorkerId,
        assignments: AssignmentStore,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            worker_id,
            assignments,
            executor,
        }
    }

    /// Install the watch on this instance's own subtree.
    pub async fn install(&self) -> Result<WatchLoop> {
        let stream = self.assignments.watch_worker(&self.worker_id).await?;
        let executor = self.executor.clone();
        let handle = WatchLoop::spawn("local-assignments", stream, move |event: ChildEvent| {
            let executor = executor.clone();
            async move {
                match assignment_event(event) {
                    Ok(event) => on_assignment(executor.as_ref(), event).await,
                    Err(e) => warn!("ignoring assignment event: {e}"),
                }
            }
        });
        debug!(worker = %self.worker_id, "watching own assignments");
        Ok(handle)
    }
}

async fn on_assignment(executor: &dyn TaskExecutor, event: AssignmentEvent) {
    let result = match &event {
        AssignmentEvent::Added { uuid, content } => executor.start(uuid, content).await,
        AssignmentEvent::Removed { uuid } => executor.stop(uuid).await,
        AssignmentEvent::Updated { uuid } => {
            debug!(task = %uuid, "assignment update ignored");
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(?event, "executor failed: {e}");
    }
}

/// Map a raw `/assignments/{self}` children event to a typed event.
pub fn assignment_event(event: ChildEvent) -> Result<AssignmentEvent> {
    Ok(match event {
        ChildEvent::Added { path, data } => AssignmentEvent::Added {
            uuid: leaf_name(&path)?,
            content: data,
        },
        ChildEvent::Removed { path, .. } => AssignmentEvent::Removed {
            uuid: leaf_name(&path)?,
        },
        ChildEvent::Updated { path, .. } => AssignmentEvent::Updated {
            uuid: leaf_name(&path)?,
        },
    })
}
