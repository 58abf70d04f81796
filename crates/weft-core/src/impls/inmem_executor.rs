//! InMemoryExecutor - 実行中タスクを記録するだけの executor
//!
//! 実際の payload 実行は weft の関心外なので、デモとテストではこれを使います。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{Content, Result, TaskUuid};
use crate::ports::TaskExecutor;

/// Tracks which tasks this instance is currently "running".
#[derive(Clone, Default)]
pub struct InMemoryExecutor {
    running: Arc<Mutex<BTreeMap<TaskUuid, Content>>>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn running(&self) -> BTreeMap<TaskUuid, Content> {
        self.running.lock().await.clone()
    }

    pub async fn is_running(&self, uuid: &TaskUuid) -> bool {
        self.running.lock().await.contains_key(uuid)
    }
}

#[async_trait]
impl TaskExecutor for InMemoryExecutor {
    async fn start(&self, uuid: &TaskUuid, content: &Content) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.contains_key(uuid) {
            debug!(task = %uuid, "already running");
            return Ok(());
        }
        running.insert(uuid.clone(), content.clone());
        info!(task = %uuid, content = %content, "task started");
        Ok(())
    }

    async fn stop(&self, uuid: &TaskUuid) -> Result<()> {
        if self.running.lock().await.remove(uuid).is_some() {
            info!(task = %uuid, "task stopped");
        } else {
            debug!(task = %uuid, "stop for task that is not running");
        }
        Ok(())
    }
}
