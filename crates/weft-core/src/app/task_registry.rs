//! TaskRegistry - グローバルなタスク一覧（`/tasks`）へのアクセスと監視
//!
//! - `watch`: 初回スナップショット（既存タスク全部の Added）→ ライブイベント
//! - `read_all`: リーダー就任時の reconciliation 用
//! - `submit` / `cancel`: 外部プロデューサー側の操作（デモとテスト用）

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::watch_loop::WatchLoop;
use crate::domain::paths::leaf_name;
use crate::domain::{
    ChildEvent, Content, EngineEvent, Layout, Result, TaskEvent, TaskUuid, WeftError,
};
use crate::ports::{CoordinationStore, CreateMode, CreateOutcome, DeleteOutcome};

pub struct TaskRegistry {
    store: Arc<dyn CoordinationStore>,
    layout: Layout,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Submit a task. Returns `AlreadyExists` without touching content when
    /// the uuid is taken (content is immutable once created).
    pub async fn submit(&self, uuid: &TaskUuid, content: &Content) -> Result<CreateOutcome> {
        let outcome = self
            .store
            .create(&self.layout.task(uuid), content, CreateMode::Persistent)
            .await?;
        info!(task = %uuid, ?outcome, "task submitted");
        Ok(outcome)
    }

    pub async fn cancel(&self, uuid: &TaskUuid) -> Result<DeleteOutcome> {
        let outcome = self.store.delete(&self.layout.task(uuid)).await?;
        info!(task = %uuid, ?outcome, "task cancelled");
        Ok(outcome)
    }

    /// Every readable task in the registry.
    ///
    /// Entries that vanish between listing and reading, or whose names are not
    /// valid uuids, are logged and skipped.
    pub async fn read_all(&self) -> Result<BTreeMap<TaskUuid, Content>> {
        let root = self.layout.tasks();
        let mut tasks = BTreeMap::new();
        for name in self.store.list_children(&root).await? {
            let path = format!("{root}/{name}");
            let uuid: TaskUuid = match leaf_name(&path) {
                Ok(uuid) => uuid,
                Err(e) => {
                    warn!("skipping task entry: {e}");
                    continue;
                }
            };
            match self.store.read_data(&path).await {
                Ok(content) => {
                    tasks.insert(uuid, content);
                }
                Err(WeftError::NotFound(_)) => debug!(%path, "task removed while reading"),
                Err(e) => return Err(e),
            }
        }
        Ok(tasks)
    }

    /// Watch `/tasks` and forward typed events into `sink`.
    pub async fn watch(&self, sink: mpsc::UnboundedSender<EngineEvent>) -> Result<WatchLoop> {
        let stream = self.store.watch_children(&self.layout.tasks()).await?;
        let handle = WatchLoop::spawn("tasks", stream, move |event: ChildEvent| {
            let sink = sink.clone();
            async move {
                match task_event(event) {
                    Ok(event) => {
                        let _ = sink.send(event.into());
                    }
                    Err(e) => warn!("ignoring task event: {e}"),
                }
            }
        });
        debug!("watching task registry");
        Ok(handle)
    }
}

/// Map a raw `/tasks` children event to a typed registry event.
pub fn task_event(event: ChildEvent) -> Result<TaskEvent> {
    Ok(match event {
        ChildEvent::Added { path, data } => TaskEvent::Added {
            uuid: leaf_name(&path)?,
            content: data,
        },
        ChildEvent::Removed { path, .. } => TaskEvent::Removed {
            uuid: leaf_name(&path)?,
        },
        ChildEvent::Updated { path, .. } => TaskEvent::Updated {
            uuid: leaf_name(&path)?,
        },
    })
}
