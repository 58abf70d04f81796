//! AssignmentStore - worker ごとの割り当て（`/assignments/{worker}/{task}`）の読み書き
//!
//! ここは素の読み書きだけを提供します。リーダーシップによる fencing は
//! 書き込む側（LeaderEngine）の責務です。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::paths::leaf_name;
use crate::domain::{Content, Layout, Result, TaskUuid, WeftError, WorkerId};
use crate::ports::{CoordinationStore, CreateMode, CreateOutcome, DeleteOutcome, WatchStream};

/// worker -> (task -> content)
pub type AssignmentMap = BTreeMap<WorkerId, BTreeMap<TaskUuid, Content>>;

pub struct AssignmentStore {
    store: Arc<dyn CoordinationStore>,
    layout: Layout,
}

impl AssignmentStore {
    pub fn new(store: Arc<dyn CoordinationStore>, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Task uuids currently under `worker`, sorted.
    pub async fn task_ids_of(&self, worker: &WorkerId) -> Result<Vec<TaskUuid>> {
        let root = self.layout.worker_assignments(worker);
        let mut ids = Vec::new();
        for name in self.store.list_children(&root).await? {
            match leaf_name(&format!("{root}/{name}")) {
                Ok(uuid) => ids.push(uuid),
                Err(e) => warn!("skipping assignment entry: {e}"),
            }
        }
        Ok(ids)
    }

    /// Assignments under `worker` with their content.
    pub async fn assignments_of(&self, worker: &WorkerId) -> Result<BTreeMap<TaskUuid, Content>> {
        let mut entries = BTreeMap::new();
        for uuid in self.task_ids_of(worker).await? {
            let path = self.layout.assignment(worker, &uuid);
            match self.store.read_data(&path).await {
                Ok(content) => {
                    entries.insert(uuid, content);
                }
                Err(WeftError::NotFound(_)) => debug!(%path, "assignment removed while reading"),
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    /// Every worker subtree, live or not. Empty subtrees are included.
    pub async fn snapshot(&self) -> Result<AssignmentMap> {
        let root = self.layout.assignments();
        let mut map = AssignmentMap::new();
        for name in self.store.list_children(&root).await? {
            let worker: WorkerId = match leaf_name(&format!("{root}/{name}")) {
                Ok(worker) => worker,
                Err(e) => {
                    warn!("skipping assignment subtree: {e}");
                    continue;
                }
            };
            let entries = self.assignments_of(&worker).await?;
            map.insert(worker, entries);
        }
        Ok(map)
    }

    pub async fn read(&self, worker: &WorkerId, uuid: &TaskUuid) -> Result<Content> {
        self.store
            .read_data(&self.layout.assignment(worker, uuid))
            .await
    }

    pub async fn create(
        &self,
        worker: &WorkerId,
        uuid: &TaskUuid,
        content: &Content,
    ) -> Result<CreateOutcome> {
        self.store
            .create(
                &self.layout.assignment(worker, uuid),
                content,
                CreateMode::Persistent,
            )
            .await
    }

    pub async fn delete(&self, worker: &WorkerId, uuid: &TaskUuid) -> Result<DeleteOutcome> {
        self.store
            .delete(&self.layout.assignment(worker, uuid))
            .await
    }

    /// Remove the `/assignments/{worker}` node itself.
    ///
    /// Children still present at this point are ones the planner could not see
    /// (names that do not decode as uuids); they are deleted by raw name first.
    pub async fn drop_subtree(&self, worker: &WorkerId) -> Result<DeleteOutcome> {
        let root = self.layout.worker_assignments(worker);
        for name in self.store.list_children(&root).await? {
            let path = format!("{root}/{name}");
            if self.store.delete(&path).await? == DeleteOutcome::Deleted {
                warn!(%path, "deleted leftover assignment entry");
            }
        }
        self.store.delete(&root).await
    }

    pub async fn watch_worker(&self, worker: &WorkerId) -> Result<WatchStream> {
        self.store
            .watch_children(&self.layout.worker_assignments(worker))
            .await
    }
}
