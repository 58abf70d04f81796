//! Status - 読み取り専用のレポート API
//!
//! 書き込みパスには関与しません。substrate の現在の状態をそのまま投影するだけです。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::assignments::AssignmentStore;
use super::leadership::LeadershipMonitor;
use super::membership::WorkerMembership;
use crate::domain::{Assignment, Result, TaskUuid, WorkerId};
use crate::ports::Participant;

/// Point-in-time view of the cluster as seen from one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub instance: WorkerId,
    pub leader: Option<String>,
    pub participants: Vec<Participant>,
    pub live_workers: Vec<WorkerId>,
    pub my_assignments: Vec<TaskUuid>,
    /// worker -> "uuid---content"
    pub assignments: BTreeMap<WorkerId, Vec<String>>,
}

impl StatusReport {
    pub fn total_assignments(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

pub struct StatusView {
    worker_id: WorkerId,
    membership: WorkerMembership,
    assignments: AssignmentStore,
    leadership: Arc<LeadershipMonitor>,
}

impl StatusView {
    pub fn new(
        worker_id: WorkerId,
        membership: WorkerMembership,
        assignments: AssignmentStore,
        leadership: Arc<LeadershipMonitor>,
    ) -> Self {
        Self {
            worker_id,
            membership,
            assignments,
            leadership,
        }
    }

    pub async fn my_assignments(&self) -> Result<Vec<TaskUuid>> {
        self.assignments.task_ids_of(&self.worker_id).await
    }

    /// Assignments of every live worker, rendered as "uuid---content".
    pub async fn all_worker_assignments(&self) -> Result<BTreeMap<WorkerId, Vec<String>>> {
        let mut out = BTreeMap::new();
        for worker in self.membership.list_live_workers().await? {
            let lines = self
                .assignments
                .assignments_of(&worker)
                .await?
                .into_iter()
                .map(|(uuid, content)| {
                    Assignment {
                        worker: worker.clone(),
                        uuid,
                        content,
                    }
                    .describe()
                })
                .collect();
            out.insert(worker, lines);
        }
        Ok(out)
    }

    pub async fn current_leader(&self) -> Result<Option<Participant>> {
        self.leadership.current_leader().await
    }

    pub async fn all_participants(&self) -> Result<Vec<Participant>> {
        self.leadership.participants().await
    }

    pub async fn snapshot(&self) -> Result<StatusReport> {
        let participants = self.all_participants().await?;
        let leader = participants
            .iter()
            .find(|p| p.is_leader)
            .map(|p| p.id.clone());
        Ok(StatusReport {
            instance: self.worker_id.clone(),
            leader,
            participants,
            live_workers: self
                .membership
                .list_live_workers()
                .await?
                .into_iter()
                .collect(),
            my_assignments: self.my_assignments().await?,
            assignments: self.all_worker_assignments().await?,
        })
    }
}
