//! LeaderEngine - リーダーだけが動かす割り当てエンジン
//!
//! # 状態遷移
//! ```text
//! Follower --Acquired--> Leader (まず reconcile)
//! Leader   --Lost / fenced write--> Follower
//! ```
//!
//! - Follower の間、タスク・worker のイベントは観測するだけで捨てる
//! - 書き込みはすべて fenced: 直前にリーダーシップを substrate に問い合わせ直す
//! - fenced で弾かれた書き込みはエラーではない（リトライせず Follower に戻るだけ）
//! - イベントごとのエラーはログに出して握る。エンジンは落ちない

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use super::assignments::{AssignmentMap, AssignmentStore};
use super::balancer::{self, Action};
use super::context::InstanceContext;
use super::leadership::LeadershipMonitor;
use super::membership::WorkerMembership;
use super::task_registry::TaskRegistry;
use super::watch_loop::WatchLoop;
use crate::domain::{
    Content, EngineEvent, ErrorKind, Layout, LeadershipChange, Result, TaskEvent, TaskUuid,
    WeftError, WorkerEvent, WorkerId,
};
use crate::ports::{CoordinationStore, CreateOutcome, DeleteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Follower,
    Leader,
}

pub struct LeaderEngine {
    worker_id: WorkerId,
    layout: Layout,
    tolerance: usize,
    membership: WorkerMembership,
    registry: TaskRegistry,
    assignments: AssignmentStore,
    leadership: Arc<LeadershipMonitor>,
    state: EngineState,
}

impl LeaderEngine {
    pub fn new(
        ctx: &InstanceContext,
        store: Arc<dyn CoordinationStore>,
        leadership: Arc<LeadershipMonitor>,
    ) -> Self {
        Self {
            worker_id: ctx.worker_id.clone(),
            layout: ctx.layout.clone(),
            tolerance: ctx.config.rebalance_tolerance,
            membership: WorkerMembership::new(store.clone(), ctx.layout.clone()),
            registry: TaskRegistry::new(store.clone(), ctx.layout.clone()),
            assignments: AssignmentStore::new(store, ctx.layout.clone()),
            leadership,
            state: EngineState::Follower,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Consume `events` on a dedicated task.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<EngineEvent>) -> EngineHandle {
        let engine = Arc::new(Mutex::new(self));
        let watch = WatchLoop::spawn("engine", events, {
            let engine = engine.clone();
            move |event: EngineEvent| {
                let engine = engine.clone();
                async move {
                    let mut engine = engine.lock().await;
                    engine.handle(event).await;
                }
            }
        });
        EngineHandle { engine, watch }
    }

    /// Handle one event. Never fails: errors are logged here.
    pub async fn handle(&mut self, event: EngineEvent) {
        let result = match event {
            EngineEvent::Leadership(LeadershipChange::Acquired) => {
                info!(worker = %self.worker_id, "acquired leadership, reconciling");
                self.state = EngineState::Leader;
                self.reconcile().await
            }
            EngineEvent::Leadership(LeadershipChange::Lost) => {
                if self.state == EngineState::Leader {
                    info!(worker = %self.worker_id, "lost leadership");
                }
                self.state = EngineState::Follower;
                Ok(())
            }
            event if self.state == EngineState::Follower => {
                debug!(?event, "follower, event discarded");
                Ok(())
            }
            EngineEvent::Task(TaskEvent::Added { uuid, content }) => {
                self.on_task_added(&uuid, &content).await
            }
            EngineEvent::Task(TaskEvent::Removed { uuid }) => self.on_task_removed(&uuid).await,
            EngineEvent::Task(TaskEvent::Updated { uuid }) => {
                debug!(task = %uuid, "task content is immutable, update ignored");
                Ok(())
            }
            EngineEvent::Worker(WorkerEvent::Joined(id)) => self.on_worker_joined(&id).await,
            EngineEvent::Worker(WorkerEvent::Left(id)) => self.on_worker_lost(&id).await,
            EngineEvent::Worker(WorkerEvent::Updated(id)) => {
                debug!(worker = %id, "marker update ignored");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_fenced() => {
                info!(worker = %self.worker_id, "{e}, stepping down");
                self.state = EngineState::Follower;
            }
            Err(e) => match e.kind() {
                ErrorKind::Expected => info!("event skipped: {e}"),
                ErrorKind::Transient => warn!("event failed: {e}"),
                ErrorKind::Fatal => error!("event failed: {e}"),
            },
        }
    }

    /// Full corrective pass: registry vs. live workers vs. assignment store.
    async fn reconcile(&self) -> Result<()> {
        let tasks = self.registry.read_all().await?;
        let live = self.membership.list_live_workers().await?;
        let current = self.assignments.snapshot().await?;

        let actions = balancer::plan_reconcile(&tasks, &live, &current);
        info!(
            tasks = tasks.len(),
            workers = live.len(),
            actions = actions.len(),
            "reconciliation planned"
        );
        if live.is_empty() && !tasks.is_empty() {
            info!("no live worker, tasks stay unassigned");
        }
        self.apply(actions).await
    }

    async fn on_task_added(&self, uuid: &TaskUuid, content: &Content) -> Result<()> {
        let live = self.membership.list_live_workers().await?;
        if live.is_empty() {
            info!(task = %uuid, "no live worker, task stays unassigned");
            return Ok(());
        }
        let current = self.assignments.snapshot().await?;
        let actions = balancer::plan_task_added(uuid, content, &live, &current);
        if actions.is_empty() {
            debug!(task = %uuid, "already assigned");
        }
        self.apply(actions).await
    }

    async fn on_task_removed(&self, uuid: &TaskUuid) -> Result<()> {
        let current = self.assignments.snapshot().await?;
        let holders: Vec<WorkerId> = holders_of(&current, uuid);
        if holders.is_empty() {
            info!(task = %uuid, "removed task had no assignment");
            return Ok(());
        }
        let actions = holders
            .into_iter()
            .map(|worker| Action::Unassign {
                worker,
                uuid: uuid.clone(),
            })
            .collect();
        self.apply(actions).await
    }

    async fn on_worker_joined(&self, id: &WorkerId) -> Result<()> {
        if !self.membership.is_live(id).await? {
            debug!(worker = %id, "joined worker already gone");
            return Ok(());
        }
        let tasks = self.registry.read_all().await?;
        let live = self.membership.list_live_workers().await?;
        let current = self.assignments.snapshot().await?;
        debug!(loads = ?balancer::loads(&live, &current), "loads before rebalance");

        let actions = balancer::plan_worker_joined(id, &tasks, &live, &current, self.tolerance);
        info!(worker = %id, moves = actions.len(), "worker joined, rebalancing");
        self.apply(actions).await
    }

    async fn on_worker_lost(&self, id: &WorkerId) -> Result<()> {
        // 同じ id で再登録済みなら何もしない
        if self.membership.is_live(id).await? {
            debug!(worker = %id, "worker re-registered, nothing to evacuate");
            return Ok(());
        }
        let current = self.assignments.snapshot().await?;
        if !current.contains_key(id) {
            debug!(worker = %id, "lost worker had no assignment subtree");
            return Ok(());
        }
        let tasks = self.registry.read_all().await?;
        let live = self.membership.list_live_workers().await?;

        let actions = balancer::plan_worker_lost(id, &tasks, &live, &current);
        info!(
            worker = %id,
            held = current[id].len(),
            survivors = live.len(),
            "worker lost, redistributing"
        );
        self.apply(actions).await
    }

    /// Apply a plan. A fenced write aborts the rest of the plan; any other
    /// per-action failure is logged and the next action is attempted.
    async fn apply(&self, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            match self.apply_one(&action).await {
                Ok(()) => {}
                Err(e) if e.is_fenced() => return Err(e),
                Err(e) => warn!(?action, "action failed: {e}"),
            }
        }
        Ok(())
    }

    async fn apply_one(&self, action: &Action) -> Result<()> {
        match action {
            Action::Assign {
                worker,
                uuid,
                content,
            } => {
                self.fenced_create(worker, uuid, content).await?;
                info!(task = %uuid, %worker, "assigned");
            }
            Action::Move {
                uuid,
                from,
                to,
                content,
            } => {
                self.fenced_create(to, uuid, content).await?;
                self.fenced_delete(from, uuid).await?;
                info!(task = %uuid, %from, %to, "moved");
            }
            Action::Unassign { worker, uuid } => {
                self.fenced_delete(worker, uuid).await?;
                info!(task = %uuid, %worker, "unassigned");
            }
            Action::DropSubtree { worker } => {
                self.fence(&self.layout.worker_assignments(worker)).await?;
                if self.assignments.drop_subtree(worker).await? == DeleteOutcome::Deleted {
                    debug!(%worker, "dropped assignment subtree");
                }
            }
        }
        Ok(())
    }

    async fn fence(&self, path: &str) -> Result<()> {
        if self.leadership.has_leadership().await {
            Ok(())
        } else {
            Err(WeftError::LeadershipFenced {
                path: path.to_string(),
            })
        }
    }

    async fn fenced_create(
        &self,
        worker: &WorkerId,
        uuid: &TaskUuid,
        content: &Content,
    ) -> Result<()> {
        self.fence(&self.layout.assignment(worker, uuid)).await?;
        if self.assignments.create(worker, uuid, content).await? == CreateOutcome::AlreadyExists {
            debug!(task = %uuid, %worker, "assignment already present");
        }
        Ok(())
    }

    async fn fenced_delete(&self, worker: &WorkerId, uuid: &TaskUuid) -> Result<()> {
        self.fence(&self.layout.assignment(worker, uuid)).await?;
        if self.assignments.delete(worker, uuid).await? == DeleteOutcome::NotFound {
            info!(task = %uuid, %worker, "assignment already gone");
        }
        Ok(())
    }
}

fn holders_of(assignments: &AssignmentMap, uuid: &TaskUuid) -> Vec<WorkerId> {
    assignments
        .iter()
        .filter(|(_, entries)| entries.contains_key(uuid))
        .map(|(worker, _)| worker.clone())
        .collect()
}

/// Running engine: its loop plus shared access to its state.
pub struct EngineHandle {
    engine: Arc<Mutex<LeaderEngine>>,
    watch: WatchLoop,
}

impl EngineHandle {
    pub async fn state(&self) -> EngineState {
        self.engine.lock().await.state()
    }

    pub async fn shutdown_and_join(self) {
        self.watch.shutdown_and_join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::Config;
    use crate::impls::{InMemoryCluster, InMemoryStore};
    use crate::ports::{CreateMode, LeaderElection};
    use std::time::Duration;

    struct Node {
        store: Arc<InMemoryStore>,
        leadership: Arc<LeadershipMonitor>,
        engine: LeaderEngine,
        // keeps the forwarded leadership events alive
        _events: mpsc::UnboundedReceiver<EngineEvent>,
        _election: WatchLoop,
    }

    async fn node(cluster: &InMemoryCluster, id: &str) -> Node {
        let config = Config {
            instance_id: id.to_string(),
            ..Config::default()
        };
        let ctx = InstanceContext::new(config).unwrap();
        let store = Arc::new(cluster.connect().await);
        WorkerMembership::new(store.clone(), ctx.layout.clone())
            .register_self(&ctx.worker_id)
            .await
            .unwrap();

        let election: Arc<dyn LeaderElection> = store.clone();
        let leadership = Arc::new(LeadershipMonitor::new(
            election,
            &ctx.layout,
            ctx.worker_id.clone(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let election_loop = leadership.join(tx).await.unwrap();
        let engine = LeaderEngine::new(&ctx, store.clone(), leadership.clone());
        Node {
            store,
            leadership,
            engine,
            _events: rx,
            _election: election_loop,
        }
    }

    fn w(id: &str) -> WorkerId {
        WorkerId::parse(id).unwrap()
    }

    fn t(id: &str) -> TaskUuid {
        TaskUuid::parse(id).unwrap()
    }

    fn added(uuid: &str, content: &str) -> EngineEvent {
        TaskEvent::Added {
            uuid: t(uuid),
            content: Content::from(content),
        }
        .into()
    }

    fn registry(node: &Node) -> TaskRegistry {
        TaskRegistry::new(node.store.clone(), Layout::default())
    }

    fn assignments(node: &Node) -> AssignmentStore {
        AssignmentStore::new(node.store.clone(), Layout::default())
    }

    #[tokio::test]
    async fn task_added_is_assigned_to_the_only_worker() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        n1.engine.handle(LeadershipChange::Acquired.into()).await;
        assert_eq!(n1.engine.state(), EngineState::Leader);

        registry(&n1).submit(&t("T1"), &Content::from("payload1")).await.unwrap();
        n1.engine.handle(added("T1", "payload1")).await;

        let content = assignments(&n1).read(&w("W1"), &t("T1")).await.unwrap();
        assert_eq!(content, Content::from("payload1"));
    }

    #[tokio::test]
    async fn task_removed_deletes_its_assignment() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        n1.engine.handle(LeadershipChange::Acquired.into()).await;
        n1.engine.handle(added("T1", "payload1")).await;

        n1.engine
            .handle(TaskEvent::Removed { uuid: t("T1") }.into())
            .await;
        assert!(assignments(&n1).task_ids_of(&w("W1")).await.unwrap().is_empty());

        // removing again is a no-op
        n1.engine
            .handle(TaskEvent::Removed { uuid: t("T1") }.into())
            .await;
        assert_eq!(n1.engine.state(), EngineState::Leader);
    }

    #[tokio::test]
    async fn follower_discards_events() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let _n1 = node(&cluster, "W1").await;
        let mut n2 = node(&cluster, "W2").await;

        n2.engine.handle(added("T1", "payload1")).await;

        assert_eq!(n2.engine.state(), EngineState::Follower);
        let snapshot = assignments(&n2).snapshot().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn stale_leader_is_fenced_and_steps_down() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        let mut n2 = node(&cluster, "W2").await;
        n1.engine.handle(LeadershipChange::Acquired.into()).await;

        // W1 releases; W1's engine has not seen the Lost event yet
        n1.leadership.release().await.unwrap();
        assert!(n2.leadership.has_leadership().await);

        registry(&n1).submit(&t("T1"), &Content::from("payload1")).await.unwrap();
        n1.engine.handle(added("T1", "payload1")).await;
        assert_eq!(n1.engine.state(), EngineState::Follower);
        assert!(assignments(&n1).snapshot().await.unwrap().is_empty());

        // the real leader reconciles the missed task
        n2.engine.handle(LeadershipChange::Acquired.into()).await;
        let snapshot = assignments(&n2).snapshot().await.unwrap();
        let holders = holders_of(&snapshot, &t("T1"));
        assert_eq!(holders, vec![w("W1")]);
    }

    #[tokio::test]
    async fn replayed_events_do_not_duplicate_assignments() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        let _n2 = node(&cluster, "W2").await;
        n1.engine.handle(LeadershipChange::Acquired.into()).await;

        for _ in 0..3 {
            n1.engine.handle(added("T1", "payload1")).await;
            n1.engine.handle(WorkerEvent::Joined(w("W2")).into()).await;
            n1.engine.handle(WorkerEvent::Joined(w("W1")).into()).await;
        }

        let snapshot = assignments(&n1).snapshot().await.unwrap();
        assert_eq!(holders_of(&snapshot, &t("T1")).len(), 1);
    }

    #[tokio::test]
    async fn acquisition_reconciles_dead_subtrees_and_orphans() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        let registry = registry(&n1);
        let store = assignments(&n1);
        for uuid in ["T1", "T2", "T3"] {
            registry.submit(&t(uuid), &Content::from(uuid)).await.unwrap();
        }
        // left behind by a worker that died while nobody led
        store.create(&w("W9"), &t("T1"), &Content::from("T1")).await.unwrap();
        store.create(&w("W9"), &t("T7"), &Content::from("T7")).await.unwrap();

        n1.engine.handle(LeadershipChange::Acquired.into()).await;

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![w("W1")]);
        assert_eq!(
            snapshot[&w("W1")].keys().cloned().collect::<Vec<_>>(),
            vec![t("T1"), t("T2"), t("T3")]
        );
    }

    #[tokio::test]
    async fn undecodable_entries_do_not_abort_reconciliation() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        let raw = n1.store.clone();
        for (path, data) in [
            ("/tasks/.", "junk"),
            ("/tasks/T1", "p1"),
            ("/assignments/W9/..", "junk"),
            ("/assignments/W9/T2", "p2"),
        ] {
            raw.create(path, &Content::from(data), CreateMode::Persistent)
                .await
                .unwrap();
        }

        n1.engine.handle(LeadershipChange::Acquired.into()).await;

        assert_eq!(n1.engine.state(), EngineState::Leader);
        let snapshot = assignments(&n1).snapshot().await.unwrap();
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec![w("W1")]);
        assert_eq!(snapshot[&w("W1")][&t("T1")], Content::from("p1"));
        assert!(!raw.exists("/assignments/W9").await.unwrap());
    }

    #[tokio::test]
    async fn lost_worker_with_live_marker_is_ignored() {
        let cluster = InMemoryCluster::new(Duration::from_secs(15));
        let mut n1 = node(&cluster, "W1").await;
        let _n2 = node(&cluster, "W2").await;
        n1.engine.handle(LeadershipChange::Acquired.into()).await;
        n1.engine.handle(added("T1", "payload1")).await;
        n1.engine.handle(added("T2", "payload2")).await;

        // stale Left for a worker whose marker is back
        n1.engine.handle(WorkerEvent::Left(w("W2")).into()).await;

        let snapshot = assignments(&n1).snapshot().await.unwrap();
        assert_eq!(snapshot[&w("W1")].len(), 1);
        assert_eq!(snapshot[&w("W2")].len(), 1);
    }
}
