//! Instance - 1 インスタンスの起動・実行・停止
//!
//! # 起動順序（順番に意味がある）
//! 1. liveness marker の登録（失敗したら起動しない）
//! 2. 自分の割り当ての監視（LocalExecutionWatcher）
//! 3. エンジン起動 → リーダー選出に参加
//! 4. タスク一覧の監視
//! 5. worker 一覧の監視
//!
//! 1 と 2 を選出より先にやるのは、リーダーがこの worker を見つけた時点で
//! 既に割り当て先として有効であるため。
//!
//! # 停止順序
//! 獲得の逆順: worker 監視 → タスク監視 → リーダー離脱 → エンジン →
//! ローカル監視 → セッションを閉じる

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::assignments::AssignmentStore;
use super::context::{InstanceContext, ShutdownSignal};
use super::engine::{EngineHandle, EngineState, LeaderEngine};
use super::leadership::LeadershipMonitor;
use super::local_watcher::LocalExecutionWatcher;
use super::membership::WorkerMembership;
use super::status::StatusView;
use super::task_registry::TaskRegistry;
use super::watch_loop::WatchLoop;
use crate::domain::{Result, WorkerId};
use crate::ports::{CoordinationStore, LeaderElection, TaskExecutor};

/// Everything one instance needs before it starts.
pub struct Instance {
    ctx: InstanceContext,
    store: Arc<dyn CoordinationStore>,
    election: Arc<dyn LeaderElection>,
    executor: Arc<dyn TaskExecutor>,
}

impl Instance {
    pub fn new(
        ctx: InstanceContext,
        store: Arc<dyn CoordinationStore>,
        election: Arc<dyn LeaderElection>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            ctx,
            store,
            election,
            executor,
        }
    }

    /// Register, then install every watch in order.
    ///
    /// A registration failure is returned as-is and nothing else is started.
    /// If a later step fails, whatever was already started is torn down.
    pub async fn start(self) -> Result<RunningInstance> {
        let Instance {
            ctx,
            store,
            election,
            executor,
        } = self;
        let layout = ctx.layout.clone();
        let me = ctx.worker_id.clone();

        let membership = WorkerMembership::new(store.clone(), layout.clone());
        if let Err(e) = membership.register_self(&me).await {
            error!(worker = %me, "self-registration failed: {e}");
            return Err(e);
        }

        let leadership = Arc::new(LeadershipMonitor::new(election, &layout, me.clone()));
        let status = StatusView::new(
            me.clone(),
            membership,
            AssignmentStore::new(store.clone(), layout.clone()),
            leadership.clone(),
        );
        let mut running = RunningInstance {
            ctx,
            store,
            leadership,
            status,
            local: None,
            engine: None,
            election: None,
            tasks: None,
            workers: None,
        };

        if let Err(e) = running.install(executor).await {
            error!(worker = %me, "startup failed: {e}");
            running.teardown().await;
            return Err(e);
        }
        info!(worker = %me, "instance started");
        Ok(running)
    }
}

/// A started instance. Stop it with [`RunningInstance::shutdown`] or
/// [`RunningInstance::run_until_shutdown`].
pub struct RunningInstance {
    ctx: InstanceContext,
    store: Arc<dyn CoordinationStore>,
    leadership: Arc<LeadershipMonitor>,
    status: StatusView,
    local: Option<WatchLoop>,
    engine: Option<EngineHandle>,
    election: Option<WatchLoop>,
    tasks: Option<WatchLoop>,
    workers: Option<WatchLoop>,
}

impl RunningInstance {
    async fn install(&mut self, executor: Arc<dyn TaskExecutor>) -> Result<()> {
        let layout = self.ctx.layout.clone();
        let me = self.ctx.worker_id.clone();

        let local = LocalExecutionWatcher::new(
            me,
            AssignmentStore::new(self.store.clone(), layout.clone()),
            executor,
        );
        self.local = Some(local.install().await?);

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = LeaderEngine::new(&self.ctx, self.store.clone(), self.leadership.clone());
        self.engine = Some(engine.spawn(rx));
        self.election = Some(self.leadership.join(tx.clone()).await?);

        let registry = TaskRegistry::new(self.store.clone(), layout.clone());
        self.tasks = Some(registry.watch(tx.clone()).await?);

        let membership = WorkerMembership::new(self.store.clone(), layout);
        self.workers = Some(membership.watch(tx).await?);
        Ok(())
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.ctx.worker_id
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.ctx.shutdown.clone()
    }

    pub fn status(&self) -> &StatusView {
        &self.status
    }

    pub async fn engine_state(&self) -> EngineState {
        match &self.engine {
            Some(engine) => engine.state().await,
            None => EngineState::Follower,
        }
    }

    /// Block until the shutdown signal fires, then tear down.
    pub async fn run_until_shutdown(mut self) {
        self.ctx.shutdown.wait().await;
        info!(worker = %self.ctx.worker_id, "shutdown requested");
        self.teardown().await;
    }

    /// Trigger the shutdown signal and tear down immediately.
    pub async fn shutdown(mut self) {
        self.ctx.shutdown.trigger();
        self.teardown().await;
    }

    /// Stop local loops without releasing leadership or closing the session,
    /// as if the process had died. The session lingers until it times out.
    pub async fn halt(mut self) {
        for watch in [self.workers.take(), self.tasks.take(), self.election.take()]
            .into_iter()
            .flatten()
        {
            watch.shutdown_and_join().await;
        }
        if let Some(engine) = self.engine.take() {
            engine.shutdown_and_join().await;
        }
        if let Some(local) = self.local.take() {
            local.shutdown_and_join().await;
        }
        warn!(worker = %self.ctx.worker_id, "instance halted without teardown");
    }

    async fn teardown(&mut self) {
        let me = self.ctx.worker_id.clone();
        for watch in [self.workers.take(), self.tasks.take()].into_iter().flatten() {
            watch.shutdown_and_join().await;
        }
        if let Err(e) = self.leadership.release().await {
            warn!(worker = %me, "leaving election failed: {e}");
        }
        if let Some(election) = self.election.take() {
            election.shutdown_and_join().await;
        }
        if let Some(engine) = self.engine.take() {
            engine.shutdown_and_join().await;
        }
        if let Some(local) = self.local.take() {
            local.shutdown_and_join().await;
        }
        if let Err(e) = self.store.close().await {
            warn!(worker = %me, "closing session failed: {e}");
        }
        info!(worker = %me, "instance stopped");
    }
}
