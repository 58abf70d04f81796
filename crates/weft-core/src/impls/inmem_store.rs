//! InMemoryCluster - 開発・テスト用の coordination substrate
//!
//! # 学習ポイント
//! - セッションと ephemeral ノードの寿命を結びつける
//! - heartbeat + reaper による liveness timeout（クラッシュ検知はタイムアウトだけ）
//! - children watch の「初回スナップショット → ライブイベント」
//! - 先着順のリーダー選出と、リーダー離脱時のハンドオーバー
//!
//! 1 つの `InMemoryCluster` を共有し、`connect()` ごとに独立したセッション
//! （`InMemoryStore`）を払い出します。`InMemoryStore` は `CoordinationStore` と
//! `LeaderElection` の両方を実装します。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{ChildEvent, Content, LeadershipChange, Result, WeftError};
use crate::ports::{
    CoordinationStore, CreateMode, CreateOutcome, DeleteOutcome, LeaderElection,
    LeadershipStream, Participant, SessionId, WatchStream,
};

struct NodeEntry {
    data: Content,
    /// Owning session for ephemeral nodes.
    owner: Option<SessionId>,
}

struct Candidate {
    participant: String,
    session: SessionId,
    tx: mpsc::UnboundedSender<LeadershipChange>,
}

/// Shared substrate state. Every operation takes the lock once and never awaits
/// while holding it.
struct ClusterState {
    nodes: BTreeMap<String, NodeEntry>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<ChildEvent>>>,
    /// session -> last heartbeat
    sessions: HashMap<SessionId, Instant>,
    elections: HashMap<String, Vec<Candidate>>,
    next_session: SessionId,
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl ClusterState {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            watchers: HashMap::new(),
            sessions: HashMap::new(),
            elections: HashMap::new(),
            next_session: 1,
        }
    }

    fn ensure_alive(&self, session: SessionId) -> Result<()> {
        if self.sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(WeftError::SubstrateUnavailable(format!(
                "session {session} is closed or expired"
            )))
        }
    }

    /// Direct children of `path` as (full path, name), sorted.
    fn children(&self, path: &str) -> Vec<(String, String)> {
        let prefix = format!("{path}/");
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.contains('/')).then(|| (key.clone(), rest.to_string()))
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn notify(&mut self, event: ChildEvent) {
        let parent = parent_of(event.path()).to_string();
        if let Some(txs) = self.watchers.get_mut(&parent) {
            // 受信側が drop された watch はここで掃除される
            txs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn insert(&mut self, path: &str, data: Content, owner: Option<SessionId>) {
        self.nodes.insert(
            path.to_string(),
            NodeEntry {
                data: data.clone(),
                owner,
            },
        );
        self.notify(ChildEvent::Added {
            path: path.to_string(),
            data,
        });
    }

    fn remove(&mut self, path: &str) -> Option<Content> {
        let entry = self.nodes.remove(path)?;
        self.notify(ChildEvent::Removed {
            path: path.to_string(),
            data: entry.data.clone(),
        });
        Some(entry.data)
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: &Content,
        mode: CreateMode,
    ) -> Result<CreateOutcome> {
        self.ensure_alive(session)?;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(WeftError::InvalidName {
                kind: "path",
                value: path.to_string(),
            });
        }
        if self.nodes.contains_key(path) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        // 足りない親は persistent で作る
        let mut missing = Vec::new();
        let mut parent = parent_of(path);
        while !parent.is_empty() && !self.nodes.contains_key(parent) {
            missing.push(parent.to_string());
            parent = parent_of(parent);
        }
        for ancestor in missing.into_iter().rev() {
            self.insert(&ancestor, Content::default(), None);
        }

        let owner = match mode {
            CreateMode::Ephemeral => Some(session),
            CreateMode::Persistent => None,
        };
        self.insert(path, data.clone(), owner);
        Ok(CreateOutcome::Created)
    }

    fn delete(&mut self, session: SessionId, path: &str) -> Result<DeleteOutcome> {
        self.ensure_alive(session)?;
        if !self.nodes.contains_key(path) {
            return Ok(DeleteOutcome::NotFound);
        }
        if self.has_children(path) {
            return Err(WeftError::NodeNotEmpty(path.to_string()));
        }
        self.remove(path);
        Ok(DeleteOutcome::Deleted)
    }

    /// Drop `session` from every election, handing leadership over
    /// where it held it.
    fn withdraw(&mut self, session: SessionId) {
        for (group, candidates) in self.elections.iter_mut() {
            let Some(pos) = candidates.iter().position(|c| c.session == session) else {
                continue;
            };
            let removed = candidates.remove(pos);
            if pos == 0 {
                let _ = removed.tx.send(LeadershipChange::Lost);
                if let Some(next) = candidates.first() {
                    info!(group = %group, leader = %next.participant, "leadership handed over");
                    let _ = next.tx.send(LeadershipChange::Acquired);
                }
            }
        }
    }

    /// End a session: ephemerals disappear, elections are left.
    fn end_session(&mut self, session: SessionId) -> bool {
        if self.sessions.remove(&session).is_none() {
            return false;
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, entry)| entry.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.remove(&path);
        }
        self.withdraw(session);
        true
    }
}

/// Shared in-memory substrate. Cheap to clone.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    session_timeout: Duration,
    reaper_started: Arc<AtomicBool>,
}

impl InMemoryCluster {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::new())),
            session_timeout,
            reaper_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Open a new session. Must be called inside a tokio runtime.
    pub async fn connect(&self) -> InMemoryStore {
        let session = {
            let mut state = self.state.lock().await;
            let id = state.next_session;
            state.next_session += 1;
            state.sessions.insert(id, Instant::now());
            id
        };
        self.start_reaper();

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&self.state),
            session,
            self.tick(),
        ));
        debug!(session, "session opened");

        InMemoryStore {
            cluster: self.clone(),
            session,
            heartbeat: std::sync::Mutex::new(Some(heartbeat)),
            group: Mutex::new(None),
        }
    }

    /// Expire a session right away, as if its timeout had elapsed.
    pub async fn expire_session(&self, session: SessionId) -> bool {
        let mut state = self.state.lock().await;
        let expired = state.end_session(session);
        if expired {
            info!(session, "session expired");
        }
        expired
    }

    pub async fn live_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    fn tick(&self) -> Duration {
        (self.session_timeout / 3).max(Duration::from_millis(1))
    }

    fn start_reaper(&self) {
        if self.reaper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(reaper_loop(
            Arc::downgrade(&self.state),
            self.session_timeout,
            self.tick(),
        ));
    }
}

async fn heartbeat_loop(state: Weak<Mutex<ClusterState>>, session: SessionId, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };
        let mut state = state.lock().await;
        match state.sessions.get_mut(&session) {
            Some(last_seen) => *last_seen = Instant::now(),
            None => break,
        }
    }
}

async fn reaper_loop(state: Weak<Mutex<ClusterState>>, timeout: Duration, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };
        let mut state = state.lock().await;
        let now = Instant::now();
        let stale: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for session in stale {
            info!(session, "session timed out");
            state.end_session(session);
        }
    }
}

/// One session on an [`InMemoryCluster`].
pub struct InMemoryStore {
    cluster: InMemoryCluster,
    session: SessionId,
    heartbeat: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Election group joined by this session, if any.
    group: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn cluster(&self) -> &InMemoryCluster {
        &self.cluster
    }

    /// Simulate process death: heartbeats stop, the session lingers until the
    /// reaper notices the timeout.
    pub fn crash(&self) {
        self.stop_heartbeat();
    }

    fn stop_heartbeat(&self) {
        if let Ok(mut heartbeat) = self.heartbeat.lock()
            && let Some(handle) = heartbeat.take()
        {
            handle.abort();
        }
    }

    async fn joined_group(&self) -> Option<String> {
        self.group.lock().await.clone()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn create(
        &self,
        path: &str,
        data: &Content,
        mode: CreateMode,
    ) -> Result<CreateOutcome> {
        let mut state = self.cluster.state.lock().await;
        state.create(self.session, path, data, mode)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;
        Ok(state.nodes.contains_key(path))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;
        Ok(state
            .children(path)
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    async fn read_data(&self, path: &str) -> Result<Content> {
        let state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;
        state
            .nodes
            .get(path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| WeftError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        let mut state = self.cluster.state.lock().await;
        state.delete(self.session, path)
    }

    async fn watch_children(&self, path: &str) -> Result<WatchStream> {
        let mut state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;

        let (tx, rx) = mpsc::unbounded_channel();
        // 初回スナップショット: 既存の子を全部 Added で流す
        for (child, _) in state.children(path) {
            if let Some(entry) = state.nodes.get(&child) {
                let _ = tx.send(ChildEvent::Added {
                    path: child.clone(),
                    data: entry.data.clone(),
                });
            }
        }
        state.watchers.entry(path.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.stop_heartbeat();
        let mut state = self.cluster.state.lock().await;
        if state.end_session(self.session) {
            debug!(session = self.session, "session closed");
        }
        Ok(())
    }
}

#[async_trait]
impl LeaderElection for InMemoryStore {
    async fn join(&self, group: &str, participant_id: &str) -> Result<LeadershipStream> {
        let mut joined = self.group.lock().await;
        if let Some(existing) = joined.as_ref() {
            return Err(WeftError::Config(format!(
                "session {} already joined election {existing}",
                self.session
            )));
        }

        let mut state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let candidates = state.elections.entry(group.to_string()).or_default();
        if candidates.is_empty() {
            let _ = tx.send(LeadershipChange::Acquired);
        }
        candidates.push(Candidate {
            participant: participant_id.to_string(),
            session: self.session,
            tx,
        });
        *joined = Some(group.to_string());
        Ok(rx)
    }

    async fn has_leadership(&self) -> bool {
        let Some(group) = self.joined_group().await else {
            return false;
        };
        let state = self.cluster.state.lock().await;
        state.sessions.contains_key(&self.session)
            && state
                .elections
                .get(&group)
                .and_then(|candidates| candidates.first())
                .is_some_and(|leader| leader.session == self.session)
    }

    async fn current_leader(&self) -> Result<Option<Participant>> {
        Ok(self
            .participants()
            .await?
            .into_iter()
            .find(|participant| participant.is_leader))
    }

    async fn participants(&self) -> Result<Vec<Participant>> {
        let Some(group) = self.joined_group().await else {
            return Ok(Vec::new());
        };
        let state = self.cluster.state.lock().await;
        state.ensure_alive(self.session)?;
        Ok(state
            .elections
            .get(&group)
            .map(|candidates| {
                candidates
                    .iter()
                    .enumerate()
                    .map(|(i, c)| Participant {
                        id: c.participant.clone(),
                        is_leader: i == 0,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn release(&self) -> Result<()> {
        let mut joined = self.group.lock().await;
        if joined.take().is_none() {
            return Ok(());
        }
        let mut state = self.cluster.state.lock().await;
        state.withdraw(self.session);
        Ok(())
    }
}
