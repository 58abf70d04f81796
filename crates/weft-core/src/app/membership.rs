//! WorkerMembership - liveness marker の登録と、生存 worker 集合の参照
//!
//! liveness の判定は substrate のセッションに完全に任せます。
//! ここが書くのは自分の marker（ephemeral）1 つだけで、期限切れの処理も持ちません。

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::watch_loop::WatchLoop;
use crate::domain::paths::leaf_name;
use crate::domain::{
    ChildEvent, Content, EngineEvent, Layout, Result, WeftError, WorkerEvent, WorkerId,
};
use crate::ports::{Clock, CoordinationStore, CreateMode, CreateOutcome, SystemClock};

/// Result of [`WorkerMembership::register_self`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// A marker for this id was already present; nothing was written.
    AlreadyRegistered,
}

pub struct WorkerMembership {
    store: Arc<dyn CoordinationStore>,
    layout: Layout,
    clock: Arc<dyn Clock>,
}

impl WorkerMembership {
    pub fn new(store: Arc<dyn CoordinationStore>, layout: Layout) -> Self {
        Self::with_clock(store, layout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CoordinationStore>,
        layout: Layout,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            layout,
            clock,
        }
    }

    /// Create the liveness marker for `id` unless it already exists.
    ///
    /// Marker data is the registration timestamp (RFC 3339).
    pub async fn register_self(&self, id: &WorkerId) -> Result<Registration> {
        let path = self.layout.worker(id);
        if self.store.exists(&path).await? {
            warn!(%path, "{}", WeftError::DuplicateRegistration(id.to_string()));
            return Ok(Registration::AlreadyRegistered);
        }

        let registered_at = Content::from(self.clock.now().to_rfc3339().as_str());
        match self
            .store
            .create(&path, &registered_at, CreateMode::Ephemeral)
            .await?
        {
            CreateOutcome::Created => {
                info!(%path, "registered liveness marker");
                Ok(Registration::Created)
            }
            // exists() と create() の間に誰かが作った
            CreateOutcome::AlreadyExists => {
                warn!(%path, "{}", WeftError::DuplicateRegistration(id.to_string()));
                Ok(Registration::AlreadyRegistered)
            }
        }
    }

    pub async fn list_live_workers(&self) -> Result<BTreeSet<WorkerId>> {
        let names = self.store.list_children(&self.layout.workers()).await?;
        let mut live = BTreeSet::new();
        for name in names {
            match WorkerId::parse(name) {
                Ok(id) => {
                    live.insert(id);
                }
                Err(e) => warn!("skipping worker marker: {e}"),
            }
        }
        Ok(live)
    }

    pub async fn is_live(&self, id: &WorkerId) -> Result<bool> {
        self.store.exists(&self.layout.worker(id)).await
    }

    /// Watch `/workers` and forward join/leave events into `sink`.
    pub async fn watch(&self, sink: mpsc::UnboundedSender<EngineEvent>) -> Result<WatchLoop> {
        let stream = self.store.watch_children(&self.layout.workers()).await?;
        let handle = WatchLoop::spawn("workers", stream, move |event: ChildEvent| {
            let sink = sink.clone();
            async move {
                match worker_event(event) {
                    Ok(event) => {
                        let _ = sink.send(event.into());
                    }
                    Err(e) => warn!("ignoring worker event: {e}"),
                }
            }
        });
        debug!("watching worker membership");
        Ok(handle)
    }
}

/// Map a raw `/workers` children event to a typed membership event.
pub fn worker_event(event: ChildEvent) -> Result<WorkerEvent> {
    Ok(match event {
        ChildEvent::Added { path, .. } => WorkerEvent::Joined(leaf_name(&path)?),
        ChildEvent::Removed { path, .. } => WorkerEvent::Left(leaf_name(&path)?),
        ChildEvent::Updated { path, .. } => WorkerEvent::Updated(leaf_name(&path)?),
    })
}
