//! LeadershipMonitor - substrate の選出をラップする
//!
//! `has_leadership` は毎回 substrate に聞きに行きます。
//! Acquired/Lost の通知は engine のキューへ流すだけで、ここでは状態を持ちません。

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::watch_loop::WatchLoop;
use crate::domain::{EngineEvent, LeadershipChange, Layout, Result, WorkerId};
use crate::ports::{LeaderElection, Participant};

pub struct LeadershipMonitor {
    election: Arc<dyn LeaderElection>,
    group: String,
    participant: WorkerId,
}

impl LeadershipMonitor {
    pub fn new(election: Arc<dyn LeaderElection>, layout: &Layout, participant: WorkerId) -> Self {
        Self {
            election,
            group: layout.leader(),
            participant,
        }
    }

    /// Join the election and forward transitions into `sink`.
    pub async fn join(&self, sink: mpsc::UnboundedSender<EngineEvent>) -> Result<WatchLoop> {
        let stream = self
            .election
            .join(&self.group, self.participant.as_str())
            .await?;
        info!(group = %self.group, participant = %self.participant, "joined leader election");

        let participant = self.participant.clone();
        Ok(WatchLoop::spawn(
            "leadership",
            stream,
            move |change: LeadershipChange| {
                let sink = sink.clone();
                let participant = participant.clone();
                async move {
                    debug!(%participant, ?change, "leadership change");
                    let _ = sink.send(change.into());
                }
            },
        ))
    }

    /// Fresh leadership check against the substrate.
    pub async fn has_leadership(&self) -> bool {
        self.election.has_leadership().await
    }

    pub async fn current_leader(&self) -> Result<Option<Participant>> {
        self.election.current_leader().await
    }

    pub async fn participants(&self) -> Result<Vec<Participant>> {
        self.election.participants().await
    }

    pub async fn release(&self) -> Result<()> {
        self.election.release().await?;
        info!(participant = %self.participant, "left leader election");
        Ok(())
    }
}
