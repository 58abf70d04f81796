//! LeaderElection port - 単一リーダー選出
//!
//! substrate が「同時に 1 人だけ」を保証します。weft 側はその結果を信じるだけで、
//! ローカルなロックで排他を作ったりはしません。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{LeadershipChange, Result};

/// One candidate in an election group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub is_leader: bool,
}

pub type LeadershipStream = mpsc::UnboundedReceiver<LeadershipChange>;

/// LeaderElection は substrate の選出レシピ
///
/// # Semantics
/// - `join` した参加者は先着順に並び、先頭がリーダー
/// - リーダーのセッションが切れるか `release` すると次の参加者が `Acquired` を受け取る
/// - `has_leadership` は毎回 substrate に問い合わせる（キャッシュしない）
#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Join `group` as `participant_id`. One participation per session.
    async fn join(&self, group: &str, participant_id: &str) -> Result<LeadershipStream>;

    /// Fresh check: does this session hold leadership right now?
    async fn has_leadership(&self) -> bool;

    async fn current_leader(&self) -> Result<Option<Participant>>;

    async fn participants(&self) -> Result<Vec<Participant>>;

    /// Leave the group (relinquishing leadership if held).
    async fn release(&self) -> Result<()>;
}
