//! InstanceContext - 起動時に一度だけ作り、全コンポーネントに渡すコンテキスト
//!
//! インスタンス ID・パス構成・設定・シャットダウン信号をまとめたもの。
//! グローバル変数（シングルトン）は使いません。

use std::sync::Arc;

use tokio::sync::watch;

use super::config::Config;
use crate::domain::{Layout, Result, WorkerId};

/// Shutdown latch shared by every loop of one instance.
///
/// `trigger` を呼ぶと購読中の全ループが止まる。何度呼んでもよい。
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        // send_replace: receivers may all be dropped already
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once `trigger` has been called (immediately if it already was).
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        // wait_for は現在値もチェックする
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct InstanceContext {
    pub worker_id: WorkerId,
    pub layout: Layout,
    pub config: Arc<Config>,
    pub shutdown: ShutdownSignal,
}

impl InstanceContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            worker_id: config.worker_id()?,
            layout: config.layout()?,
            config: Arc::new(config),
            shutdown: ShutdownSignal::new(),
        })
    }
}
