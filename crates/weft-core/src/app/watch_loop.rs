//! WatchLoop - 1 つのイベントストリームを 1 つのタスクで消費するループ
//!
//! watch ごとに専用タスクを 1 本立て、イベントを順番に handler に渡します。
//! 同じストリーム内の順序はこれで保証され、handler が再入することもありません。

use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle of one spawned loop.
/// - `request_shutdown` で止める（処理中の handler は最後まで走る）
/// - `shutdown_and_join` で終了を待てる
pub struct WatchLoop {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WatchLoop {
    pub fn spawn<E, H, Fut>(
        name: impl Into<String>,
        mut events: mpsc::UnboundedReceiver<E>,
        mut handler: H,
    ) -> Self
    where
        E: Send + 'static,
        H: FnMut(E) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let loop_name = name.clone();

        let join = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                // recv は待つ可能性があるので select で shutdown と競合させる
                let event = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    event = events.recv() => event,
                };

                let Some(event) = event else {
                    debug!(watch = %loop_name, "event stream closed");
                    break;
                };
                handler(event).await;
            }
            debug!(watch = %loop_name, "watch loop stopped");
        });

        Self {
            name,
            shutdown_tx,
            join,
        }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(watch = %self.name, "watch loop task failed: {e}");
        }
    }
}
