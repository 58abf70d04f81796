//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて割り当てエンジンとインスタンスの寿命を実装します。
//!
//! # 主要コンポーネント
//! - **WorkerMembership**: liveness marker の登録と生存 worker 一覧
//! - **TaskRegistry**: グローバルなタスク一覧の監視
//! - **AssignmentStore**: worker ごとの割り当ての読み書き
//! - **LeadershipMonitor**: リーダー選出のラッパー
//! - **LeaderEngine**: リーダーだけが動かす割り当て・再配分エンジン（fenced write）
//! - **LocalExecutionWatcher**: 自分の割り当てに応じてローカル実行を start/stop
//! - **Instance**: 起動順序・実行・逆順の停止
//! - **StatusView**: 読み取り専用のレポート

pub mod assignments;
pub mod balancer;
pub mod config;
pub mod context;
pub mod engine;
pub mod instance;
pub mod leadership;
pub mod local_watcher;
pub mod membership;
pub mod status;
pub mod task_registry;
pub mod watch_loop;

// 主要な型を再エクスポート
pub use self::assignments::{AssignmentMap, AssignmentStore};
pub use self::balancer::Action;
pub use self::config::Config;
pub use self::context::{InstanceContext, ShutdownSignal};
pub use self::engine::{EngineHandle, EngineState, LeaderEngine};
pub use self::instance::{Instance, RunningInstance};
pub use self::leadership::LeadershipMonitor;
pub use self::local_watcher::LocalExecutionWatcher;
pub use self::membership::{Registration, WorkerMembership};
pub use self::status::{StatusReport, StatusView};
pub use self::task_registry::TaskRegistry;
pub use self::watch_loop::WatchLoop;
