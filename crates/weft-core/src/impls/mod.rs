//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryCluster / InMemoryStore**: セッション・ephemeral・watch・選出を持つ substrate
//! - **InMemoryExecutor**: 実行中タスクを記録するだけの executor
//!
//! 本番用の substrate（ZooKeeper / etcd クライアント）は別クレートに置く想定です。

pub mod inmem_executor;
pub mod inmem_store;

// 主要な型を再エクスポート
pub use self::inmem_executor::InMemoryExecutor;
pub use self::inmem_store::{InMemoryCluster, InMemoryStore};
