//! weft-core
//!
//! Leader-driven task assignment over a coordination substrate.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, paths, task, events, errors）
//! - **ports**: 抽象化レイヤー（CoordinationStore, LeaderElection, TaskExecutor, Clock）
//! - **app**: アプリケーションロジック（membership, task_registry, engine, instance, など）
//! - **impls**: 実装（InMemoryCluster / InMemoryExecutor など開発・テスト用）
//!
//! # 使い方
//! ```ignore
//! let cluster = InMemoryCluster::new(config.session_timeout());
//! let store = Arc::new(cluster.connect().await);
//! let ctx = InstanceContext::new(config)?;
//! let running = Instance::new(ctx, store.clone(), store, Arc::new(InMemoryExecutor::new()))
//!     .start()
//!     .await?;
//! running.run_until_shutdown().await;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{Config, Instance, InstanceContext, RunningInstance, StatusReport};
pub use crate::domain::{Result, WeftError};
