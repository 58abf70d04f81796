//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。
//! coordination substrate（ストレージ + 選出）と、タスクを実際に動かす executor は
//! weft の外側にあるので、ここで trait として境界を引きます。

pub mod clock;
pub mod election;
pub mod executor;
pub mod store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::election::{LeaderElection, LeadershipStream, Participant};
pub use self::executor::TaskExecutor;
pub use self::store::{
    CoordinationStore, CreateMode, CreateOutcome, DeleteOutcome, SessionId, WatchStream,
};
