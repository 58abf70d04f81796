//! Domain model (ids, paths, tasks, events, errors).
//!
//! substrate にも tokio にも依存しない純粋な型だけをここに置きます。

pub mod errors;
pub mod events;
pub mod ids;
pub mod paths;
pub mod task;

pub use self::errors::{ErrorKind, Result, WeftError};
pub use self::events::{
    AssignmentEvent, ChildEvent, EngineEvent, LeadershipChange, TaskEvent, WorkerEvent,
};
pub use self::ids::{TaskUuid, WorkerId};
pub use self::paths::Layout;
pub use self::task::{Assignment, Content};
