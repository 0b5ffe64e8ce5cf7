//! Task supervisor: long-running coding-task containers — lifecycle,
//! heartbeat, log tailing, and interactive terminal multiplexing.

pub mod container;
pub mod logs;
pub mod model;
pub mod runner;
pub mod store;
pub mod terminal;
pub mod tools;

pub use model::{TaskMode, TaskRecord, TaskStatus};
pub use store::TaskStore;
