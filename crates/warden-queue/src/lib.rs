//! warden-queue: durable command execution records.
//!
//! [`CommandExecutionQueue`] stores every requested command with its risk,
//! lifecycle state and output, indexed by session, chat and pending status,
//! on top of a [`KvStore`] with TTL-based retention.

mod error;
pub mod execution;
pub mod kv;
pub mod queue;

pub use error::QueueError;
pub use execution::{CommandExecution, ExecutionState};
pub use kv::{FileKvStore, KvEntry, KvStore, MemoryKvStore};
pub use queue::CommandExecutionQueue;
