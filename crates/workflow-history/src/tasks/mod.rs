//! Task generation: the side-work a history fold hands off to background processors.

mod generator;
mod types;

pub use generator::TaskGenerator;
pub use types::{ReplicationTask, TaskBatch, TimerTask, TransferTask};
