//! Ejecutor acotado de jobs.
//!
//! Pool fijo de hilos del sistema con una cola FIFO limitada. Cada tarea
//! lleva su trabajo y una continuación de fallo (`on_fault`); el ejecutor
//! garantiza que, si el trabajo no liquida la tarea por sí mismo (pánico,
//! timeout, cancelación en shutdown o retorno sin liquidar), la
//! continuación se invoca exactamente una vez.

mod config;
mod pool;
mod stats;
mod task;
mod watchdog;

pub use config::{available_parallelism, ExecutorConfig, SubmitPolicy, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_GRACE};
pub use pool::JobExecutor;
pub use stats::{ExecutorStats, ShutdownReport};
pub use task::{Task, TaskCanceller, TaskContext, TaskFault, TaskId};

use std::time::Duration;

use thiserror::Error;

use crate::errors::JobError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("queue is full ({capacity} pending tasks)")] QueueFull { capacity: usize },
    #[error("executor is shutting down")] ShutDown,
    #[error("no free slot after waiting {0:?}")] Timeout(Duration),
}

impl From<ExecutorError> for JobError {
    fn from(e: ExecutorError) -> Self {
        JobError::QueueRejected(e.to_string())
    }
}
