//! Errores del ciclo de vida de jobs.
//!
//! Dos familias conviven en `JobError`:
//! - Admisión (`NotFound`, `InvalidParameters`, `QueueRejected`,
//!   `AlreadyInFlight`): se devuelven de forma síncrona a quien encola.
//! - Ejecución (`ExecutionFault`, `StorageFault`): se capturan dentro de la
//!   tarea y terminan como `failed` en el registro; nunca escapan del worker.

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::JobStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
    #[error("not found: {0}")] NotFound(String),
    #[error("invalid parameters: {0}")] InvalidParameters(String),
    #[error("execution fault: {0}")] ExecutionFault(String),
    #[error("storage fault: {0}")] StorageFault(String),
    #[error("queue rejected: {0}")] QueueRejected(String),
    #[error("a job for this identity is already in flight (result_id={result_id})")]
    AlreadyInFlight { result_id: Uuid },
    #[error("illegal transition {from} -> {to}")] IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("record invariant violated: {0}")] InvariantViolation(String),
}

impl JobError {
    /// Código estable para logs y respuestas.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NotFound(_) => "not_found",
            JobError::InvalidParameters(_) => "invalid_parameters",
            JobError::ExecutionFault(_) => "execution_fault",
            JobError::StorageFault(_) => "storage_fault",
            JobError::QueueRejected(_) => "queue_rejected",
            JobError::AlreadyInFlight { .. } => "already_in_flight",
            JobError::IllegalTransition { .. } => "illegal_transition",
            JobError::InvariantViolation(_) => "invariant_violation",
        }
    }

    /// `true` para los errores que el llamador de `enqueue` debe ver.
    pub fn is_admission(&self) -> bool {
        matches!(self,
                 JobError::NotFound(_)
                 | JobError::InvalidParameters(_)
                 | JobError::QueueRejected(_)
                 | JobError::AlreadyInFlight { .. })
    }
}
