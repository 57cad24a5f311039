//! Errores de persistencia.
//! Mapea errores de Diesel / pool a variantes semánticas y éstas a `JobError`.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use img_core::JobError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    /// Rechazo del dominio dentro de una transacción (p.ej. transición ilegal).
    #[error(transparent)]
    Domain(JobError),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::CorruptRow(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<JobError> for PersistenceError {
    fn from(err: JobError) -> Self {
        Self::Domain(err)
    }
}

impl From<PersistenceError> for JobError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Domain(e) => e,
            PersistenceError::NotFound => JobError::NotFound("result record".into()),
            PersistenceError::CorruptRow(msg) => JobError::InvariantViolation(msg),
            other => JobError::StorageFault(other.to_string()),
        }
    }
}
