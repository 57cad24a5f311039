use img_core::JobError;
use img_persistence::PersistenceError;
use thiserror::Error;

/// Errores de arranque y del front del servicio.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Error en IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("Error de persistencia: {0}")]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Job(#[from] JobError),
}
