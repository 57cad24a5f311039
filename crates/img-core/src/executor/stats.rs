use serde::{Deserialize, Serialize};

/// Foto del ejecutor para monitoreo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub queued: usize,
    pub running: usize,
    pub accepting: bool,
    pub submitted: u64,
    pub rejected: u64,
    pub finished: u64,
    pub panicked: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

/// Resumen de un `shutdown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Tareas en cola que nunca arrancaron.
    pub cancelled: usize,
    /// Tareas aún corriendo al vencer el periodo de gracia.
    pub abandoned: usize,
    /// `true` si otro llamador ya había iniciado el shutdown.
    pub already_shut_down: bool,
}
