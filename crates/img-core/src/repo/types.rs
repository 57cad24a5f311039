//! Contratos del repositorio de resultados.
//!
//! Un `RecordStore` entrega sesiones; cada sesión es el scope de
//! transacción de quien la abre (una conexión en Postgres). El hilo que
//! encola y cada tarea abren la suya y nunca se comparten entre hilos.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::errors::JobError;
use crate::lifecycle::{JobStatus, Transition};
use crate::model::{AnalysisRequest, JobIdentity, ResultRecord};

pub trait RecordStore: Send + Sync {
    fn session(&self) -> Result<Box<dyn RecordSession + '_>, JobError>;
}

pub trait RecordSession {
    /// Crea el registro `queued` de una identidad.
    ///
    /// Si ya existe uno no terminal devuelve `AlreadyInFlight`; si existe uno
    /// terminal lo reemplaza (nuevo `id`) en la misma operación atómica.
    fn create(&mut self, identity: JobIdentity, parameters: AnalysisRequest) -> Result<ResultRecord, JobError>;

    fn get(&mut self, id: Uuid) -> Result<ResultRecord, JobError>;

    fn find_by_identity(&mut self, identity: &JobIdentity) -> Result<Option<ResultRecord>, JobError>;

    /// Compare-and-set: lee el estado actual, valida la transición y escribe
    /// el resultado sin que otra sesión pueda intercalarse.
    fn apply(&mut self, id: Uuid, transition: Transition) -> Result<ResultRecord, JobError>;

    /// Página ordenada por `created_at` descendente.
    fn list(&mut self, filter: &RecordFilter) -> Result<RecordPage, JobError>;

    fn stats(&mut self) -> Result<RecordStats, JobError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub status: Option<JobStatus>,
    pub dataset_id: Option<i64>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
}

impl RecordFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self { status: Some(status),
               ..Self::default() }
    }

    /// `limit == 0` significa el valor por defecto.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        }
    }

    pub fn matches(&self, record: &ResultRecord) -> bool {
        self.status.map_or(true, |s| record.status() == s)
        && self.dataset_id.map_or(true, |d| record.identity.dataset_id == d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<ResultRecord>,
    /// Total de registros que cumplen el filtro (sin paginar).
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RecordStats {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}
