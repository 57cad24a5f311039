//! Construcción única de los servicios de larga vida.

use std::sync::Arc;

use img_adapters::{FsArtifactStore, FsImageSource, JpegArtifactEncoder, LabKMeans};
use img_core::{AnalysisOrchestrator, InMemoryRecordStore, RecordStore, ResultQueries, ShutdownReport};
use img_persistence::{build_pool, DbConfig, PgRecordStore};
use log::{info, warn};

use crate::config::AppConfig;
use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBackend {
    Memory,
    Postgres,
}

impl RecordBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordBackend::Memory => "memory",
            RecordBackend::Postgres => "postgres",
        }
    }
}

pub struct Services {
    config: AppConfig,
    backend: RecordBackend,
    orchestrator: Arc<AnalysisOrchestrator>,
}

impl Services {
    /// Postgres si hay `DATABASE_URL`; si no, registros en memoria.
    pub fn build(config: AppConfig) -> Result<Self, CoreError> {
        match config.database_url.clone() {
            Some(url) => {
                let db = DbConfig::with_url(url);
                let pool = build_pool(&db.url, db.min_connections, db.max_connections)?;
                Self::with_records(config, Arc::new(PgRecordStore::from_pool(pool)), RecordBackend::Postgres)
            }
            None => {
                warn!("DATABASE_URL not set, results are kept in memory only");
                Self::with_records(config, Arc::new(InMemoryRecordStore::new()), RecordBackend::Memory)
            }
        }
    }

    pub fn with_records(config: AppConfig,
                        records: Arc<dyn RecordStore>,
                        backend: RecordBackend)
                        -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.artifact_root)?;
        let orchestrator = AnalysisOrchestrator::builder().records(records)
                                                          .artifacts(Arc::new(FsArtifactStore::new(config.artifact_root.clone())))
                                                          .images(Arc::new(FsImageSource::new(config.image_root.clone())))
                                                          .routine(Arc::new(LabKMeans::new()))
                                                          .encoder(Arc::new(JpegArtifactEncoder::default()))
                                                          .executor_config(config.executor_config())
                                                          .build()?;
        let stats = orchestrator.executor_stats();
        info!("services ready backend={} workers={} queue_capacity={}",
              backend.as_str(),
              stats.pool_size,
              stats.queue_capacity);
        Ok(Self { config,
                  backend,
                  orchestrator: Arc::new(orchestrator) })
    }

    /// Falla los registros en vuelo que dejó un proceso anterior. Sólo debe
    /// llamarlo el proceso dueño de la cola, nunca un cliente como `img-cli`.
    pub fn recover_abandoned(&self) -> Result<usize, CoreError> {
        Ok(self.orchestrator.recover_abandoned()?)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend(&self) -> RecordBackend {
        self.backend
    }

    pub fn orchestrator(&self) -> Arc<AnalysisOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn queries(&self) -> ResultQueries {
        self.orchestrator.queries()
    }

    /// Drena el ejecutor. Llamadas posteriores no hacen nada.
    pub fn shutdown(&self) -> ShutdownReport {
        let report = self.orchestrator.shutdown();
        if !report.already_shut_down {
            info!("services stopped cancelled={} abandoned={}", report.cancelled, report.abandoned);
        }
        report
    }
}
