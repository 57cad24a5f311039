//! `AnalysisOrchestrator`: valida, registra y encola análisis.
//!
//! `enqueue` sólo hace trabajo barato en el hilo llamador (validación,
//! `probe` de la imagen y alta del registro) y devuelve en cuanto el
//! ejecutor acepta la tarea. El cómputo corre siempre en un worker.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::api::EnqueueResponse;
use crate::artifact::{ArtifactStore, ImageEncoder};
use crate::constants::MAX_PAGE_LIMIT;
use crate::engine::claim::{self, InFlight, InFlightClaim};
use crate::engine::job::JobRun;
use crate::engine::queries::ResultQueries;
use crate::errors::JobError;
use crate::executor::{ExecutorConfig, ExecutorStats, JobExecutor, ShutdownReport};
use crate::image_source::ImageSource;
use crate::lifecycle::{JobStatus, Transition};
use crate::model::{AnalysisRequest, JobIdentity, ResultRecord};
use crate::repo::{RecordFilter, RecordSession, RecordStore};
use crate::routine::ClusterRoutine;

const CANCEL_REASON: &str = "cancelled by user";

/// Colaboradores compartidos por el orquestador y sus tareas.
pub(crate) struct Deps {
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) images: Arc<dyn ImageSource>,
    pub(crate) routine: Arc<dyn ClusterRoutine>,
    pub(crate) encoder: Arc<dyn ImageEncoder>,
}

pub struct AnalysisOrchestrator {
    deps: Arc<Deps>,
    executor: Arc<JobExecutor>,
    in_flight: InFlight,
}

impl AnalysisOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Admite un análisis para `(dataset_id, image_id)`.
    ///
    /// Errores síncronos: `InvalidParameters`, `NotFound`, `AlreadyInFlight`,
    /// `QueueRejected` y `StorageFault` si no se pudo crear el registro. Si
    /// el ejecutor rechaza la tarea el registro queda en `failed`.
    pub fn enqueue(&self,
                   dataset_id: i64,
                   image_id: i64,
                   request: AnalysisRequest)
                   -> Result<EnqueueResponse, JobError> {
        request.validate()?;
        let identity = JobIdentity::new(dataset_id, image_id, request.kind(), request.operation_key())?;
        let info = self.deps.images.probe(dataset_id, image_id)?;
        let claim = InFlightClaim::acquire(&self.in_flight, identity.clone())?;

        let record = {
            let mut session = self.deps.records.session()?;
            session.create(identity.clone(), request.clone())?
        };
        claim.bind(record.id);
        let response = EnqueueResponse::accepted(&record);

        let run = JobRun { record_id: record.id,
                           identity,
                           request,
                           deps: self.deps.clone(),
                           claim };
        match self.executor.submit(run.into_task()) {
            Ok(task_id) => {
                info!("job enqueued result_id={} {} task_id={} width={} height={}",
                      record.id, record.identity, task_id, info.width, info.height);
                Ok(response)
            }
            Err(e) => {
                warn!("job rejected result_id={} {} err={}", record.id, record.identity, e);
                claim::forget(&self.in_flight, &record.identity, record.id);
                let reason = format!("rejected by executor: {e}");
                let marked = self.deps.records.session().and_then(|mut s| {
                                                            self.discard_artifact(&record.identity);
                                                            s.apply(record.id, Transition::fail(reason))
                                                        });
                if let Err(me) = marked {
                    warn!("could not mark rejected job as failed result_id={} err={}", record.id, me);
                }
                Err(e.into())
            }
        }
    }

    /// Cancela el análisis `result_id` y lo deja en `failed` con el motivo
    /// `cancelled by user`.
    ///
    /// Si la tarea es de este proceso se liquida como `Cancelled`: en cola ya
    /// no corre y en curso su resultado tardío se descarta. Un registro
    /// activo sin tarea local (de otro proceso) se falla directamente. Si la
    /// tarea ya estaba guardando su resultado la cancelación llega tarde y el
    /// registro devuelto sigue su curso hacia `completed`.
    ///
    /// Errores: `NotFound` y `IllegalTransition` si el registro ya es
    /// terminal.
    pub fn cancel(&self, result_id: Uuid) -> Result<ResultRecord, JobError> {
        let record = self.deps.records.session()?.get(result_id)?;
        if record.is_terminal() {
            return Err(JobError::IllegalTransition { from: record.status(),
                                                     to: JobStatus::Failed });
        }
        match claim::canceller_for(&self.in_flight, &record.identity, result_id) {
            Some(canceller) => {
                if canceller.cancel(CANCEL_REASON) {
                    info!("job cancelled result_id={} {}", result_id, record.identity);
                } else {
                    info!("cancel arrived late result_id={} {}", result_id, record.identity);
                }
            }
            None => {
                let mut session = self.deps.records.session()?;
                if self.fail_orphan(&mut *session, &record, CANCEL_REASON)? {
                    info!("job cancelled result_id={} {} owner=none", result_id, record.identity);
                }
            }
        }
        self.deps.records.session()?.get(result_id)
    }

    pub fn queries(&self) -> ResultQueries {
        ResultQueries::new(self.deps.records.clone(), self.deps.artifacts.clone())
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Marca como `failed` los registros no terminales que no pertenecen a
    /// ninguna tarea de este proceso (quedaron huérfanos tras un reinicio).
    /// Pensado para llamarse al arrancar, antes del primer `enqueue`.
    pub fn recover_abandoned(&self) -> Result<usize, JobError> {
        let mut session = self.deps.records.session()?;
        let mut orphans = Vec::new();
        for status in [JobStatus::Queued, JobStatus::Processing] {
            let mut filter = RecordFilter { status: Some(status),
                                            limit: MAX_PAGE_LIMIT,
                                            ..RecordFilter::default() };
            loop {
                let page = session.list(&filter)?;
                let fetched = page.records.len();
                orphans.extend(page.records
                                   .into_iter()
                                   .filter(|r| !self.in_flight.contains_key(&r.identity)));
                filter.offset += fetched;
                if fetched == 0 || filter.offset as u64 >= page.total {
                    break;
                }
            }
        }
        let mut recovered = 0;
        for record in orphans {
            if self.fail_orphan(&mut *session, &record, "abandoned: service restarted before the job finished")? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            warn!("recovered abandoned jobs count={}", recovered);
        }
        Ok(recovered)
    }

    /// Falla un registro activo que ninguna tarea de este proceso posee y
    /// borra su artifact. `false` si otro actor lo llevó antes a terminal.
    fn fail_orphan(&self, session: &mut dyn RecordSession, record: &ResultRecord, reason: &str) -> Result<bool, JobError> {
        match session.apply(record.id, Transition::fail(reason)) {
            Ok(_) => {
                self.discard_artifact(&record.identity);
                Ok(true)
            }
            Err(JobError::IllegalTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn discard_artifact(&self, identity: &JobIdentity) {
        match self.deps.artifacts.remove(identity) {
            Ok(removed) => debug!("artifact discard {} removed={}", identity, removed),
            Err(e) => warn!("artifact cleanup failed {} err={}", identity, e),
        }
    }

    /// Detiene el ejecutor. Idempotente.
    pub fn shutdown(&self) -> ShutdownReport {
        self.executor.shutdown()
    }
}

/// Builder del orquestador. Todos los colaboradores son obligatorios salvo
/// el ejecutor, que se arranca con `ExecutorConfig::default()` si falta.
#[derive(Default)]
pub struct OrchestratorBuilder {
    records: Option<Arc<dyn RecordStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    images: Option<Arc<dyn ImageSource>>,
    routine: Option<Arc<dyn ClusterRoutine>>,
    encoder: Option<Arc<dyn ImageEncoder>>,
    executor: Option<Arc<JobExecutor>>,
    executor_config: Option<ExecutorConfig>,
}

impl OrchestratorBuilder {
    pub fn records(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.records = Some(store);
        self
    }

    pub fn artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn images(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.images = Some(source);
        self
    }

    pub fn routine(mut self, routine: Arc<dyn ClusterRoutine>) -> Self {
        self.routine = Some(routine);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn ImageEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn executor(mut self, executor: Arc<JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = Some(config);
        self
    }

    pub fn build(self) -> Result<AnalysisOrchestrator, JobError> {
        fn missing(what: &str) -> JobError {
            JobError::InvariantViolation(format!("orchestrator built without {what}"))
        }
        let deps = Deps { records: self.records.ok_or_else(|| missing("a record store"))?,
                          artifacts: self.artifacts.ok_or_else(|| missing("an artifact store"))?,
                          images: self.images.ok_or_else(|| missing("an image source"))?,
                          routine: self.routine.ok_or_else(|| missing("a cluster routine"))?,
                          encoder: self.encoder.ok_or_else(|| missing("an image encoder"))? };
        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let config = self.executor_config.unwrap_or_default();
                let executor = JobExecutor::start(config).map_err(|e| {
                                                             JobError::ExecutionFault(format!("could not start executor: {e}"))
                                                         })?;
                Arc::new(executor)
            }
        };
        Ok(AnalysisOrchestrator { deps: Arc::new(deps),
                                  executor,
                                  in_flight: Arc::new(DashMap::new()) })
    }
}
