//! Cuerpo de una tarea de análisis.
//!
//! Orden: Start -> cargar -> agrupar -> codificar -> reclamar liquidación ->
//! escribir artifact -> Complete. El artifact se escribe antes de marcar
//! `completed`, así ningún lector ve `completed` sin archivo. Cualquier error
//! termina en `failed` con su mensaje y sin artifact para la identidad,
//! tampoco el de una ejecución anterior ya reemplazada.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::{STAGE_CLUSTERING, STAGE_ENCODING, STAGE_LOADING, STAGE_SAVING};
use crate::engine::claim::InFlightClaim;
use crate::engine::orchestrator::Deps;
use crate::errors::JobError;
use crate::executor::{Task, TaskContext, TaskFault};
use crate::lifecycle::Transition;
use crate::model::{AnalysisRequest, JobIdentity, ResultRecord, ResultSummary};
use crate::repo::RecordSession;

pub(crate) struct JobRun {
    pub(crate) record_id: Uuid,
    pub(crate) identity: JobIdentity,
    pub(crate) request: AnalysisRequest,
    pub(crate) deps: Arc<Deps>,
    pub(crate) claim: InFlightClaim,
}

impl JobRun {
    pub(crate) fn into_task(self) -> Task {
        let name = format!("{}:{}", self.identity.operation, self.record_id);
        let run = Arc::new(self);
        let on_fault = Arc::clone(&run);
        let owner = Arc::clone(&run);
        let task = Task::new(name, move |ctx| run.execute(ctx), move |fault| on_fault.fail_from_fault(fault));
        owner.claim.attach(task.canceller());
        task
    }

    fn execute(&self, ctx: &TaskContext) {
        let started = Instant::now();
        let mut session = match self.deps.records.session() {
            Ok(s) => s,
            Err(e) => {
                if ctx.claim_settlement() {
                    self.fail_with_fresh_session(&format!("could not open record session: {e}"));
                }
                return;
            }
        };
        match session.apply(self.record_id, Transition::Start) {
            Ok(_) => {}
            Err(JobError::IllegalTransition { from, .. }) => {
                ctx.claim_settlement();
                self.claim.release();
                info!("job skipped result_id={} status={}", self.record_id, from);
                return;
            }
            Err(e) => {
                self.settle_failure(ctx, &mut *session, &e);
                return;
            }
        }
        info!("job started result_id={} {} task_id={}", self.record_id, self.identity, ctx.id());

        match self.run_steps(ctx, &mut *session) {
            Ok(Some(record)) => {
                let centers = record.summary().map(|s| s.centers.len()).unwrap_or(0);
                info!("job completed result_id={} centers={} elapsed_ms={}",
                      self.record_id,
                      centers,
                      started.elapsed().as_millis());
            }
            Ok(None) => {
                warn!("job result discarded result_id={} reason=already_settled elapsed_ms={}",
                      self.record_id,
                      started.elapsed().as_millis());
            }
            Err(e) => self.settle_failure(ctx, &mut *session, &e),
        }
    }

    /// `Ok(None)` cuando el ejecutor liquidó la tarea antes de terminar.
    fn run_steps(&self, ctx: &TaskContext, session: &mut dyn RecordSession) -> Result<Option<ResultRecord>, JobError> {
        let AnalysisRequest::Kmeans(params) = &self.request;

        self.stage(session, STAGE_LOADING);
        let image = self.deps.images.load(self.identity.dataset_id, self.identity.image_id)?;

        self.stage(session, STAGE_CLUSTERING);
        let output = self.deps.routine.cluster(&image, params)?;
        if output.centers.len() != params.nclusters as usize {
            return Err(JobError::ExecutionFault(format!("{} returned {} centers, expected {}",
                                                        self.deps.routine.name(),
                                                        output.centers.len(),
                                                        params.nclusters)));
        }

        self.stage(session, STAGE_ENCODING);
        let bytes = self.deps.encoder.encode(&output.labeled)?;

        if !ctx.claim_settlement() {
            return Ok(None);
        }
        self.stage(session, STAGE_SAVING);
        let receipt = self.deps.artifacts.write(&self.identity, &bytes)?;
        let summary = ResultSummary { centers: output.centers,
                                      compactness: output.compactness,
                                      processed_pixels: output.processed_pixels,
                                      width: image.width(),
                                      height: image.height(),
                                      artifact_checksum: receipt.checksum.clone(),
                                      artifact_bytes: receipt.bytes };
        let complete = Transition::Complete { summary,
                                              artifact_refs: vec![receipt.location.clone()] };
        self.claim.release();
        match session.apply(self.record_id, complete) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                if let Err(re) = self.deps.artifacts.remove(&self.identity) {
                    warn!("artifact cleanup failed result_id={} location={} err={}", self.record_id, receipt.location, re);
                }
                Err(JobError::StorageFault(format!("could not record completion: {e}")))
            }
        }
    }

    fn stage(&self, session: &mut dyn RecordSession, stage: &str) {
        if let Err(e) = session.apply(self.record_id, Transition::Progress { stage: stage.to_string() }) {
            debug!("stage update skipped result_id={} stage={} err={}", self.record_id, stage, e);
        }
    }

    fn settle_failure(&self, ctx: &TaskContext, session: &mut dyn RecordSession, err: &JobError) {
        if !ctx.claim_settlement() {
            debug!("failure discarded result_id={} err={}", self.record_id, err);
            return;
        }
        let message = err.to_string();
        self.claim.release();
        self.discard_artifact(session);
        match session.apply(self.record_id, Transition::fail(message.clone())) {
            Ok(_) => warn!("job failed result_id={} code={} err=\"{}\"", self.record_id, err.code(), message),
            Err(JobError::IllegalTransition { from, .. }) => {
                debug!("failure not recorded result_id={} status={}", self.record_id, from)
            }
            Err(e) => {
                warn!("failure write failed, retrying on a new session result_id={} err={}", self.record_id, e);
                self.fail_with_fresh_session(&message);
            }
        }
    }

    /// Borra el artifact de la identidad mientras el registro siga sin estado
    /// terminal. Mientras tanto ninguna otra ejecución puede escribir esa
    /// ruta, así que sólo se pierde el de esta ejecución o el de una
    /// `completed` anterior que este registro reemplazó.
    fn discard_artifact(&self, session: &mut dyn RecordSession) {
        match session.get(self.record_id) {
            Ok(record) if !record.is_terminal() => match self.deps.artifacts.remove(&self.identity) {
                Ok(true) => info!("artifact discarded result_id={} {}", self.record_id, self.identity),
                Ok(false) => {}
                Err(e) => warn!("artifact cleanup failed result_id={} {} err={}", self.record_id, self.identity, e),
            },
            Ok(_) => {}
            Err(e) => debug!("artifact cleanup skipped result_id={} err={}", self.record_id, e),
        }
    }

    fn fail_from_fault(&self, fault: TaskFault) {
        warn!("job faulted result_id={} fault=\"{}\"", self.record_id, fault);
        self.fail_with_fresh_session(&fault.to_string());
    }

    fn fail_with_fresh_session(&self, message: &str) {
        self.claim.release();
        let outcome = self.deps.records.session().and_then(|mut s| {
                                                      self.discard_artifact(&mut *s);
                                                      s.apply(self.record_id, Transition::fail(message))
                                                  });
        match outcome {
            Ok(_) => {}
            Err(JobError::IllegalTransition { from, .. }) => {
                debug!("failure not recorded result_id={} status={}", self.record_id, from)
            }
            Err(e) => error!("unrecoverable inconsistency: result_id={} {} left non-terminal err={} cause=\"{}\"",
                             self.record_id, self.identity, e, message),
        }
    }
}
