//! Camino de lectura: estado, artifact, listado y conteos.

use std::sync::Arc;

use uuid::Uuid;

use crate::api::{ArtifactDownload, StatusPage, StatusResponse};
use crate::artifact::ArtifactStore;
use crate::constants::ARTIFACT_CONTENT_TYPE;
use crate::errors::JobError;
use crate::lifecycle::JobStatus;
use crate::model::{JobIdentity, ResultRecord};
use crate::repo::{RecordFilter, RecordPage, RecordStats, RecordStore};

#[derive(Clone)]
pub struct ResultQueries {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ResultQueries {
    pub fn new(records: Arc<dyn RecordStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { records, artifacts }
    }

    pub fn record(&self, result_id: Uuid) -> Result<ResultRecord, JobError> {
        self.records.session()?.get(result_id)
    }

    pub fn status(&self, result_id: Uuid) -> Result<StatusResponse, JobError> {
        let record = self.record(result_id)?;
        Ok(self.describe(&record))
    }

    /// Estado del último registro de una identidad.
    pub fn status_for(&self, identity: &JobIdentity) -> Result<StatusResponse, JobError> {
        let record = self.records
                         .session()?
                         .find_by_identity(identity)?
                         .ok_or_else(|| JobError::NotFound(format!("no result for {identity}")))?;
        Ok(self.describe(&record))
    }

    /// Bytes del artifact; `NotFound` si el registro no está `completed`.
    pub fn artifact(&self, result_id: Uuid) -> Result<ArtifactDownload, JobError> {
        let record = self.record(result_id)?;
        if record.status() != JobStatus::Completed {
            return Err(JobError::NotFound(format!("result {result_id} has no artifact (status={})", record.status())));
        }
        let bytes = self.artifacts.read(&record.identity)?;
        Ok(ArtifactDownload { file_name: record.identity.artifact_file_name(),
                              content_type: ARTIFACT_CONTENT_TYPE,
                              bytes })
    }

    pub fn list(&self, filter: &RecordFilter) -> Result<RecordPage, JobError> {
        self.records.session()?.list(filter)
    }

    pub fn list_status(&self, filter: &RecordFilter) -> Result<StatusPage, JobError> {
        let page = self.list(filter)?;
        Ok(StatusPage { total: page.total,
                        results: page.records.iter().map(|r| self.describe(r)).collect() })
    }

    pub fn stats(&self) -> Result<RecordStats, JobError> {
        self.records.session()?.stats()
    }

    fn describe(&self, record: &ResultRecord) -> StatusResponse {
        let present = record.status() == JobStatus::Completed && self.artifacts.exists(&record.identity);
        StatusResponse::from_record(record, present)
    }
}
