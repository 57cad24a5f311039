//! `ResultRecord`: fila durable que sigue un job de análisis.
//!
//! El estado es un enum etiquetado: sólo `Completed` lleva resumen y
//! artifacts, sólo `Failed` lleva mensaje de error. `RecordParts` es la vista
//! plana que usan los backends de persistencia; `from_parts` vuelve a validar
//! esas reglas al leer.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::JobError;
use crate::lifecycle::JobStatus;
use crate::model::{AnalysisRequest, JobIdentity, ResultSummary};

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Processing {
        stage: Option<String>,
    },
    Completed {
        summary: ResultSummary,
        artifact_refs: Vec<String>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error_message: String,
        completed_at: DateTime<Utc>,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Processing { .. } => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub id: Uuid,
    pub identity: JobIdentity,
    pub parameters: AnalysisRequest,
    pub params_hash: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ResultRecord {
    /// Registro nuevo en `queued`.
    pub fn queued(identity: JobIdentity, parameters: AnalysisRequest, now: DateTime<Utc>) -> Result<Self, JobError> {
        let params_hash = parameters.params_hash()?;
        Ok(Self { id: Uuid::new_v4(),
                  identity,
                  parameters,
                  params_hash,
                  state: JobState::Queued,
                  created_at: now,
                  started_at: None })
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn stage(&self) -> Option<&str> {
        match &self.state {
            JobState::Processing { stage } => stage.as_deref(),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&ResultSummary> {
        match &self.state {
            JobState::Completed { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub fn artifact_refs(&self) -> &[String] {
        match &self.state {
            JobState::Completed { artifact_refs, .. } => artifact_refs,
            _ => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            JobState::Completed { completed_at, .. } | JobState::Failed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    pub fn to_parts(&self) -> RecordParts {
        let (stage, result_summary, artifact_refs, error_message) = match &self.state {
            JobState::Queued => (None, None, Vec::new(), None),
            JobState::Processing { stage } => (stage.clone(), None, Vec::new(), None),
            JobState::Completed { summary, artifact_refs, .. } => {
                (None, Some(summary.clone()), artifact_refs.clone(), None)
            }
            JobState::Failed { error_message, .. } => (None, None, Vec::new(), Some(error_message.clone())),
        };
        RecordParts { id: self.id,
                      identity: self.identity.clone(),
                      parameters: self.parameters.clone(),
                      params_hash: self.params_hash.clone(),
                      status: self.status(),
                      stage,
                      result_summary,
                      artifact_refs,
                      error_message,
                      created_at: self.created_at,
                      started_at: self.started_at,
                      completed_at: self.completed_at() }
    }

    pub fn from_parts(parts: RecordParts) -> Result<Self, JobError> {
        let broken = |what: &str| JobError::InvariantViolation(format!("record {}: {what}", parts.id));
        let state = match parts.status {
            JobStatus::Queued | JobStatus::Processing => {
                if parts.result_summary.is_some() || parts.error_message.is_some() || !parts.artifact_refs.is_empty() {
                    return Err(broken("non-terminal record carries result or error data"));
                }
                if parts.status == JobStatus::Queued {
                    JobState::Queued
                } else {
                    JobState::Processing { stage: parts.stage.clone() }
                }
            }
            JobStatus::Completed => {
                let summary = parts.result_summary.clone().ok_or_else(|| broken("completed without summary"))?;
                if parts.artifact_refs.is_empty() {
                    return Err(broken("completed without artifact references"));
                }
                if parts.error_message.is_some() {
                    return Err(broken("completed record carries an error message"));
                }
                let completed_at = parts.completed_at.ok_or_else(|| broken("completed without completed_at"))?;
                JobState::Completed { summary,
                                      artifact_refs: parts.artifact_refs.clone(),
                                      completed_at }
            }
            JobStatus::Failed => {
                let error_message = parts.error_message.clone().ok_or_else(|| broken("failed without error message"))?;
                if parts.result_summary.is_some() {
                    return Err(broken("failed record carries a result summary"));
                }
                let completed_at = parts.completed_at.ok_or_else(|| broken("failed without completed_at"))?;
                JobState::Failed { error_message, completed_at }
            }
        };
        Ok(Self { id: parts.id,
                  identity: parts.identity,
                  parameters: parts.parameters,
                  params_hash: parts.params_hash,
                  state,
                  created_at: parts.created_at,
                  started_at: parts.started_at })
    }
}

/// Vista plana de un `ResultRecord` (una columna por campo).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordParts {
    pub id: Uuid,
    pub identity: JobIdentity,
    pub parameters: AnalysisRequest,
    pub params_hash: String,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub result_summary: Option<ResultSummary>,
    pub artifact_refs: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KMeansParams, OperationKind};

    fn record() -> ResultRecord {
        let identity = JobIdentity::new(1, 2, OperationKind::Kmeans, "2").unwrap();
        let params = AnalysisRequest::Kmeans(KMeansParams::new(2, vec![[0, 0, 0], [255, 255, 255]]));
        ResultRecord::queued(identity, params, Utc::now()).unwrap()
    }

    #[test]
    fn parts_round_trip_for_failed_record() {
        let mut r = record();
        r.state = JobState::Failed { error_message: "boom".into(),
                                     completed_at: Utc::now() };
        let back = ResultRecord::from_parts(r.to_parts()).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn from_parts_rejects_completed_without_artifacts() {
        let mut parts = record().to_parts();
        parts.status = JobStatus::Completed;
        parts.completed_at = Some(Utc::now());
        parts.result_summary = Some(ResultSummary { centers: vec![1.0, 2.0],
                                                    compactness: 0.0,
                                                    processed_pixels: 4,
                                                    width: 2,
                                                    height: 2,
                                                    artifact_checksum: "x".into(),
                                                    artifact_bytes: 1 });
        assert!(matches!(ResultRecord::from_parts(parts), Err(JobError::InvariantViolation(_))));
    }

    #[test]
    fn from_parts_rejects_queued_with_error() {
        let mut parts = record().to_parts();
        parts.error_message = Some("stale".into());
        assert!(ResultRecord::from_parts(parts).is_err());
    }
}
