//! Formas de respuesta para el front (HTTP, CLI o stdin).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::STAGE_QUEUED;
use crate::errors::JobError;
use crate::lifecycle::JobStatus;
use crate::model::{AnalysisRequest, ResultRecord, ResultSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub success: bool,
    pub message: String,
    pub image_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl EnqueueResponse {
    pub fn accepted(record: &ResultRecord) -> Self {
        Self { success: true,
               message: format!("{} analysis started", record.identity.operation),
               image_id: record.identity.image_id,
               result_id: Some(record.id),
               status: Some(record.status().public_label().to_string()),
               error_code: None }
    }

    pub fn rejected(image_id: i64, err: &JobError) -> Self {
        let result_id = match err {
            JobError::AlreadyInFlight { result_id } => Some(*result_id),
            _ => None,
        };
        Self { success: false,
               message: err.to_string(),
               image_id,
               result_id,
               status: None,
               error_code: Some(err.code().to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub result_id: Uuid,
    pub dataset_id: i64,
    pub image_id: i64,
    /// `processing` | `completed` | `failed`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub has_result_image: bool,
    pub parameters: AnalysisRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    /// `artifact_present` sólo cuenta si el registro está `completed`.
    pub fn from_record(record: &ResultRecord, artifact_present: bool) -> Self {
        let status = record.status();
        let stage = match status {
            JobStatus::Queued => Some(STAGE_QUEUED.to_string()),
            _ => record.stage().map(str::to_string),
        };
        Self { result_id: record.id,
               dataset_id: record.identity.dataset_id,
               image_id: record.identity.image_id,
               status: status.public_label().to_string(),
               stage,
               has_result_image: status == JobStatus::Completed && artifact_present,
               parameters: record.parameters.clone(),
               result: record.summary().cloned(),
               error: record.error_message().map(str::to_string),
               created_at: record.created_at,
               completed_at: record.completed_at() }
    }
}

/// Página del listado en forma de respuestas de estado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPage {
    pub total: u64,
    pub results: Vec<StatusResponse>,
}

/// Bytes de un artifact listo para servir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}
