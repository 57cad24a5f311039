//! Identidad de un job: `(dataset_id, image_id, operation, operation_key)`.
//!
//! La misma tupla direcciona el registro en el repositorio y el artifact en
//! el `ArtifactStore`, por eso el nombre de archivo se deriva sólo de ella.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::ARTIFACT_EXTENSION;
use crate::errors::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Kmeans,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Kmeans => "kmeans",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "kmeans" => Some(OperationKind::Kmeans),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub dataset_id: i64,
    pub image_id: i64,
    pub operation: OperationKind,
    /// Discriminador del resultado dentro de la operación (K-means: nº de
    /// clusters). Forma parte de la ruta del artifact.
    pub operation_key: String,
}

impl JobIdentity {
    pub fn new(dataset_id: i64,
               image_id: i64,
               operation: OperationKind,
               operation_key: impl Into<String>)
               -> Result<Self, JobError> {
        let operation_key = operation_key.into();
        if dataset_id <= 0 || image_id <= 0 {
            return Err(JobError::InvalidParameters(format!("dataset_id and image_id must be positive (got {dataset_id}, {image_id})")));
        }
        let key_ok = !operation_key.is_empty()
                     && operation_key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !key_ok {
            return Err(JobError::InvalidParameters(format!("operation key '{operation_key}' is not a safe file name component")));
        }
        Ok(Self { dataset_id,
                  image_id,
                  operation,
                  operation_key })
    }

    /// `<image_id>_<operation>_<operation_key>.jpg`
    pub fn artifact_file_name(&self) -> String {
        format!("{}_{}_{}.{}", self.image_id, self.operation, self.operation_key, ARTIFACT_EXTENSION)
    }

    /// Ruta relativa a la raíz del store: `<dataset_id>/<file_name>`.
    pub fn artifact_relative_path(&self) -> PathBuf {
        PathBuf::from(self.dataset_id.to_string()).join(self.artifact_file_name())
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
               "dataset={} image={} op={} key={}",
               self.dataset_id, self.image_id, self.operation, self.operation_key)
    }
}
