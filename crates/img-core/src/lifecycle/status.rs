use std::fmt;

use serde::{Deserialize, Serialize};

/// Estado persistido de un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Aceptado por el ejecutor, sin worker asignado todavía.
    Queued,
    /// Un worker lo está ejecutando.
    Processing,
    /// Terminó con artifact escrito.
    Completed,
    /// Terminó con error.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Estado expuesto a clientes: `queued` se publica como `processing`
    /// (la etapa distingue ambos casos).
    pub fn public_label(&self) -> &'static str {
        match self {
            JobStatus::Queued => JobStatus::Processing.as_str(),
            other => other.as_str(),
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!((self, next),
                 (JobStatus::Queued, JobStatus::Processing)
                 | (JobStatus::Processing, JobStatus::Processing)
                 | (JobStatus::Processing, JobStatus::Completed)
                 | (JobStatus::Queued, JobStatus::Failed)
                 | (JobStatus::Processing, JobStatus::Failed))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
