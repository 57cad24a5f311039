use chrono::{DateTime, Utc};

use crate::errors::JobError;
use crate::lifecycle::JobStatus;
use crate::model::{JobState, ResultRecord, ResultSummary};

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Start,
    Progress { stage: String },
    Complete { summary: ResultSummary, artifact_refs: Vec<String> },
    Fail { error_message: String },
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start | Transition::Progress { .. } => JobStatus::Processing,
            Transition::Complete { .. } => JobStatus::Completed,
            Transition::Fail { .. } => JobStatus::Failed,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Transition::Fail { error_message: message.into() }
    }
}

/// Aplica una transición sobre el registro o la rechaza sin modificarlo.
pub fn apply(record: &mut ResultRecord, transition: Transition, now: DateTime<Utc>) -> Result<(), JobError> {
    let from = record.status();
    let to = transition.target();
    let illegal = JobError::IllegalTransition { from, to };
    if !from.can_transition_to(to) {
        return Err(illegal);
    }
    match transition {
        Transition::Start => {
            if from != JobStatus::Queued {
                return Err(illegal);
            }
            record.started_at = Some(now);
            record.state = JobState::Processing { stage: None };
        }
        Transition::Progress { stage } => {
            if from != JobStatus::Processing {
                return Err(illegal);
            }
            record.state = JobState::Processing { stage: Some(stage) };
        }
        Transition::Complete { summary, artifact_refs } => {
            if artifact_refs.is_empty() {
                return Err(JobError::InvariantViolation(format!("record {}: completion requires at least one artifact reference",
                                                                record.id)));
            }
            record.state = JobState::Completed { summary,
                                                 artifact_refs,
                                                 completed_at: now };
        }
        Transition::Fail { error_message } => {
            let error_message = if error_message.trim().is_empty() {
                "unknown failure".to_string()
            } else {
                error_message
            };
            record.state = JobState::Failed { error_message,
                                              completed_at: now };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisRequest, JobIdentity, KMeansParams, OperationKind};

    fn queued() -> ResultRecord {
        let identity = JobIdentity::new(1, 9, OperationKind::Kmeans, "2").unwrap();
        let params = AnalysisRequest::Kmeans(KMeansParams::new(2, vec![[0, 0, 0], [9, 9, 9]]));
        ResultRecord::queued(identity, params, Utc::now()).unwrap()
    }

    fn summary() -> ResultSummary {
        ResultSummary { centers: vec![10.0, 200.0],
                        compactness: 3.5,
                        processed_pixels: 100,
                        width: 10,
                        height: 10,
                        artifact_checksum: "abc".into(),
                        artifact_bytes: 321 }
    }

    #[test]
    fn happy_path_sets_timestamps() {
        let mut r = queued();
        apply(&mut r, Transition::Start, Utc::now()).unwrap();
        assert_eq!(r.status(), JobStatus::Processing);
        assert!(r.started_at.is_some());
        apply(&mut r, Transition::Progress { stage: "clustering".into() }, Utc::now()).unwrap();
        assert_eq!(r.stage(), Some("clustering"));
        apply(&mut r,
              Transition::Complete { summary: summary(),
                                     artifact_refs: vec!["1/9_kmeans_2.jpg".into()] },
              Utc::now()).unwrap();
        assert_eq!(r.status(), JobStatus::Completed);
        assert!(r.completed_at().is_some());
        assert_eq!(r.summary().map(|s| s.processed_pixels), Some(100));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut r = queued();
        apply(&mut r, Transition::fail("rejected"), Utc::now()).unwrap();
        let before = r.clone();
        let err = apply(&mut r, Transition::Start, Utc::now()).unwrap_err();
        assert_eq!(err,
                   JobError::IllegalTransition { from: JobStatus::Failed,
                                                 to: JobStatus::Processing });
        assert!(apply(&mut r, Transition::fail("again"), Utc::now()).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn cannot_complete_from_queued_or_without_artifacts() {
        let mut r = queued();
        assert!(apply(&mut r,
                      Transition::Complete { summary: summary(),
                                             artifact_refs: vec!["x".into()] },
                      Utc::now()).is_err());
        apply(&mut r, Transition::Start, Utc::now()).unwrap();
        let err = apply(&mut r,
                        Transition::Complete { summary: summary(),
                                               artifact_refs: vec![] },
                        Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::InvariantViolation(_)));
        assert_eq!(r.status(), JobStatus::Processing);
    }

    #[test]
    fn start_twice_is_rejected_and_empty_error_gets_a_message() {
        let mut r = queued();
        apply(&mut r, Transition::Start, Utc::now()).unwrap();
        assert!(apply(&mut r, Transition::Start, Utc::now()).is_err());
        apply(&mut r, Transition::fail("  "), Utc::now()).unwrap();
        assert_eq!(r.error_message(), Some("unknown failure"));
    }

    #[test]
    fn public_label_hides_queued() {
        assert_eq!(JobStatus::Queued.public_label(), "processing");
        assert_eq!(JobStatus::Failed.public_label(), "failed");
        assert_eq!(JobStatus::parse("completed"), Some(JobStatus::Completed));
        assert_eq!(JobStatus::parse("done"), None);
    }
}
