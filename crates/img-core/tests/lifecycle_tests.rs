mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use img_adapters::LabKMeans;
use img_core::{AnalysisRequest, ArtifactStore, ExecutorConfig, InMemoryArtifactStore, InMemoryRecordStore, JobError,
               JobIdentity, JobStatus, KMeansParams, OperationKind, RecordFilter, RecordStore};

fn identity(image_id: i64, n: u32) -> JobIdentity {
    JobIdentity::new(DATASET, image_id, OperationKind::Kmeans, n.to_string()).unwrap()
}

#[test]
fn enqueue_returns_before_the_work_and_completes_with_an_artifact() {
    let h = Harness::new(Arc::new(SlowRoutine(Duration::from_millis(300))), single_worker());
    let started = Instant::now();
    let resp = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(250), "enqueue blocked on the computation");
    assert!(resp.success);
    assert_eq!(resp.status.as_deref(), Some("processing"));
    let id = resp.result_id.unwrap();

    let early = h.queries().status(id).unwrap();
    assert_eq!(early.status, "processing");
    assert!(!early.has_result_image);

    let done = h.wait_terminal(id);
    assert_eq!(done.status, "completed", "error: {:?}", done.error);
    assert!(done.has_result_image);
    let summary = done.result.unwrap();
    assert_eq!(summary.centers.len(), 2);
    assert!(summary.centers[0] < summary.centers[1]);
    assert_eq!(summary.processed_pixels, 24 * 12);
    assert_eq!((summary.width, summary.height), (24, 12));

    let download = h.queries().artifact(id).unwrap();
    assert_eq!(download.content_type, "image/jpeg");
    assert_eq!(download.file_name, "1_kmeans_2.jpg");
    let decoded = image::load_from_memory(&download.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (24, 12));
    assert_eq!(summary.artifact_bytes, download.bytes.len() as u64);
}

#[test]
fn stored_artifact_is_exactly_the_encoded_output() {
    let encoder = RecordingEncoder::default();
    let artifacts = InMemoryArtifactStore::new();
    let h = Harness::with_parts(Arc::new(LabKMeans),
                                single_worker(),
                                Arc::new(InMemoryRecordStore::new()),
                                artifacts.clone(),
                                Arc::new(artifacts),
                                Arc::new(encoder.clone()));
    let id = h.orchestrator.enqueue(DATASET, 2, kmeans(3)).unwrap().result_id.unwrap();
    let done = h.wait_terminal(id);
    assert_eq!(done.status, "completed", "error: {:?}", done.error);

    let encoded = encoder.last.lock().clone().expect("encoder ran");
    let stored = h.artifacts.read(&identity(2, 3)).unwrap();
    let download = h.queries().artifact(id).unwrap();
    assert_eq!(stored, encoded);
    assert_eq!(download.bytes, encoded);
    let summary = done.result.unwrap();
    assert_eq!(summary.artifact_checksum, blake3::hash(&encoded).to_hex().to_string());
    assert_eq!(summary.artifact_bytes, encoded.len() as u64);
}

#[test]
fn invalid_parameters_are_rejected_without_a_record() {
    let store = Arc::new(InMemoryRecordStore::new());
    let h = Harness::with_records(Arc::new(LabKMeans), single_worker(), store.clone());
    let bad = AnalysisRequest::Kmeans(KMeansParams::new(3, vec![[0, 0, 0], [255, 255, 255]]));
    let err = h.orchestrator.enqueue(DATASET, 1, bad).unwrap_err();
    assert!(matches!(err, JobError::InvalidParameters(ref m) if m.contains("expected 3 colors")));
    assert!(store.is_empty());
}

#[test]
fn missing_image_is_not_found_without_a_record() {
    let store = Arc::new(InMemoryRecordStore::new());
    let h = Harness::with_records(Arc::new(LabKMeans), single_worker(), store.clone());
    let err = h.orchestrator.enqueue(DATASET, 404, kmeans(2)).unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
    assert!(store.is_empty());
}

#[test]
fn routine_error_fails_the_record_and_writes_no_artifact() {
    let h = Harness::new(Arc::new(FailingRoutine), single_worker());
    let id = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(id);
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("did not converge"));
    assert!(!st.has_result_image);
    assert!(h.artifacts.is_empty());
    assert!(matches!(h.queries().artifact(id), Err(JobError::NotFound(_))));
}

#[test]
fn panicking_routine_fails_the_record_and_the_pool_keeps_working() {
    let h = Harness::new(Arc::new(PanicOnWide(30)), single_worker());
    let wide = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(wide);
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("panicked"));

    let narrow = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    assert_eq!(h.wait_terminal(narrow).status, "completed");
    assert_eq!(h.orchestrator.executor_stats().panicked, 1);
}

#[test]
fn duplicate_in_flight_is_rejected_and_terminal_results_are_superseded() {
    let gate = GatedRoutine::default();
    let h = Harness::new(Arc::new(gate.clone()), single_worker());
    let first = h.orchestrator.enqueue(DATASET, 1, kmeans(3)).unwrap().result_id.unwrap();
    match h.orchestrator.enqueue(DATASET, 1, kmeans(3)) {
        Err(JobError::AlreadyInFlight { result_id }) => assert_eq!(result_id, first),
        other => panic!("expected AlreadyInFlight, got {other:?}"),
    }
    // Otro discriminador es otra identidad.
    let other = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    gate.open();
    assert_eq!(h.wait_terminal(first).status, "completed");
    assert_eq!(h.wait_terminal(other).status, "completed");

    let second = h.orchestrator.enqueue(DATASET, 1, kmeans(3)).unwrap().result_id.unwrap();
    assert_ne!(first, second);
    assert_eq!(h.wait_terminal(second).status, "completed");
    assert!(matches!(h.queries().status(first), Err(JobError::NotFound(_))));
    assert_eq!(h.queries().status_for(&identity(1, 3)).unwrap().result_id, second);
}

#[test]
fn failed_rerun_removes_the_artifact_of_the_superseded_result() {
    let routine = SwitchRoutine::default();
    let h = Harness::new(Arc::new(routine.clone()), single_worker());
    let first = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    assert_eq!(h.wait_terminal(first).status, "completed");
    assert!(h.artifacts.exists(&identity(1, 2)));

    routine.start_failing();
    let second = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(second);
    assert_eq!(st.status, "failed");
    assert!(!st.has_result_image);
    assert!(matches!(h.queries().status(first), Err(JobError::NotFound(_))));
    assert!(!h.artifacts.exists(&identity(1, 2)));
    assert!(matches!(h.artifacts.read(&identity(1, 2)), Err(JobError::NotFound(_))));
    assert!(matches!(h.queries().artifact(second), Err(JobError::NotFound(_))));
}

#[test]
fn concurrent_duplicates_admit_exactly_one() {
    let gate = GatedRoutine::default();
    let h = Arc::new(Harness::new(Arc::new(gate.clone()), single_worker()));
    let handles: Vec<_> = (0..8).map(|_| {
                                    let h = h.clone();
                                    thread::spawn(move || h.orchestrator.enqueue(DATASET, 1, kmeans(2)))
                                })
                                .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(accepted.len(), 1);
    assert!(results.iter()
                   .filter_map(|r| r.as_ref().err())
                   .all(|e| matches!(e, JobError::AlreadyInFlight { .. })));
    gate.open();
    let id = accepted[0].result_id.unwrap();
    assert_eq!(h.wait_terminal(id).status, "completed");
}

#[test]
fn queue_rejection_is_synchronous_and_marks_the_record_failed() {
    let gate = GatedRoutine::default();
    let cfg = single_worker().with_queue_capacity(0);
    let h = Harness::new(Arc::new(gate.clone()), cfg);
    let running = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let err = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap_err();
    assert!(matches!(err, JobError::QueueRejected(_)));

    let rejected = h.queries().status_for(&identity(2, 2)).unwrap();
    assert_eq!(rejected.status, "failed");
    assert!(rejected.error.unwrap().starts_with("rejected by executor"));

    gate.open();
    assert_eq!(h.wait_terminal(running).status, "completed");
    // El claim se liberó: se puede volver a pedir.
    let retry = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap().result_id.unwrap();
    assert_eq!(h.wait_terminal(retry).status, "completed");
}

#[test]
fn failed_completion_write_removes_the_artifact_and_fails_the_record() {
    let records = Arc::new(RejectCompletion::default());
    let h = Harness::with_records(Arc::new(LabKMeans), single_worker(), records);
    let id = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(id);
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("could not record completion"));
    assert!(!h.artifacts.exists(&identity(1, 2)));
}

#[test]
fn panic_between_artifact_write_and_completion_leaves_no_artifact() {
    let artifacts = InMemoryArtifactStore::new();
    let h = Harness::with_parts(Arc::new(LabKMeans),
                                single_worker(),
                                Arc::new(InMemoryRecordStore::new()),
                                artifacts.clone(),
                                Arc::new(PanicAfterWrite(artifacts)),
                                Arc::new(img_adapters::JpegArtifactEncoder::default()));
    let id = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(id);
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("storage driver crashed"));
    assert!(h.artifacts.is_empty());
    assert_eq!(h.orchestrator.executor_stats().panicked, 1);
}

#[test]
fn cancelling_a_queued_job_fails_it_and_it_never_runs() {
    let gate = GatedRoutine::default();
    let h = Harness::new(Arc::new(gate.clone()), single_worker().with_queue_capacity(2));
    let running = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let queued = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap().result_id.unwrap();

    let record = h.orchestrator.cancel(queued).unwrap();
    assert_eq!(record.status(), JobStatus::Failed);
    let st = h.queries().status(queued).unwrap();
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("cancelled by user"));

    gate.open();
    assert_eq!(h.wait_terminal(running).status, "completed");
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.orchestrator.executor_stats().queued > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.raw_status(queued), JobStatus::Failed);
    assert!(!h.artifacts.exists(&identity(2, 2)));
    // La identidad quedó libre.
    let again = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap().result_id.unwrap();
    assert_eq!(h.wait_terminal(again).status, "completed");
}

#[test]
fn cancelling_a_running_job_discards_its_late_result() {
    let gate = GatedRoutine::default();
    let h = Harness::new(Arc::new(gate.clone()), single_worker());
    let id = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.raw_status(id) == JobStatus::Queued && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(h.orchestrator.cancel(id).unwrap().status(), JobStatus::Failed);
    gate.open();
    thread::sleep(Duration::from_millis(300));
    let st = h.queries().status(id).unwrap();
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("cancelled by user"));
    assert!(h.artifacts.is_empty());
    assert_eq!(h.orchestrator.executor_stats().running, 0);

    assert!(matches!(h.orchestrator.cancel(id), Err(JobError::IllegalTransition { .. })));
    assert!(matches!(h.orchestrator.cancel(uuid::Uuid::new_v4()), Err(JobError::NotFound(_))));
}

#[test]
fn cancelling_a_record_without_a_local_task_fails_it_directly() {
    let store = Arc::new(InMemoryRecordStore::new());
    let foreign = {
        let mut s = store.session().unwrap();
        s.create(identity(1, 2), kmeans(2)).unwrap().id
    };
    let h = Harness::with_records(Arc::new(LabKMeans), single_worker(), store);
    let record = h.orchestrator.cancel(foreign).unwrap();
    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(record.error_message(), Some("cancelled by user"));
}

#[test]
fn timed_out_job_fails_and_its_late_result_is_discarded() {
    let cfg = single_worker().with_max_task_duration(Some(Duration::from_millis(50)));
    let h = Harness::new(Arc::new(SlowRoutine(Duration::from_millis(300))), cfg);
    let id = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let st = h.wait_terminal(id);
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("maximum duration"));
    thread::sleep(Duration::from_millis(500));
    assert_eq!(h.raw_status(id), JobStatus::Failed);
    assert!(h.artifacts.is_empty());
}

#[test]
fn shutdown_fails_jobs_that_never_started() {
    let gate = GatedRoutine::default();
    let cfg = single_worker().with_queue_capacity(4).with_shutdown_grace(Duration::from_secs(5));
    let h = Harness::new(Arc::new(gate.clone()), cfg);
    let first = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.raw_status(first) == JobStatus::Queued && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let queued = h.orchestrator.enqueue(DATASET, 2, kmeans(2)).unwrap().result_id.unwrap();

    let opener = thread::spawn({
        let gate = gate.clone();
        move || {
            thread::sleep(Duration::from_millis(50));
            gate.open();
        }
    });
    let report = h.orchestrator.shutdown();
    opener.join().unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(h.raw_status(first), JobStatus::Completed);
    let st = h.queries().status(queued).unwrap();
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("cancelled"));
    assert!(matches!(h.orchestrator.enqueue(DATASET, 2, kmeans(3)), Err(JobError::QueueRejected(_))));
}

#[test]
fn recover_abandoned_fails_orphaned_records() {
    let store = Arc::new(InMemoryRecordStore::new());
    let orphan = {
        let mut s = store.session().unwrap();
        let r = s.create(identity(1, 2), kmeans(2)).unwrap();
        s.apply(r.id, img_core::Transition::Start).unwrap();
        r.id
    };
    let h = Harness::with_records(Arc::new(LabKMeans), single_worker(), store);
    assert_eq!(h.orchestrator.recover_abandoned().unwrap(), 1);
    let st = h.queries().status(orphan).unwrap();
    assert_eq!(st.status, "failed");
    assert!(st.error.unwrap().contains("abandoned"));
    assert_eq!(h.orchestrator.recover_abandoned().unwrap(), 0);
}

#[test]
fn list_and_stats_reflect_terminal_states() {
    let h = Harness::new(Arc::new(LabKMeans), ExecutorConfig::default().with_pool_size(2));
    let ok = h.orchestrator.enqueue(DATASET, 1, kmeans(2)).unwrap().result_id.unwrap();
    thread::sleep(Duration::from_millis(5));
    let ok2 = h.orchestrator.enqueue(DATASET, 2, kmeans(4)).unwrap().result_id.unwrap();
    h.wait_terminal(ok);
    h.wait_terminal(ok2);

    let stats = h.queries().stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 2);
    let page = h.queries()
                .list(&RecordFilter { status: Some(JobStatus::Completed),
                                      limit: 1,
                                      ..RecordFilter::default() })
                .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id, ok2);
}
