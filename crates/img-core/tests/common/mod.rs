//! Helpers compartidos por los tests de integración del núcleo.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use img_adapters::{JpegArtifactEncoder, LabKMeans};
use img_core::{AnalysisOrchestrator, AnalysisRequest, ArtifactReceipt, ArtifactStore, ClusterOutput, ClusterRoutine,
               ExecutorConfig, ImageEncoder, InMemoryArtifactStore, InMemoryImageSource, InMemoryRecordStore,
               JobError, JobIdentity, JobStatus, KMeansParams, RecordSession, RecordStore, ResultQueries,
               StatusResponse, Transition};
use parking_lot::Mutex;
use uuid::Uuid;

pub const DATASET: i64 = 1;

pub fn two_tone(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| if x < width / 2 { Rgb([20, 20, 20]) } else { Rgb([230, 230, 230]) })
}

pub fn kmeans(n: u32) -> AnalysisRequest {
    let colors = (0..n).map(|i| [(i * 40) as u8, 0, 255 - (i * 40) as u8]).collect();
    AnalysisRequest::Kmeans(KMeansParams::new(n, colors))
}

/// Rutina que delega en `LabKMeans` tras dormir.
pub struct SlowRoutine(pub Duration);

impl ClusterRoutine for SlowRoutine {
    fn name(&self) -> &str {
        "slow"
    }
    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError> {
        thread::sleep(self.0);
        LabKMeans.cluster(image, params)
    }
}

/// Rutina que bloquea hasta que se abra la compuerta.
#[derive(Clone, Default)]
pub struct GatedRoutine(pub Arc<AtomicBool>);

impl GatedRoutine {
    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ClusterRoutine for GatedRoutine {
    fn name(&self) -> &str {
        "gated"
    }
    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.0.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        LabKMeans.cluster(image, params)
    }
}

pub struct FailingRoutine;

impl ClusterRoutine for FailingRoutine {
    fn name(&self) -> &str {
        "failing"
    }
    fn cluster(&self, _: &RgbImage, _: &KMeansParams) -> Result<ClusterOutput, JobError> {
        Err(JobError::ExecutionFault("kmeans did not converge".into()))
    }
}

/// `LabKMeans` mientras no se active `fail`; después falla como
/// `FailingRoutine`.
#[derive(Clone, Default)]
pub struct SwitchRoutine(pub Arc<AtomicBool>);

impl SwitchRoutine {
    pub fn start_failing(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ClusterRoutine for SwitchRoutine {
    fn name(&self) -> &str {
        "switch"
    }
    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError> {
        if self.0.load(Ordering::SeqCst) {
            return FailingRoutine.cluster(image, params);
        }
        LabKMeans.cluster(image, params)
    }
}

/// Encoder JPEG que guarda la última salida producida.
#[derive(Clone, Default)]
pub struct RecordingEncoder {
    pub last: Arc<Mutex<Option<Vec<u8>>>>,
}

impl ImageEncoder for RecordingEncoder {
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, JobError> {
        let bytes = JpegArtifactEncoder::default().encode(image)?;
        *self.last.lock() = Some(bytes.clone());
        Ok(bytes)
    }
}

/// Store que escribe en memoria y luego entra en pánico, como un proceso que
/// muere entre guardar el archivo y registrar `completed`.
pub struct PanicAfterWrite(pub InMemoryArtifactStore);

impl ArtifactStore for PanicAfterWrite {
    fn write(&self, key: &JobIdentity, bytes: &[u8]) -> Result<ArtifactReceipt, JobError> {
        self.0.write(key, bytes)?;
        panic!("storage driver crashed after writing");
    }
    fn read(&self, key: &JobIdentity) -> Result<Vec<u8>, JobError> {
        self.0.read(key)
    }
    fn exists(&self, key: &JobIdentity) -> bool {
        self.0.exists(key)
    }
    fn remove(&self, key: &JobIdentity) -> Result<bool, JobError> {
        self.0.remove(key)
    }
}

/// Falla con pánico sólo para imágenes de más de `threshold` píxeles de ancho.
pub struct PanicOnWide(pub u32);

impl ClusterRoutine for PanicOnWide {
    fn name(&self) -> &str {
        "panic-on-wide"
    }
    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError> {
        if image.width() > self.0 {
            panic!("numeric routine blew up");
        }
        LabKMeans.cluster(image, params)
    }
}

/// Store que delega en memoria pero rechaza las transiciones `Complete`.
#[derive(Clone, Default)]
pub struct RejectCompletion(pub InMemoryRecordStore);

struct RejectingSession<'a>(Box<dyn RecordSession + 'a>);

impl RecordStore for RejectCompletion {
    fn session(&self) -> Result<Box<dyn RecordSession + '_>, JobError> {
        Ok(Box::new(RejectingSession(self.0.session()?)))
    }
}

impl RecordSession for RejectingSession<'_> {
    fn create(&mut self,
              identity: img_core::JobIdentity,
              parameters: AnalysisRequest)
              -> Result<img_core::ResultRecord, JobError> {
        self.0.create(identity, parameters)
    }
    fn get(&mut self, id: Uuid) -> Result<img_core::ResultRecord, JobError> {
        self.0.get(id)
    }
    fn find_by_identity(&mut self,
                        identity: &img_core::JobIdentity)
                        -> Result<Option<img_core::ResultRecord>, JobError> {
        self.0.find_by_identity(identity)
    }
    fn apply(&mut self, id: Uuid, transition: Transition) -> Result<img_core::ResultRecord, JobError> {
        if matches!(transition, Transition::Complete { .. }) {
            return Err(JobError::StorageFault("connection reset".into()));
        }
        self.0.apply(id, transition)
    }
    fn list(&mut self, filter: &img_core::RecordFilter) -> Result<img_core::RecordPage, JobError> {
        self.0.list(filter)
    }
    fn stats(&mut self) -> Result<img_core::RecordStats, JobError> {
        self.0.stats()
    }
}

pub struct Harness {
    pub orchestrator: AnalysisOrchestrator,
    pub records: Arc<dyn RecordStore>,
    pub artifacts: InMemoryArtifactStore,
    pub images: InMemoryImageSource,
}

impl Harness {
    pub fn new(routine: Arc<dyn ClusterRoutine>, config: ExecutorConfig) -> Self {
        Self::with_records(routine, config, Arc::new(InMemoryRecordStore::new()))
    }

    pub fn with_records(routine: Arc<dyn ClusterRoutine>,
                        config: ExecutorConfig,
                        records: Arc<dyn RecordStore>)
                        -> Self {
        let artifacts = InMemoryArtifactStore::new();
        Self::with_parts(routine,
                         config,
                         records,
                         artifacts.clone(),
                         Arc::new(artifacts),
                         Arc::new(JpegArtifactEncoder::default()))
    }

    /// `artifacts` es el store que inspeccionan los tests; `store` el que
    /// recibe el orquestador y puede envolver al primero.
    pub fn with_parts(routine: Arc<dyn ClusterRoutine>,
                      config: ExecutorConfig,
                      records: Arc<dyn RecordStore>,
                      artifacts: InMemoryArtifactStore,
                      store: Arc<dyn ArtifactStore>,
                      encoder: Arc<dyn ImageEncoder>)
                      -> Self {
        let images = InMemoryImageSource::new();
        images.insert(DATASET, 1, two_tone(24, 12));
        images.insert(DATASET, 2, two_tone(40, 10));
        let orchestrator = AnalysisOrchestrator::builder().records(records.clone())
                                                          .artifacts(store)
                                                          .images(Arc::new(images.clone()))
                                                          .routine(routine)
                                                          .encoder(encoder)
                                                          .executor_config(config)
                                                          .build()
                                                          .expect("orchestrator");
        Self { orchestrator,
               records,
               artifacts,
               images }
    }

    pub fn queries(&self) -> ResultQueries {
        self.orchestrator.queries()
    }

    pub fn raw_status(&self, id: Uuid) -> JobStatus {
        self.records.session().unwrap().get(id).unwrap().status()
    }

    /// Espera a que el registro sea terminal.
    pub fn wait_terminal(&self, id: Uuid) -> StatusResponse {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if self.raw_status(id).is_terminal() {
                return self.queries().status(id).unwrap();
            }
            assert!(Instant::now() < deadline, "result {id} never reached a terminal state");
            thread::sleep(Duration::from_millis(10));
        }
    }
}

pub fn single_worker() -> ExecutorConfig {
    ExecutorConfig::default().with_pool_size(1)
}
