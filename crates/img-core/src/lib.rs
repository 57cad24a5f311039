//! img-core: ciclo de vida asíncrono de análisis de imágenes.
//!
//! El crate no conoce base de datos ni sistema de archivos: define el modelo
//! (`ResultRecord`, `JobIdentity`, parámetros), la máquina de estados, los
//! contratos de almacenamiento (`RecordStore`, `ArtifactStore`,
//! `ImageSource`), el ejecutor acotado (`JobExecutor`) y el orquestador que
//! los compone. Las implementaciones concretas viven en `img-adapters` y
//! `img-persistence`; aquí sólo hay variantes in-memory para tests.
pub mod api;
pub mod artifact;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod hashing;
pub mod image_source;
pub mod lifecycle;
pub mod model;
pub mod repo;
pub mod routine;

pub use api::{ArtifactDownload, EnqueueResponse, StatusPage, StatusResponse};
pub use artifact::{ArtifactReceipt, ArtifactStore, ImageEncoder, InMemoryArtifactStore};
pub use engine::{AnalysisOrchestrator, OrchestratorBuilder, ResultQueries};
pub use errors::JobError;
pub use executor::{ExecutorConfig, ExecutorError, ExecutorStats, JobExecutor, ShutdownReport, SubmitPolicy, Task,
                   TaskCanceller, TaskContext, TaskFault};
pub use image_source::{ImageInfo, ImageSource, InMemoryImageSource};
pub use lifecycle::{JobStatus, Transition};
pub use model::{AnalysisRequest, Criteria, JobIdentity, JobState, KMeansParams, OperationKind, ResultRecord,
                ResultSummary, Seeding};
pub use repo::{InMemoryRecordStore, RecordFilter, RecordPage, RecordSession, RecordStats, RecordStore};
pub use routine::{ClusterOutput, ClusterRoutine};
