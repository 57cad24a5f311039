//! Modelo neutral del ciclo de vida (identidad, parámetros, registro).

pub mod identity;
pub mod params;
pub mod record;
pub mod summary;

pub use identity::{JobIdentity, OperationKind};
pub use params::{AnalysisRequest, Criteria, KMeansParams, Seeding};
pub use record::{JobState, RecordParts, ResultRecord};
pub use summary::ResultSummary;
