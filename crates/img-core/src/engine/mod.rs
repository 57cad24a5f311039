//! Orquestación: admisión de requests, cuerpo de las tareas y lectura.

mod claim;
mod job;
mod orchestrator;
mod queries;

pub use orchestrator::{AnalysisOrchestrator, OrchestratorBuilder};
pub use queries::ResultQueries;
