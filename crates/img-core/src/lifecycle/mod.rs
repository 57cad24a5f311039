//! Máquina de estados de un job.
//!
//! Transiciones válidas:
//! - `Queued` -> `Processing` (Start)
//! - `Processing` -> `Processing` (Progress, sólo cambia la etapa)
//! - `Processing` -> `Completed` (Complete)
//! - `Queued` | `Processing` -> `Failed` (Fail)
//!
//! Los estados terminales no admiten más transiciones. La misma función
//! `apply` la usan el store in-memory y el de Postgres.

mod status;
mod transition;

pub use status::JobStatus;
pub use transition::{apply, Transition};
