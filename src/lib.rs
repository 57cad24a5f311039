//! imgflow: servicio de análisis K-means de imágenes.
//!
//! Este crate arma la aplicación sobre los crates del workspace:
//! - `config`: `AppConfig` desde variables de entorno / `.env`.
//! - `errors`: errores de arranque (`CoreError`).
//! - `bootstrap`: construye una sola vez stores, ejecutor y orquestador.
//! - `front`: órdenes JSON por línea atendidas desde tokio.

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod front;

pub use bootstrap::{RecordBackend, Services};
pub use config::AppConfig;
pub use errors::CoreError;
