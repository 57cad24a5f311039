//! img-persistence
//!
//! Implementación Postgres (Diesel + r2d2) del repositorio de resultados de
//! `img-core`.
//!
//! Módulos:
//! - `pg`: `PgRecordStore`, proveedores de conexión y pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde entorno / `.env`.
//! - `schema`: tablas Diesel.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::DbConfig;
pub use error::PersistenceError;
pub use pg::{build_pool, ConnectionProvider, PgPool, PgRecordStore, PoolProvider};
