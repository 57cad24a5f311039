#![allow(dead_code)]

use img_core::{AnalysisRequest, JobIdentity, KMeansParams, OperationKind};
use img_persistence::config::DbConfig;
use img_persistence::pg::{build_pool, PgPool};
use once_cell::sync::Lazy;
use uuid::Uuid;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env_optional()?;
    match build_pool(&cfg.url, 1, 4) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
    where F: FnOnce(&PgPool) -> R
{
    TEST_POOL.as_ref().map(f)
}

/// Dataset aleatorio por test para no chocar con filas de otras corridas.
pub fn fresh_dataset() -> i64 {
    ((Uuid::new_v4().as_u128() as u64) >> 2) as i64 + 1
}

pub fn identity(dataset_id: i64, image_id: i64) -> JobIdentity {
    JobIdentity::new(dataset_id, image_id, OperationKind::Kmeans, "2").unwrap()
}

pub fn params() -> AnalysisRequest {
    AnalysisRequest::Kmeans(KMeansParams::new(2, vec![[0, 0, 0], [255, 255, 255]]))
}
