//! Configuración del servicio.
//! Se lee una vez al arrancar (`AppConfig::from_env`) y se pasa por valor;
//! no hay estado global.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use img_core::executor::{available_parallelism, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_GRACE};
use img_core::{ExecutorConfig, SubmitPolicy};

use crate::errors::CoreError;

pub const DEFAULT_IMAGE_ROOT: &str = "uploads/images";
pub const DEFAULT_ARTIFACT_ROOT: &str = "uploads/results";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Raíz de las imágenes de entrada (`<root>/<dataset_id>/<image_id>.*`).
    pub image_root: PathBuf,
    /// Raíz de los artifacts generados.
    pub artifact_root: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    /// `None` = rechazo inmediato con la cola llena.
    pub submit_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub max_task_duration: Option<Duration>,
    /// Sin URL se usa el store de registros en memoria.
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { image_root: PathBuf::from(DEFAULT_IMAGE_ROOT),
               artifact_root: PathBuf::from(DEFAULT_ARTIFACT_ROOT),
               workers: available_parallelism(),
               queue_capacity: DEFAULT_QUEUE_CAPACITY,
               submit_timeout: None,
               shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
               max_task_duration: None,
               database_url: None }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, CoreError> {
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v.parse::<T>()
                    .map(Some)
                    .map_err(|_| CoreError::Config(format!("{key} must be a number, got '{v}'"))),
    }
}

impl AppConfig {
    /// Carga `.env` (si existe) y lee las variables `IMGFLOW_*` y `DATABASE_URL`.
    pub fn from_env() -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = Self::default();
        let workers = parse_num::<usize>("IMGFLOW_WORKERS", lookup("IMGFLOW_WORKERS"))?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(CoreError::Config("IMGFLOW_WORKERS must be at least 1".into()));
        }
        let queue_capacity = parse_num::<usize>("IMGFLOW_QUEUE_CAPACITY", lookup("IMGFLOW_QUEUE_CAPACITY"))?
            .unwrap_or(defaults.queue_capacity);
        let submit_timeout = parse_num::<u64>("IMGFLOW_SUBMIT_TIMEOUT_MS", lookup("IMGFLOW_SUBMIT_TIMEOUT_MS"))?
            .map(Duration::from_millis);
        let shutdown_grace = parse_num::<u64>("IMGFLOW_SHUTDOWN_GRACE_MS", lookup("IMGFLOW_SHUTDOWN_GRACE_MS"))?
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_grace);
        let max_task_duration = parse_num::<u64>("IMGFLOW_MAX_TASK_SECS", lookup("IMGFLOW_MAX_TASK_SECS"))?
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let path_or = |key: &str, default: PathBuf| {
            lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from).unwrap_or(default)
        };
        Ok(Self { image_root: path_or("IMGFLOW_IMAGE_ROOT", defaults.image_root),
                  artifact_root: path_or("IMGFLOW_ARTIFACT_ROOT", defaults.artifact_root),
                  workers,
                  queue_capacity,
                  submit_timeout,
                  shutdown_grace,
                  max_task_duration,
                  database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let policy = match self.submit_timeout {
            Some(timeout) => SubmitPolicy::Block { timeout },
            None => SubmitPolicy::FailFast,
        };
        ExecutorConfig::default().with_pool_size(self.workers)
                                 .with_queue_capacity(self.queue_capacity)
                                 .with_submit_policy(policy)
                                 .with_shutdown_grace(self.shutdown_grace)
                                 .with_max_task_duration(self.max_task_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.image_root, PathBuf::from(DEFAULT_IMAGE_ROOT));
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.submit_timeout, None);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.executor_config().submit_policy, SubmitPolicy::FailFast);
    }

    #[test]
    fn reads_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[("IMGFLOW_WORKERS", "2"),
                                                  ("IMGFLOW_QUEUE_CAPACITY", "5"),
                                                  ("IMGFLOW_SUBMIT_TIMEOUT_MS", "250"),
                                                  ("IMGFLOW_MAX_TASK_SECS", "9"),
                                                  ("IMGFLOW_ARTIFACT_ROOT", "/tmp/out"),
                                                  ("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.artifact_root, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.max_task_duration, Some(Duration::from_secs(9)));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://x"));
        let exec = cfg.executor_config();
        assert_eq!(exec.queue_capacity, 5);
        assert_eq!(exec.submit_policy,
                   SubmitPolicy::Block { timeout: Duration::from_millis(250) });
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = AppConfig::from_lookup(lookup(&[("IMGFLOW_QUEUE_CAPACITY", "lots")])).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
        assert!(AppConfig::from_lookup(lookup(&[("IMGFLOW_WORKERS", "0")])).is_err());
    }
}
