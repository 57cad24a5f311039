//! Configuración de conexión desde variables de entorno.
//! Usa `DATABASE_URL` y parámetros opcionales de pool.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    /// `Config` si falta `DATABASE_URL`.
    pub fn from_env() -> Result<Self, PersistenceError> {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").map_err(|_| PersistenceError::Config("DATABASE_URL not set".into()))?;
        Ok(Self::with_url(url))
    }

    /// Igual que `from_env` pero `None` si no hay base configurada.
    pub fn from_env_optional() -> Option<Self> {
        Self::from_env().ok()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
        Self { url: url.into(),
               min_connections,
               max_connections }
    }
}
