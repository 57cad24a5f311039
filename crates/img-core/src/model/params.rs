//! Parámetros tipados por operación.
//!
//! `AnalysisRequest` es el payload validado que se persiste junto al
//! registro; su forma JSON lleva la etiqueta `operation`.

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_ATTEMPTS, MAX_CLUSTERS, MAX_ITERATIONS_LIMIT, MIN_CLUSTERS};
use crate::errors::JobError;
use crate::hashing::hash_value;
use crate::model::OperationKind;

/// Criterio de parada del K-means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criteria {
    /// Para cuando ningún centro se mueve más que `epsilon`.
    Epsilon,
    /// Ejecuta exactamente `max_iterations` iteraciones.
    #[serde(alias = "max iterations")]
    MaxIterations,
    /// Lo que ocurra primero.
    #[default]
    All,
}

impl Criteria {
    pub fn uses_epsilon(&self) -> bool {
        matches!(self, Criteria::Epsilon | Criteria::All)
    }

    pub fn uses_iterations(&self) -> bool {
        matches!(self, Criteria::MaxIterations | Criteria::All)
    }
}

/// Inicialización de centros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seeding {
    #[default]
    #[serde(rename = "pp")]
    PlusPlus,
    #[serde(rename = "random")]
    Random,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_attempts() -> u32 {
    3
}
fn default_epsilon() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    pub nclusters: u32,
    /// Un color RGB por cluster, en orden de luminosidad creciente.
    pub colors: Vec<[u8; 3]>,
    #[serde(default)]
    pub criteria: Criteria,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default)]
    pub seeding: Seeding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl KMeansParams {
    /// Parámetros por defecto con `nclusters` y sus colores.
    pub fn new(nclusters: u32, colors: Vec<[u8; 3]>) -> Self {
        Self { nclusters,
               colors,
               criteria: Criteria::default(),
               max_iterations: default_max_iterations(),
               attempts: default_attempts(),
               epsilon: default_epsilon(),
               seeding: Seeding::default(),
               seed: None }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if !(MIN_CLUSTERS..=MAX_CLUSTERS).contains(&self.nclusters) {
            return Err(JobError::InvalidParameters(format!("nclusters must be between {MIN_CLUSTERS} and {MAX_CLUSTERS} (got {})",
                                                           self.nclusters)));
        }
        if self.colors.len() != self.nclusters as usize {
            return Err(JobError::InvalidParameters(format!("expected {} colors, got {}",
                                                           self.nclusters,
                                                           self.colors.len())));
        }
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&self.max_iterations) {
            return Err(JobError::InvalidParameters(format!("max_iterations must be between 1 and {MAX_ITERATIONS_LIMIT}")));
        }
        if !(1..=MAX_ATTEMPTS).contains(&self.attempts) {
            return Err(JobError::InvalidParameters(format!("attempts must be between 1 and {MAX_ATTEMPTS}")));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(JobError::InvalidParameters("epsilon must be a positive finite number".to_string()));
        }
        Ok(())
    }

    /// Semilla del RNG: la explícita o una derivada del hash de parámetros,
    /// de modo que el mismo request produce el mismo resultado.
    pub fn effective_seed(&self) -> u64 {
        if let Some(seed) = self.seed {
            return seed;
        }
        let digest = serde_json::to_value(self).map(|v| hash_value(&v)).unwrap_or_default();
        digest.get(..16).and_then(|h| u64::from_str_radix(h, 16).ok()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AnalysisRequest {
    Kmeans(KMeansParams),
}

impl AnalysisRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            AnalysisRequest::Kmeans(_) => OperationKind::Kmeans,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            AnalysisRequest::Kmeans(p) => p.validate(),
        }
    }

    /// Discriminador que entra en la identidad del job.
    pub fn operation_key(&self) -> String {
        match self {
            AnalysisRequest::Kmeans(p) => p.nclusters.to_string(),
        }
    }

    /// Hash blake3 del JSON canónico del request.
    pub fn params_hash(&self) -> Result<String, JobError> {
        let value = serde_json::to_value(self).map_err(|e| JobError::InvalidParameters(e.to_string()))?;
        Ok(hash_value(&value))
    }

    pub fn as_kmeans(&self) -> Option<&KMeansParams> {
        match self {
            AnalysisRequest::Kmeans(p) => Some(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn palette(n: usize) -> Vec<[u8; 3]> {
        (0..n).map(|i| [i as u8 * 10, 0, 0]).collect()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let req: AnalysisRequest =
            serde_json::from_value(json!({"operation": "kmeans", "nclusters": 2, "colors": [[0,0,0],[255,255,255]]})).unwrap();
        let p = req.as_kmeans().unwrap();
        assert_eq!(p.criteria, Criteria::All);
        assert_eq!(p.max_iterations, 10);
        assert_eq!(p.attempts, 3);
        assert_eq!(p.seeding, Seeding::PlusPlus);
        assert!(req.validate().is_ok());
        assert_eq!(req.operation_key(), "2");
    }

    #[test]
    fn legacy_criteria_label_is_accepted() {
        let c: Criteria = serde_json::from_value(json!("max iterations")).unwrap();
        assert_eq!(c, Criteria::MaxIterations);
    }

    #[test]
    fn color_count_must_match_clusters() {
        let p = KMeansParams::new(3, palette(2));
        match p.validate() {
            Err(JobError::InvalidParameters(msg)) => assert!(msg.contains("expected 3 colors")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(KMeansParams::new(1, palette(1)).validate().is_err());
        assert!(KMeansParams::new(17, palette(17)).validate().is_err());
        let mut p = KMeansParams::new(3, palette(3));
        p.epsilon = f64::NAN;
        assert!(p.validate().is_err());
        p.epsilon = 0.5;
        p.attempts = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn params_hash_and_seed_are_stable() {
        let a = AnalysisRequest::Kmeans(KMeansParams::new(3, palette(3)));
        let b = AnalysisRequest::Kmeans(KMeansParams::new(3, palette(3)));
        assert_eq!(a.params_hash().unwrap(), b.params_hash().unwrap());
        assert_eq!(a.as_kmeans().unwrap().effective_seed(), b.as_kmeans().unwrap().effective_seed());
        let mut seeded = KMeansParams::new(3, palette(3));
        seeded.seed = Some(42);
        assert_eq!(seeded.effective_seed(), 42);
    }
}
