use serde::{Deserialize, Serialize};

/// Metadatos de un resultado completado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Centros de luminosidad (canal L, escala 0..=255) en orden ascendente.
    pub centers: Vec<f64>,
    /// Suma de distancias cuadradas de cada píxel a su centro.
    pub compactness: f64,
    pub processed_pixels: u64,
    pub width: u32,
    pub height: u32,
    /// Checksum hex del artifact tal como quedó escrito.
    pub artifact_checksum: String,
    pub artifact_bytes: u64,
}
