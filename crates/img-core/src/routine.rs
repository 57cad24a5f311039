//! Rutina numérica de clustering.

use image::RgbImage;

use crate::errors::JobError;
use crate::model::KMeansParams;

/// Salida de una ejecución de K-means.
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    /// Centros ordenados de forma ascendente.
    pub centers: Vec<f64>,
    pub compactness: f64,
    pub processed_pixels: u64,
    /// Imagen con cada píxel pintado con el color de su cluster.
    pub labeled: RgbImage,
}

/// Implementaciones deben ser puras respecto a sus entradas: mismos píxeles
/// y mismos parámetros (incluida la semilla) dan la misma salida.
pub trait ClusterRoutine: Send + Sync {
    fn name(&self) -> &str;
    fn cluster(&self, image: &RgbImage, params: &KMeansParams) -> Result<ClusterOutput, JobError>;
}
