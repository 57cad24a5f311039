//! Contratos de artifacts: dónde se guardan y cómo se codifican.
//!
//! Un artifact se direcciona con la `JobIdentity` que lo produjo. `write`
//! reemplaza atómicamente: un lector ve el archivo anterior o el nuevo
//! completo, nunca uno parcial.

mod memory;

pub use memory::InMemoryArtifactStore;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::errors::JobError;
use crate::model::JobIdentity;

/// Resultado de una escritura.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReceipt {
    /// Referencia durable (ruta) que se guarda en `artifact_refs`.
    pub location: String,
    pub checksum: String,
    pub bytes: u64,
}

pub trait ArtifactStore: Send + Sync {
    fn write(&self, key: &JobIdentity, bytes: &[u8]) -> Result<ArtifactReceipt, JobError>;

    /// `NotFound` si no hay artifact para la identidad.
    fn read(&self, key: &JobIdentity) -> Result<Vec<u8>, JobError>;

    fn exists(&self, key: &JobIdentity) -> bool;

    /// Devuelve `true` si había algo que borrar.
    fn remove(&self, key: &JobIdentity) -> Result<bool, JobError>;
}

/// Codificador del artifact final a partir de la imagen etiquetada.
pub trait ImageEncoder: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, JobError>;
}
