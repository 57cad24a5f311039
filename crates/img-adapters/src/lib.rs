//! img-adapters: implementaciones concretas de los contratos de `img-core`.
//!
//! - `FsArtifactStore`: artifacts en disco con reemplazo atómico.
//! - `FsImageSource`: imágenes de entrada bajo `<root>/<dataset_id>/`.
//! - `LabKMeans`: K-means sobre el canal L (CIELAB) con coloreado por cluster.
//! - `JpegArtifactEncoder`: codificación JPEG del resultado.

pub mod artifacts;
pub mod encoder;
pub mod images;
pub mod kmeans;

pub use artifacts::FsArtifactStore;
pub use encoder::JpegArtifactEncoder;
pub use images::FsImageSource;
pub use kmeans::LabKMeans;
