//! Constantes compartidas del ciclo de vida.

/// Extensión de los artifacts producidos (JPEG).
pub const ARTIFACT_EXTENSION: &str = "jpg";

/// Content type servido al descargar un artifact.
pub const ARTIFACT_CONTENT_TYPE: &str = "image/jpeg";

/// Etapas de progreso publicadas mientras un job está en `processing`.
pub const STAGE_QUEUED: &str = "queued";
pub const STAGE_LOADING: &str = "loading";
pub const STAGE_CLUSTERING: &str = "clustering";
pub const STAGE_ENCODING: &str = "encoding";
pub const STAGE_SAVING: &str = "saving";

/// Límites de los parámetros K-means.
pub const MIN_CLUSTERS: u32 = 2;
pub const MAX_CLUSTERS: u32 = 16;
pub const MAX_ITERATIONS_LIMIT: u32 = 1000;
pub const MAX_ATTEMPTS: u32 = 20;

/// Límite por defecto de una página de `list`.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;
