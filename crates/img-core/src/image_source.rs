//! Acceso a las imágenes de entrada.
//!
//! `probe` es barato (sólo cabecera) y se usa en el camino de admisión;
//! `load` decodifica completo y sólo corre dentro de la tarea.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

pub trait ImageSource: Send + Sync {
    fn probe(&self, dataset_id: i64, image_id: i64) -> Result<ImageInfo, JobError>;
    fn load(&self, dataset_id: i64, image_id: i64) -> Result<RgbImage, JobError>;
}

pub(crate) fn image_not_found(dataset_id: i64, image_id: i64) -> JobError {
    JobError::NotFound(format!("image {image_id} in dataset {dataset_id}"))
}

/// Imágenes registradas en memoria (tests y demos).
#[derive(Clone, Default)]
pub struct InMemoryImageSource {
    images: Arc<RwLock<HashMap<(i64, i64), Arc<RgbImage>>>>,
}

impl InMemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset_id: i64, image_id: i64, image: RgbImage) {
        self.images.write().insert((dataset_id, image_id), Arc::new(image));
    }
}

impl ImageSource for InMemoryImageSource {
    fn probe(&self, dataset_id: i64, image_id: i64) -> Result<ImageInfo, JobError> {
        self.images
            .read()
            .get(&(dataset_id, image_id))
            .map(|img| ImageInfo { width: img.width(),
                                   height: img.height() })
            .ok_or_else(|| image_not_found(dataset_id, image_id))
    }

    fn load(&self, dataset_id: i64, image_id: i64) -> Result<RgbImage, JobError> {
        self.images
            .read()
            .get(&(dataset_id, image_id))
            .map(|img| img.as_ref().clone())
            .ok_or_else(|| image_not_found(dataset_id, image_id))
    }
}
