//! Imágenes de entrada en disco: `<root>/<dataset_id>/<image_id>.<ext>`.

use std::path::{Path, PathBuf};

use image::RgbImage;
use img_core::{ImageInfo, ImageSource, JobError};
use log::debug;

/// Extensiones buscadas, en orden.
const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone)]
pub struct FsImageSource {
    root: PathBuf,
}

impl FsImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, dataset_id: i64, image_id: i64) -> Result<PathBuf, JobError> {
        let dir = self.root.join(dataset_id.to_string());
        EXTENSIONS.iter()
                  .map(|ext| dir.join(format!("{image_id}.{ext}")))
                  .find(|p| p.is_file())
                  .ok_or_else(|| JobError::NotFound(format!("image {image_id} in dataset {dataset_id}")))
    }
}

impl ImageSource for FsImageSource {
    fn probe(&self, dataset_id: i64, image_id: i64) -> Result<ImageInfo, JobError> {
        let path = self.locate(dataset_id, image_id)?;
        let (width, height) = image::image_dimensions(&path).map_err(|e| {
                                  JobError::NotFound(format!("image {image_id} in dataset {dataset_id} is not readable: {e}"))
                              })?;
        if width == 0 || height == 0 {
            return Err(JobError::NotFound(format!("image {image_id} in dataset {dataset_id} is empty")));
        }
        debug!("image probed path={} width={} height={}", path.display(), width, height);
        Ok(ImageInfo { width, height })
    }

    fn load(&self, dataset_id: i64, image_id: i64) -> Result<RgbImage, JobError> {
        let path = self.locate(dataset_id, image_id)?;
        let img = image::open(&path).map_err(|e| {
                                         JobError::ExecutionFault(format!("could not decode {}: {e}", path.display()))
                                     })?;
        Ok(img.to_rgb8())
    }
}
