use std::path::Path;

use image::imageops::FilterType;
use image::{load_from_memory_with_format, GenericImageView, ImageFormat};

use super::encoder::encode_to;
use super::Processor;

/// Shrinks images that are larger than a bounding box, keeping their
/// aspect ratio. Images that already fit are left untouched.
pub struct Downscale {
    max_dimension: u32,
}

impl Downscale {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Processor for Downscale {
    fn run(&self, path: &Path, format: ImageFormat) -> anyhow::Result<()> {
        let data = std::fs::read(path)?;
        let img = load_from_memory_with_format(&data, format)?;

        let (width, height) = img.dimensions();
        if width <= self.max_dimension && height <= self.max_dimension {
            return Ok(());
        }

        let resized = img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
        debug!(
            "Downscaled image from {}x{} to {}x{}",
            width,
            height,
            resized.width(),
            resized.height(),
        );

        let encoded = encode_to(&resized, format)?;
        std::fs::write(path, encoded)?;

        Ok(())
    }
}
