use std::path::{Path, PathBuf};

use enum_dispatch::enum_dispatch;
use image::ImageFormat;

use crate::error::UploadError;

pub mod encoder;
pub mod resizer;

pub use resizer::Downscale;

/// Checks the staged image decodes without changing it.
pub struct Verify;

impl Processor for Verify {
    fn run(&self, path: &Path, format: ImageFormat) -> anyhow::Result<()> {
        let data = std::fs::read(path)?;
        image::load_from_memory_with_format(&data, format)?;
        Ok(())
    }
}

/// Processors are selected per upload here.
///
/// This is not a Box<dyn Trait> as the set of processors is closed and
/// known ahead of time.
#[enum_dispatch(Processor)]
pub enum ProcessorSelector {
    Verify,
    Downscale,
}

#[enum_dispatch]
pub trait Processor: Sync + Send + 'static {
    /// Processes the staged image in place, failing if it is not a
    /// usable image of the given format.
    fn run(&self, path: &Path, format: ImageFormat) -> anyhow::Result<()>;
}

impl ProcessorSelector {
    pub fn for_upload(format: ImageFormat, max_dimension: Option<u32>) -> Self {
        match max_dimension {
            Some(max) if encoder::can_encode(format) => Downscale::new(max).into(),
            _ => Verify.into(),
        }
    }

    /// Runs the processor on the blocking thread pool.
    pub async fn run_blocking(self, path: PathBuf, format: ImageFormat) -> Result<(), UploadError> {
        tokio::task::spawn_blocking(move || self.run(&path, format))
            .await
            .map_err(|e| UploadError::Processing(e.into()))?
            .map_err(UploadError::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection() {
        assert!(matches!(
            ProcessorSelector::for_upload(ImageFormat::Png, None),
            ProcessorSelector::Verify(_),
        ));
        assert!(matches!(
            ProcessorSelector::for_upload(ImageFormat::Jpeg, Some(512)),
            ProcessorSelector::Downscale(_),
        ));

        // No encoder available, so it is stored as is.
        assert!(matches!(
            ProcessorSelector::for_upload(ImageFormat::WebP, Some(512)),
            ProcessorSelector::Verify(_),
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really a png")?;

        let res = ProcessorSelector::for_upload(ImageFormat::Png, None)
            .run_blocking(path, ImageFormat::Png)
            .await;
        assert!(matches!(res, Err(UploadError::Processing(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_verify_accepts_image() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ok.png");
        let img = image::DynamicImage::new_rgb8(8, 8);
        std::fs::write(&path, encoder::encode_to(&img, ImageFormat::Png)?)?;

        ProcessorSelector::for_upload(ImageFormat::Png, None)
            .run_blocking(path, ImageFormat::Png)
            .await?;

        Ok(())
    }
}
