use std::fmt::Display;
use std::path::Path;

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use image::ImageFormat;
use mime::Mime;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::UploadError;

/// The number of leading bytes used to detect the image format.
const SNIFF_LEN: usize = 64;

/// An upload written to a temporary file.
///
/// The file is owned by a single request and is removed when this is
/// dropped, whichever way the request ends.
pub struct StagedUpload {
    file: NamedTempFile,
    format: Option<ImageFormat>,
}

impl StagedUpload {
    #[inline]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// The mime type of the detected format, set by `detect_format`.
    pub fn mime_type(&self) -> Option<Mime> {
        self.format.and_then(mime_for_format)
    }

    /// The current size of the staged file in bytes.
    pub async fn size(&self) -> std::io::Result<u64> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    /// Detects the image format from the first few bytes of the file.
    pub async fn detect_format(&mut self) -> Result<ImageFormat, UploadError> {
        let mut file = tokio::fs::File::open(self.path())
            .await
            .map_err(|e| UploadError::TempFile(e.to_string()))?;

        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut file)
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .await
            .map_err(|e| UploadError::Copy(e.to_string()))?;

        let format = image::guess_format(&head).map_err(|_| UploadError::UnknownMime)?;
        if mime_for_format(format).is_none() {
            return Err(UploadError::UnknownMime);
        }

        self.format = Some(format);
        Ok(format)
    }
}

/// Writes the given body out to a new temporary file.
///
/// The body is rejected as soon as it grows beyond `max_size` bytes.
pub async fn stage<S, E>(body: S, max_size: u64) -> Result<StagedUpload, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    pin_mut!(body);

    let file = tempfile::Builder::new()
        .prefix("image")
        .tempfile()
        .map_err(|e| UploadError::TempFile(e.to_string()))?;

    let handle = file.reopen().map_err(|e| UploadError::TempFile(e.to_string()))?;
    let mut writer = tokio::fs::File::from_std(handle);

    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| UploadError::Copy(e.to_string()))?;

        written += chunk.len() as u64;
        if written > max_size {
            return Err(UploadError::TooLarge { limit: max_size });
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| UploadError::Copy(e.to_string()))?;
    }

    writer.flush().await.map_err(|e| UploadError::Copy(e.to_string()))?;

    debug!("Staged {} bytes @ {:?}", written, file.path());
    Ok(StagedUpload { file, format: None })
}

/// The image formats accepted for upload.
pub fn mime_for_format(format: ImageFormat) -> Option<Mime> {
    let mime = match format {
        ImageFormat::Png => mime::IMAGE_PNG,
        ImageFormat::Jpeg => mime::IMAGE_JPEG,
        ImageFormat::Gif => mime::IMAGE_GIF,
        ImageFormat::Bmp => mime::IMAGE_BMP,
        ImageFormat::WebP => "image/webp".parse().ok()?,
        ImageFormat::Tiff => "image/tiff".parse().ok()?,
        ImageFormat::Ico => "image/x-icon".parse().ok()?,
        _ => return None,
    };

    Some(mime)
}
