use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::download::Downloader;
use crate::error::UploadError;
use crate::identifier::IdentifierGenerator;
use crate::processor::ProcessorSelector;
use crate::staging;
use crate::storage::{ImageKind, ImageStore, StoreDescriptor};

#[derive(Serialize, Debug)]
pub struct UploadInfo {
    /// Where the stored image can be retrieved from.
    pub link: String,

    /// The detected mime type of the image.
    pub mime: String,

    #[serde(rename = "type")]
    pub kind: String,

    /// The name the image was uploaded with, this is not the
    /// generated identifier.
    pub name: String,

    /// The stored size in bytes.
    pub size: u64,
}

pub struct UploadController {
    store: Arc<dyn ImageStore>,
    identifiers: IdentifierGenerator,
    downloader: Downloader,
    max_file_size: u64,
    max_dimension: Option<u32>,
}

impl UploadController {
    pub fn new(cfg: &RuntimeConfig, store: Arc<dyn ImageStore>) -> anyhow::Result<Self> {
        let identifiers = IdentifierGenerator::spawn(
            cfg.identifier_length,
            cfg.identifier_symbols(),
            store.clone(),
        );
        let downloader = Downloader::new(
            &cfg.user_agent,
            Duration::from_secs(cfg.download_timeout_secs),
        )?;

        Ok(Self {
            store,
            identifiers,
            downloader,
            max_file_size: cfg.max_file_size,
            max_dimension: cfg.max_dimension,
        })
    }

    #[inline]
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Stops handing out identifiers, any uploads after this fail.
    pub fn shutdown(&self) {
        self.identifiers.shutdown();
    }

    /// Runs a single upload through to storage.
    ///
    /// Each stage aborts the upload on failure. Saving is the last step
    /// that can fail, so a failed upload never leaves an object behind.
    pub async fn upload<S, E>(&self, body: S, display_name: String) -> Result<UploadInfo, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut upload = staging::stage(body, self.max_file_size).await?;

        let format = upload.detect_format().await?;
        let mime = upload.mime_type().ok_or(UploadError::UnknownMime)?;

        ProcessorSelector::for_upload(format, self.max_dimension)
            .run_blocking(upload.path().to_path_buf(), format)
            .await?;

        let name = self
            .identifiers
            .get()
            .await
            .map_err(UploadError::Identifier)?;

        let size = upload.size().await.map_err(UploadError::Metadata)?;

        let obj = StoreDescriptor::new(name, mime.essence_str(), ImageKind::Original);
        let obj = self.store.save(upload.path(), obj).await?;

        info!(
            "Stored {} ({}, {} bytes) in {} store",
            obj.name(),
            obj.mime_type(),
            size,
            self.store.backend_name(),
        );

        Ok(UploadInfo {
            link: obj.url().unwrap_or_default().to_string(),
            mime: obj.mime_type().to_string(),
            kind: obj.kind().to_string(),
            name: display_name,
            size,
        })
    }
}
