use std::path::Path;

use async_trait::async_trait;
use strum::Display;
use thiserror::Error;

use crate::identifier::Identifier;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("an object named {0} already exists")]
    Collision(String),

    #[error("mapped path {0:?} escapes the store root")]
    InvalidPath(String),

    #[error("remote storage error: {0}")]
    Remote(String),

    #[error("unable to resolve storage credentials: {0}")]
    Credentials(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    /// The image as it was uploaded, after processing.
    Original,
}

/// Describes an image that is (or is about to be) held by a store.
#[derive(Debug, Clone)]
pub struct StoreDescriptor {
    name: Identifier,
    mime_type: String,
    kind: ImageKind,
    url: Option<String>,
}

impl StoreDescriptor {
    pub fn new(name: Identifier, mime_type: impl Into<String>, kind: ImageKind) -> Self {
        Self {
            name,
            mime_type: mime_type.into(),
            kind,
            url: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    #[inline]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[inline]
    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The retrieval link, only set once a store has saved the image.
    #[inline]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub(crate) fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }
}

#[async_trait]
pub trait ImageStore: Sync + Send + 'static {
    /// Checks if an object with the given name is already held by the store.
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Persists the file at `local_file` under the descriptor's name,
    /// returning the descriptor with its retrieval URL set.
    ///
    /// Saving over an existing object is a `StorageError::Collision`.
    async fn save(
        &self,
        local_file: &Path,
        obj: StoreDescriptor,
    ) -> Result<StoreDescriptor, StorageError>;

    /// A short name for the backend, used in logs.
    fn backend_name(&self) -> &'static str;
}
