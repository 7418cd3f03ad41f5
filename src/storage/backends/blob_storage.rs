use std::path::Path;

use async_trait::async_trait;
use rusoto_core::credential::{AwsCredentials, StaticProvider};
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_s3::{HeadObjectError, HeadObjectRequest, PutObjectRequest, S3Client, S3};

use crate::storage::mapper::NamePathMapper;
use crate::storage::template::{ImageStore, StorageError, StoreDescriptor};

pub struct BlobStorageBackend {
    client: S3Client,
    bucket: String,
    root: String,
    public_url: String,
    mapper: NamePathMapper,
}

impl BlobStorageBackend {
    pub fn new(
        bucket: String,
        region: Region,
        root: &str,
        public_url: Option<&str>,
        credentials: AwsCredentials,
        mapper: NamePathMapper,
    ) -> Result<Self, StorageError> {
        let http = HttpClient::new().map_err(|e| StorageError::Config(e.to_string()))?;
        let provider = StaticProvider::new(
            credentials.aws_access_key_id().to_string(),
            credentials.aws_secret_access_key().to_string(),
            credentials.token().clone(),
            None,
        );

        let public_url = match public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => default_public_url(&bucket, &region),
        };

        Ok(Self {
            client: S3Client::new_with(http, provider, region),
            bucket,
            root: root.trim_matches('/').to_string(),
            public_url,
            mapper,
        })
    }

    #[inline]
    fn format_key(&self, name: &str) -> String {
        let path = self.mapper.map(name);
        if self.root.is_empty() {
            path
        } else {
            format!("{}/{}", self.root, path)
        }
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StorageError> {
        let req = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.head_object(req).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(false),
            Err(RusotoError::Unknown(ref resp)) if resp.status == 404 => Ok(false),
            Err(other) => Err(StorageError::Remote(format!(
                "failed to probe {}/{}: {}",
                self.bucket, key, other
            ))),
        }
    }
}

/// The bucket's own URL for a given region.
///
/// Custom endpoints use path style addressing, AWS uses the virtual
/// hosted style.
fn default_public_url(bucket: &str, region: &Region) -> String {
    match region {
        Region::Custom { endpoint, .. } => {
            format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
        },
        other => format!("https://{}.s3.{}.amazonaws.com", bucket, other.name()),
    }
}

#[async_trait]
impl ImageStore for BlobStorageBackend {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let key = self.format_key(name);
        self.key_exists(&key).await
    }

    async fn save(
        &self,
        local_file: &Path,
        obj: StoreDescriptor,
    ) -> Result<StoreDescriptor, StorageError> {
        let key = self.format_key(obj.name().as_str());

        // The generator has already probed this name, but another
        // process may share the bucket.
        if self.key_exists(&key).await? {
            return Err(StorageError::Collision(obj.name().to_string()));
        }

        let data = tokio::fs::read(local_file).await?;
        let req = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.clone(),
            content_length: Some(data.len() as i64),
            content_type: Some(obj.mime_type().to_string()),
            body: Some(data.into()),
            ..Default::default()
        };

        debug!("Storing image in bucket @ {}", &key);
        self.client
            .put_object(req)
            .await
            .map_err(|e| StorageError::Remote(format!(
                "failed to upload {}/{}: {}",
                self.bucket, key, e
            )))?;

        let url = format!("{}/{}", self.public_url, key);
        Ok(obj.with_url(url))
    }

    fn backend_name(&self) -> &'static str {
        "blob_storage"
    }
}
