use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::storage::mapper::NamePathMapper;
use crate::storage::template::{ImageStore, StorageError, StoreDescriptor};

pub struct FileSystemBackend {
    directory: PathBuf,
    url_prefix: String,
    mapper: NamePathMapper,
}

impl FileSystemBackend {
    pub fn new(dir: PathBuf, url_prefix: &str, mapper: NamePathMapper) -> Self {
        Self {
            directory: dir,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            mapper,
        }
    }

    #[inline]
    fn format_path(&self, name: &str) -> Result<(String, PathBuf), StorageError> {
        let relative = self.mapper.map(name);

        let is_contained = !relative.is_empty()
            && Path::new(&relative)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_contained {
            return Err(StorageError::InvalidPath(relative));
        }

        let path = self.directory.join(&relative);
        Ok((relative, path))
    }
}

#[async_trait]
impl ImageStore for FileSystemBackend {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let (_, path) = self.format_path(name)?;

        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn save(
        &self,
        local_file: &Path,
        obj: StoreDescriptor,
    ) -> Result<StoreDescriptor, StorageError> {
        let (relative, path) = self.format_path(obj.name().as_str())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Storing image @ {:?}", &path);
        let mut target = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Collision(obj.name().to_string()))
            },
            Err(other) => return Err(other.into()),
        };

        let copied = async {
            let mut source = tokio::fs::File::open(local_file).await?;
            tokio::io::copy(&mut source, &mut target).await?;
            target.flush().await?;
            target.sync_all().await
        }
        .await;

        if let Err(e) = copied {
            drop(target);
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partially written image @ {:?}: {}", &path, cleanup);
            }
            return Err(e.into());
        }

        let url = format!("{}/{}", self.url_prefix, relative);
        Ok(obj.with_url(url))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
