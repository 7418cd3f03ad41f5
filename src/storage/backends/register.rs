use std::str::FromStr;
use std::sync::Arc;

use rusoto_core::credential::{EnvironmentProvider, ProvideAwsCredentials};
use rusoto_core::Region;

use crate::config::{LocalStoreConfig, RemoteStoreConfig, StoreConfig};
use crate::storage::mapper::NamePathMapper;
use crate::storage::template::{ImageStore, StorageError};

impl StoreConfig {
    pub async fn connect(&self) -> Result<Arc<dyn ImageStore>, StorageError> {
        let mapper = NamePathMapper::from_config(self.name_path())
            .map_err(|e| StorageError::Config(e.to_string()))?;

        match self {
            Self::Local(cfg) => connect_local(cfg, mapper).await,
            Self::Remote(cfg) => connect_remote(cfg, mapper).await,
        }
    }
}

async fn connect_local(
    cfg: &LocalStoreConfig,
    mapper: NamePathMapper,
) -> Result<Arc<dyn ImageStore>, StorageError> {
    tokio::fs::create_dir_all(&cfg.root).await.map_err(|e| {
        StorageError::Config(format!(
            "failed to create store directory {:?}: {}",
            &cfg.root, e
        ))
    })?;

    Ok(Arc::new(super::filesystem::FileSystemBackend::new(
        cfg.root.clone(),
        &cfg.url_prefix,
        mapper,
    )))
}

async fn connect_remote(
    cfg: &RemoteStoreConfig,
    mapper: NamePathMapper,
) -> Result<Arc<dyn ImageStore>, StorageError> {
    let region = match cfg.endpoint.as_ref() {
        Some(endpoint) => Region::Custom {
            name: cfg.region.clone(),
            endpoint: endpoint.clone(),
        },
        None => Region::from_str(&cfg.region)
            .map_err(|e| StorageError::Config(format!("unknown region {:?}: {}", &cfg.region, e)))?,
    };

    // Credentials are resolved once so a missing key fails startup
    // rather than the first upload.
    let credentials = EnvironmentProvider::default()
        .credentials()
        .await
        .map_err(|e| StorageError::Credentials(e.to_string()))?;

    let backend = super::blob_storage::BlobStorageBackend::new(
        cfg.bucket.clone(),
        region,
        &cfg.root,
        cfg.public_url.as_deref(),
        credentials,
        mapper,
    )?;

    Ok(Arc::new(backend))
}

/// Connects every configured store, preserving their order.
pub async fn connect_all(
    configs: &[StoreConfig],
) -> Result<Vec<Arc<dyn ImageStore>>, StorageError> {
    let mut stores = Vec::with_capacity(configs.len());
    for cfg in configs {
        let store = cfg.connect().await?;
        info!("Connected {} store #{}", store.backend_name(), stores.len());
        stores.push(store);
    }

    Ok(stores)
}

/// Picks the store uploads are written to and identifiers are checked against.
///
/// The other stores are kept connected but never receive writes.
pub fn select_active(
    mut stores: Vec<Arc<dyn ImageStore>>,
    index: usize,
) -> Result<Arc<dyn ImageStore>, StorageError> {
    if index >= stores.len() {
        return Err(StorageError::Config(format!(
            "active store {} does not exist, {} stores are configured",
            index,
            stores.len(),
        )));
    }

    for (i, store) in stores.iter().enumerate() {
        if i != index {
            warn!(
                "{} store #{} is configured but is not the active store, it will not receive uploads",
                store.backend_name(),
                i,
            );
        }
    }

    Ok(stores.swap_remove(index))
}
