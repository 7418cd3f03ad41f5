use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::identifier::name_space;

/// Fewer possible identifiers than this is treated as a misconfiguration.
pub const MIN_IDENTIFIER_SPACE: u128 = 100_000;

pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_port")]
    /// The port to serve on.
    ///
    /// This is overridden by the `PORT` environment variable when set.
    pub port: u16,

    #[serde(default = "default_user_agent")]
    /// The `User-Agent` header sent when fetching images from a remote URL.
    pub user_agent: String,

    #[serde(default = "default_identifier_length")]
    /// The length of every generated identifier.
    pub identifier_length: usize,

    #[serde(default = "default_alphabet")]
    /// The set of characters identifiers are drawn from.
    pub identifier_alphabet: String,

    #[serde(default = "default_max_file_size")]
    /// The maximum accepted size of an upload in bytes.
    ///
    /// Defaults to 20MB.
    pub max_file_size: u64,

    #[serde(default)]
    /// Images with a width or height larger than this are downscaled
    /// to fit within it before being stored.
    ///
    /// Defaults to `None` which stores images at their original dimensions.
    pub max_dimension: Option<u32>,

    #[serde(default = "default_download_timeout")]
    /// The total time in seconds a remote download may take.
    pub download_timeout_secs: u64,

    #[serde(default)]
    /// The index into `stores` of the store that uploads are saved to
    /// and identifiers are checked against.
    ///
    /// Any other configured stores are still connected at startup, which
    /// validates their credentials, but they are never written to.
    pub active_store: usize,

    /// The set of storage backends.
    pub stores: Vec<StoreConfig>,
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_str(&data)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The distinct characters of the identifier alphabet, in the order
    /// they first appear.
    pub fn identifier_symbols(&self) -> Vec<char> {
        let mut symbols: Vec<char> = Vec::with_capacity(self.identifier_alphabet.len());
        for c in self.identifier_alphabet.chars() {
            if !symbols.contains(&c) {
                symbols.push(c);
            }
        }
        symbols
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identifier_length == 0 {
            return Err(ConfigError::Invalid(
                "identifier_length must be greater than 0".into(),
            ));
        }

        let symbols = self.identifier_symbols();
        if symbols.len() < 2 {
            return Err(ConfigError::Invalid(
                "identifier_alphabet must contain at least 2 distinct characters".into(),
            ));
        }

        let space = name_space(self.identifier_length, symbols.len());
        if space < MIN_IDENTIFIER_SPACE {
            return Err(ConfigError::Invalid(format!(
                "identifier_length {} with {} distinct characters only allows {} identifiers, \
                at least {} are required",
                self.identifier_length,
                symbols.len(),
                space,
                MIN_IDENTIFIER_SPACE,
            )));
        }

        if self.stores.is_empty() {
            return Err(ConfigError::Invalid("at least one store must be configured".into()));
        }

        if self.active_store >= self.stores.len() {
            return Err(ConfigError::Invalid(format!(
                "active_store {} is out of range, only {} stores are configured",
                self.active_store,
                self.stores.len(),
            )));
        }

        for store in self.stores.iter() {
            let name_path = store.name_path();
            Regex::new(&name_path.pattern).map_err(|e| {
                ConfigError::Invalid(format!(
                    "name_path pattern {:?} is not a valid regex: {}",
                    name_path.pattern, e
                ))
            })?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum StoreConfig {
    /// Images are written to a directory on the local filesystem.
    Local(LocalStoreConfig),

    /// Images are uploaded to an S3 compatible bucket.
    Remote(RemoteStoreConfig),
}

impl StoreConfig {
    pub fn name_path(&self) -> &NamePathConfig {
        match self {
            Self::Local(cfg) => &cfg.name_path,
            Self::Remote(cfg) => &cfg.name_path,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStoreConfig {
    /// The directory images are stored under.
    pub root: PathBuf,

    #[serde(default)]
    /// Prefixed to the mapped path to form the returned link.
    ///
    /// Defaults to an empty prefix, producing a root-relative link.
    pub url_prefix: String,

    #[serde(default)]
    pub name_path: NamePathConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStoreConfig {
    /// The AWS region name, e.g. `eu-west-2`.
    pub region: String,

    /// The bucket to upload into.
    pub bucket: String,

    #[serde(default)]
    /// A key prefix inside the bucket.
    pub root: String,

    #[serde(default)]
    /// A custom endpoint for S3 compatible services.
    ///
    /// When set the region name is only used for request signing.
    pub endpoint: Option<String>,

    #[serde(default)]
    /// The base of the returned links, e.g. a CDN in front of the bucket.
    ///
    /// Defaults to the bucket's own URL.
    pub public_url: Option<String>,

    #[serde(default)]
    pub name_path: NamePathConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamePathConfig {
    /// A regex applied to the identifier.
    pub pattern: String,

    /// The path template, expanded with the pattern's capture groups.
    ///
    /// `$0` is the whole match, `$1` the first group and `${name}` a
    /// named group.
    pub template: String,
}

impl Default for NamePathConfig {
    fn default() -> Self {
        Self {
            pattern: r"^(\w)(\w).*$".to_string(),
            template: "$1/$2/$0".to_string(),
        }
    }
}

const fn default_port() -> u16 {
    8080
}

fn default_user_agent() -> String {
    concat!("picstash/", env!("CARGO_PKG_VERSION")).to_string()
}

const fn default_identifier_length() -> usize {
    7
}

fn default_alphabet() -> String {
    DEFAULT_ALPHABET.to_string()
}

const fn default_max_file_size() -> u64 {
    20 * 1024 * 1024
}

const fn default_download_timeout() -> u64 {
    30
}
