pub mod backends;
pub mod mapper;
pub mod template;

pub use backends::{connect_all, select_active};
pub use template::{ImageKind, ImageStore, StorageError, StoreDescriptor};
