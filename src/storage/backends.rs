pub mod blob_storage;
pub mod filesystem;
mod register;

pub use register::{connect_all, select_active};
