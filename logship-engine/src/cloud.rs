// Object-store uploader built on opendal, pluggable behind `CloudUploader`

pub mod object_store;
pub mod storage_config;

pub use object_store::ObjectStoreUploader;
pub use storage_config::{BackendConfig, CloudBackend, LocalBackend};
