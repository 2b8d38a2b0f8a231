pub mod config;
pub mod uploader;

pub use config::{
    ConfigError, HostEnvironment, LoadConfiguration, LogShipConfig, RetentionPolicy, UploadPolicy,
};
pub use uploader::{CloudUploader, UploadError, UploaderSlot};
