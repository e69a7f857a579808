//! cosup-core - Core library for the cosup uploader
//!
//! This library uploads files to Tencent Cloud COS (or any S3 compatible store),
//! generating a unique object key per upload and sharing a single storage client
//! across every upload of the process.

pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod provision;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use client::{CosConnector, CosStore};
pub use config::{load_config, load_from_env, ConfigSource, ProcessEnv, StorageConfig};
pub use error::{
    ConfigError, ConnectError, Error, ProvisionError, Result, UploadCause, UploadError,
    UploadErrorKind,
};
pub use key::generate_key;
pub use provision::{ClientProvisioner, Connector};
pub use store::{ObjectStore, PutObjectOutput, PutObjectRequest, StoreError};
pub use upload::{
    upload_file, BoxError, Payload, ProgressCallback, UploadOptions, UploadResult, Uploader,
};
