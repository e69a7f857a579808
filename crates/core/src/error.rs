//! Error types for cosup-core
//!
//! An upload only ever fails in one of two ways: the environment does not
//! carry a usable storage configuration ([`ConfigError`]), or the upload
//! itself went wrong ([`UploadError`]). Both are folded into [`Error`] so
//! callers can branch with a plain `match`.

use crate::store::{PutObjectOutput, StoreError};
use std::fmt;
use thiserror::Error;

/// Result type alias for cosup-core
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cosup-core
#[derive(Error, Debug)]
pub enum Error {
    /// The storage configuration is incomplete
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The upload failed
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, Error::Upload(_))
    }

    pub fn as_config(&self) -> Option<&ConfigError> {
        match self {
            Error::Config(err) => Some(err),
            Error::Upload(_) => None,
        }
    }

    pub fn as_upload(&self) -> Option<&UploadError> {
        match self {
            Error::Upload(err) => Some(err),
            Error::Config(_) => None,
        }
    }
}

/// Required configuration variables are absent or empty
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Missing required environment variables: {}", .missing.join(", "))]
pub struct ConfigError {
    missing: Vec<&'static str>,
}

impl ConfigError {
    pub fn new(missing: Vec<&'static str>) -> Self {
        Self { missing }
    }

    /// Names of every missing variable, in lookup order
    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }
}

/// Failure to build the storage client from a loaded configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("{0}")]
    Other(String),
}

/// Failure to obtain the shared storage client
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// What went wrong during an upload. Determines the human readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    EmptyPayload,
    PayloadTooLarge,
    TypeNotAllowed,
    ClientInit,
    MalformedResponse,
    BucketMissing,
    PermissionDenied,
    ResourceMismatch,
    Network,
    Failed,
}

impl UploadErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            UploadErrorKind::EmptyPayload => "empty payload",
            UploadErrorKind::PayloadTooLarge => "payload too large",
            UploadErrorKind::TypeNotAllowed => "file type not allowed",
            UploadErrorKind::ClientInit => "failed to initialize storage client",
            UploadErrorKind::MalformedResponse => "malformed success response",
            UploadErrorKind::BucketMissing => "bucket missing",
            UploadErrorKind::PermissionDenied => "permission error",
            UploadErrorKind::ResourceMismatch => "resource/config mismatch",
            UploadErrorKind::Network => "network failure",
            UploadErrorKind::Failed => "upload failed",
        }
    }

    /// Suggested fix, shown by front ends next to the message
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            UploadErrorKind::BucketMissing => Some("check that COS_BUCKET exists in COS_REGION"),
            UploadErrorKind::PermissionDenied => {
                Some("check that COS_SECRET_ID and COS_SECRET_KEY may write to the bucket")
            }
            UploadErrorKind::ResourceMismatch => Some("check the COS_BUCKET and COS_REGION pair"),
            UploadErrorKind::Network => Some("check the network connection"),
            _ => None,
        }
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Underlying failure attached to an [`UploadError`]
#[derive(Error, Debug)]
pub enum UploadCause {
    /// Error descriptor reported by the object store
    #[error(transparent)]
    Store(StoreError),

    /// The storage client could not be built
    #[error(transparent)]
    Connect(ConnectError),

    /// The store reported success without a location
    #[error("store response carried no location: {0:?}")]
    MalformedResponse(PutObjectOutput),
}

/// An upload failed
#[derive(Error, Debug)]
#[error("{message}")]
pub struct UploadError {
    kind: UploadErrorKind,
    message: String,
    #[source]
    cause: Option<UploadCause>,
}

impl UploadError {
    pub fn new(kind: UploadErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            cause: None,
        }
    }

    pub fn with_detail(kind: UploadErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            message: format!("{}: {}", kind.message(), detail),
            cause: None,
        }
    }

    pub fn with_cause(kind: UploadErrorKind, cause: UploadCause) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            cause: Some(cause),
        }
    }

    pub fn kind(&self) -> UploadErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&UploadCause> {
        self.cause.as_ref()
    }

    /// The store's own error descriptor, unchanged, when the store rejected the upload
    pub fn store_error(&self) -> Option<&StoreError> {
        match &self.cause {
            Some(UploadCause::Store(err)) => Some(err),
            _ => None,
        }
    }
}
