//! Object store capability used by the upload pipeline

use async_trait::async_trait;
use thiserror::Error;

/// Network error code reported when the request never reached the store
pub const NETWORK_ERROR: &str = "NetworkError";

/// A single put-object call
#[derive(Debug, Clone, Copy)]
pub struct PutObjectRequest<'a> {
    pub bucket: &'a str,
    pub region: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub content_type: Option<&'a str>,
}

/// Success descriptor returned by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    /// Host and path of the stored object, without scheme
    pub location: Option<String>,
    pub etag: Option<String>,
}

impl PutObjectOutput {
    pub fn located(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            etag: None,
        }
    }
}

/// Error descriptor returned by the store
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    /// Service error code, e.g. `NoSuchBucket` or `AccessDenied`
    pub code: Option<String>,
    /// HTTP status of the response, when one was received
    pub status_code: Option<u16>,
    /// Transport level code, [`NETWORK_ERROR`] when no response was received
    pub network_code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            network_code: Some(NETWORK_ERROR.to_string()),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// Remote key-addressed binary storage
///
/// Implementations must be safe to share between concurrent uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `request.body` under `request.key`.
    ///
    /// `progress` receives the completed fraction, between 0.0 and 1.0.
    async fn put_object(
        &self,
        request: PutObjectRequest<'_>,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> std::result::Result<PutObjectOutput, StoreError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Request as seen by [`ScriptedStore`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedPut {
        pub bucket: String,
        pub region: String,
        pub key: String,
        pub size: usize,
        pub content_type: Option<String>,
    }

    /// Store that replays a fixed progress sequence and outcome
    pub struct ScriptedStore {
        progress: Vec<f64>,
        outcome: std::result::Result<PutObjectOutput, StoreError>,
        pub requests: Mutex<Vec<RecordedPut>>,
    }

    impl ScriptedStore {
        pub fn succeeding(location: &str) -> Self {
            Self::with_outcome(Ok(PutObjectOutput::located(location)))
        }

        pub fn failing(err: StoreError) -> Self {
            Self::with_outcome(Err(err))
        }

        pub fn with_outcome(outcome: std::result::Result<PutObjectOutput, StoreError>) -> Self {
            Self {
                progress: Vec::new(),
                outcome,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn reporting(mut self, progress: &[f64]) -> Self {
            self.progress = progress.to_vec();
            self
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn put_object(
            &self,
            request: PutObjectRequest<'_>,
            progress: &(dyn Fn(f64) + Send + Sync),
        ) -> std::result::Result<PutObjectOutput, StoreError> {
            self.requests.lock().unwrap().push(RecordedPut {
                bucket: request.bucket.to_string(),
                region: request.region.to_string(),
                key: request.key.to_string(),
                size: request.body.len(),
                content_type: request.content_type.map(str::to_string),
            });
            for fraction in &self.progress {
                progress(*fraction);
            }
            self.outcome.clone()
        }
    }
}
