//! The upload pipeline: validate, derive a key, put the object, translate the outcome

use crate::error::{Error, ProvisionError, Result, UploadCause, UploadError, UploadErrorKind};
use crate::key::generate_key;
use crate::provision::ClientProvisioner;
use crate::store::{PutObjectOutput, PutObjectRequest, StoreError, NETWORK_ERROR};
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Size limit applied when the caller does not set one (100 MiB)
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Error type progress callbacks may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Caller supplied progress callback, invoked with a 0-100 percentage
pub type ProgressCallback = Arc<dyn Fn(u8) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Bytes to upload, with what is known about them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl Payload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            file_name: None,
            content_type: None,
        }
    }

    /// Read a local file, keeping its name and guessing its type from the extension
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let content_type = mime_guess::from_path(path).first().map(|mime| mime.to_string());

        Ok(Self {
            data,
            file_name,
            content_type,
        })
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref().filter(|name| !name.is_empty())
    }

    /// Declared MIME type
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref().filter(|mime| !mime.is_empty())
    }

    /// Declared MIME type, or one guessed from the file name
    pub fn effective_content_type(&self) -> Option<String> {
        self.content_type().map(str::to_string).or_else(|| {
            self.file_name()
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|mime| mime.to_string())
        })
    }
}

/// What to upload and how
#[derive(Clone)]
pub struct UploadOptions {
    pub payload: Payload,
    /// Key prefix, e.g. `images/`. Prepended as-is.
    pub folder: Option<String>,
    pub on_progress: Option<ProgressCallback>,
    /// Stem placed before the unique part of the key
    pub custom_name: Option<String>,
    /// Largest accepted payload in bytes, [`DEFAULT_MAX_SIZE`] when unset
    pub max_size: Option<u64>,
    /// Accepted MIME types. Unset or empty accepts everything.
    pub allowed_types: Option<Vec<String>>,
}

impl UploadOptions {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            folder: None,
            on_progress: None,
            custom_name: None,
            max_size: None,
            allowed_types: None,
        }
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("size", &self.payload.len())
            .field("file_name", &self.payload.file_name())
            .field("folder", &self.folder)
            .field("custom_name", &self.custom_name)
            .field("max_size", &self.max_size)
            .field("allowed_types", &self.allowed_types)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// Public HTTPS URL of the object
    pub url: String,
    pub key: String,
    /// Location as reported by the store
    pub location: String,
}

/// Uploads payloads through a shared storage client
#[derive(Debug, Clone)]
pub struct Uploader {
    provisioner: Arc<ClientProvisioner>,
}

impl Uploader {
    pub fn new(provisioner: Arc<ClientProvisioner>) -> Self {
        Self { provisioner }
    }

    /// Uploader backed by the process-wide provisioner
    pub fn global() -> Self {
        Self::new(ClientProvisioner::global())
    }

    pub fn provisioner(&self) -> &ClientProvisioner {
        &self.provisioner
    }

    /// Upload `options.payload` under a freshly generated key
    ///
    /// Fails with [`Error::Config`] when the storage configuration is
    /// incomplete and [`Error::Upload`] for everything else.
    pub async fn upload(&self, options: &UploadOptions) -> Result<UploadResult> {
        validate(options)?;

        let key = generate_key(
            &options.payload,
            options.custom_name.as_deref(),
            options.folder.as_deref(),
        );
        debug!(%key, size = options.payload.len(), "derived object key");

        let config = self.provisioner.load_config()?;
        let client = self.provisioner.client().await.map_err(|err| match err {
            ProvisionError::Config(err) => Error::Config(err),
            ProvisionError::Connect(err) => {
                UploadError::with_cause(UploadErrorKind::ClientInit, UploadCause::Connect(err)).into()
            }
        })?;

        let content_type = options.payload.effective_content_type();
        let request = PutObjectRequest {
            bucket: &config.bucket,
            region: &config.region,
            key: &key,
            body: options.payload.data(),
            content_type: content_type.as_deref(),
        };

        let progress = ProgressAdapter {
            key: &key,
            callback: options.on_progress.as_ref(),
        };
        let report = |fraction: f64| progress.report(fraction);

        let outcome = client.put_object(request, &report).await;
        translate(key.clone(), outcome)
    }
}

/// Upload through the process-wide provisioner
pub async fn upload_file(options: &UploadOptions) -> Result<UploadResult> {
    Uploader::global().upload(options).await
}

fn validate(options: &UploadOptions) -> std::result::Result<(), UploadError> {
    let payload = &options.payload;

    if payload.is_empty() {
        return Err(UploadError::new(UploadErrorKind::EmptyPayload));
    }

    let limit = options.max_size.unwrap_or(DEFAULT_MAX_SIZE);
    if payload.len() as u64 > limit {
        return Err(UploadError::with_detail(
            UploadErrorKind::PayloadTooLarge,
            format!("{} bytes exceeds the {} byte limit", payload.len(), limit),
        ));
    }

    if let Some(allowed) = options.allowed_types.as_ref().filter(|types| !types.is_empty()) {
        let content_type = payload.effective_content_type();
        let accepted = content_type
            .as_deref()
            .map(|mime| allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(mime)))
            .unwrap_or(false);

        if !accepted {
            return Err(UploadError::with_detail(
                UploadErrorKind::TypeNotAllowed,
                format!(
                    "{} is not one of {}",
                    content_type.as_deref().unwrap_or("unknown type"),
                    allowed.join(", ")
                ),
            ));
        }
    }

    Ok(())
}

/// Forwards store progress to the caller as whole percentages
struct ProgressAdapter<'a> {
    key: &'a str,
    callback: Option<&'a ProgressCallback>,
}

impl ProgressAdapter<'_> {
    /// Failures inside the callback are logged and dropped
    fn report(&self, fraction: f64) {
        let Some(callback) = self.callback else {
            return;
        };
        let percent = to_percent(fraction);

        match panic::catch_unwind(AssertUnwindSafe(|| callback(percent))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(key = self.key, percent, error = %err, "progress callback failed");
            }
            Err(_) => {
                warn!(key = self.key, percent, "progress callback panicked");
            }
        }
    }
}

/// Round a completed fraction to a percentage in 0..=100
pub fn to_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Classify a store failure, first match wins
pub fn classify(err: &StoreError) -> UploadErrorKind {
    let code = err.code.as_deref();

    if code == Some("NoSuchBucket") {
        UploadErrorKind::BucketMissing
    } else if code == Some("AccessDenied") || err.status_code == Some(403) {
        UploadErrorKind::PermissionDenied
    } else if err.status_code == Some(404) {
        UploadErrorKind::ResourceMismatch
    } else if err.network_code.as_deref() == Some(NETWORK_ERROR) || code == Some(NETWORK_ERROR) {
        UploadErrorKind::Network
    } else {
        UploadErrorKind::Failed
    }
}

fn translate(
    key: String,
    outcome: std::result::Result<PutObjectOutput, StoreError>,
) -> Result<UploadResult> {
    let output = match outcome {
        Ok(output) => output,
        Err(err) => {
            let kind = classify(&err);
            warn!(%key, code = ?err.code, status = ?err.status_code, "upload failed: {}", kind);
            return Err(UploadError::with_cause(kind, UploadCause::Store(err)).into());
        }
    };

    let location = match output.location.clone().filter(|location| !location.is_empty()) {
        Some(location) => location,
        None => {
            warn!(%key, "store reported success without a location");
            return Err(UploadError::with_cause(
                UploadErrorKind::MalformedResponse,
                UploadCause::MalformedResponse(output),
            )
            .into());
        }
    };

    info!(%key, %location, "upload complete");

    Ok(UploadResult {
        url: format!("https://{}", location),
        key,
        location,
    })
}
