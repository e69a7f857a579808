//! Storage configuration, loaded from the process environment

use crate::error::ConfigError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Identity credential
pub const SECRET_ID_VAR: &str = "COS_SECRET_ID";

/// Secret credential
pub const SECRET_KEY_VAR: &str = "COS_SECRET_KEY";

/// Bucket name, including the app id suffix (e.g. `images-1250000000`)
pub const BUCKET_VAR: &str = "COS_BUCKET";

/// Region (e.g. `ap-guangzhou`)
pub const REGION_VAR: &str = "COS_REGION";

/// Optional endpoint override
pub const ENDPOINT_VAR: &str = "COS_ENDPOINT";

/// Variables that must be set and non-empty, in reporting order
pub const REQUIRED_VARS: [&str; 4] = [SECRET_ID_VAR, SECRET_KEY_VAR, BUCKET_VAR, REGION_VAR];

/// Where configuration values come from
pub trait ConfigSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Object store configuration
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    pub secret_id: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl StorageConfig {
    /// Endpoint the client talks to, derived from the region unless overridden
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://cos.{}.myqcloud.com", self.region))
    }

    /// Secret key safe to print
    pub fn masked_secret_key(&self) -> String {
        mask_secret(&self.secret_key)
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &self.masked_secret_key())
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Keep the first four characters of long secrets, hide the rest
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() > 8 {
        let head: String = secret.chars().take(4).collect();
        format!("{}****", head)
    } else {
        "****".to_string()
    }
}

/// Load the storage configuration from `source`
///
/// Every required variable is checked before failing, so the error names all
/// of the missing ones at once.
pub fn load_config(source: &dyn ConfigSource) -> Result<StorageConfig, ConfigError> {
    let read = |name: &str| {
        source
            .var(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    match (
        read(SECRET_ID_VAR),
        read(SECRET_KEY_VAR),
        read(BUCKET_VAR),
        read(REGION_VAR),
    ) {
        (Some(secret_id), Some(secret_key), Some(bucket), Some(region)) => Ok(StorageConfig {
            secret_id,
            secret_key,
            bucket,
            region,
            endpoint: read(ENDPOINT_VAR),
        }),
        (secret_id, secret_key, bucket, region) => {
            let present = [
                secret_id.is_some(),
                secret_key.is_some(),
                bucket.is_some(),
                region.is_some(),
            ];
            let missing = REQUIRED_VARS
                .iter()
                .zip(present)
                .filter(|(_, present)| !present)
                .map(|(name, _)| *name)
                .collect();
            Err(ConfigError::new(missing))
        }
    }
}

/// Load the storage configuration from the process environment
pub fn load_from_env() -> Result<StorageConfig, ConfigError> {
    load_config(&ProcessEnv)
}
