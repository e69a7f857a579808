//! Shared storage client provisioning

use crate::client::CosConnector;
use crate::config::{self, ConfigSource, ProcessEnv, StorageConfig};
use crate::error::{ConfigError, ConnectError, ProvisionError};
use crate::store::ObjectStore;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::debug;

/// Builds an object store client from a loaded configuration
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, ConnectError>;
}

/// Owns the single storage client shared by every upload.
///
/// The client is built on first use and kept for the lifetime of the
/// provisioner. Configuration changes after that point are not picked up.
pub struct ClientProvisioner {
    source: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    client: OnceCell<Arc<dyn ObjectStore>>,
}

impl ClientProvisioner {
    pub fn new(source: impl ConfigSource + 'static, connector: impl Connector + 'static) -> Self {
        Self {
            source: Arc::new(source),
            connector: Arc::new(connector),
            client: OnceCell::new(),
        }
    }

    /// Provisioner reading the process environment and talking to COS
    pub fn from_env() -> Self {
        Self::new(ProcessEnv, CosConnector)
    }

    /// Process-wide provisioner used by [`crate::upload_file`]
    pub fn global() -> Arc<ClientProvisioner> {
        static GLOBAL: OnceLock<Arc<ClientProvisioner>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ClientProvisioner::from_env())))
    }

    /// Load the configuration from this provisioner's source
    pub fn load_config(&self) -> Result<StorageConfig, ConfigError> {
        config::load_config(self.source.as_ref())
    }

    /// Get the shared client, building it on first call.
    ///
    /// Concurrent first callers wait for a single initialization. A failed
    /// initialization leaves nothing behind, so the next call tries again.
    pub async fn client(&self) -> Result<Arc<dyn ObjectStore>, ProvisionError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let config = self.load_config()?;
                debug!(bucket = %config.bucket, region = %config.region, "provisioning storage client");
                let client = self.connector.connect(&config).await?;
                Ok::<_, ProvisionError>(client)
            })
            .await?;

        Ok(Arc::clone(client))
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }
}

impl fmt::Debug for ClientProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProvisioner")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BUCKET_VAR, REGION_VAR, SECRET_ID_VAR, SECRET_KEY_VAR};
    use crate::store::testing::ScriptedStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector that counts how often it is asked for a client
    #[derive(Default)]
    struct CountingConnector {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, ConnectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(ConnectError::Other("boom".to_string()));
            }
            let store: Arc<dyn ObjectStore> = Arc::new(ScriptedStore::succeeding("b.example.com/k"));
            Ok(store)
        }
    }

    fn make_source() -> HashMap<String, String> {
        [SECRET_ID_VAR, SECRET_KEY_VAR, BUCKET_VAR, REGION_VAR]
            .into_iter()
            .map(|name| (name.to_string(), format!("{}-value", name.to_lowercase())))
            .collect()
    }

    #[tokio::test]
    async fn test_client_is_a_singleton() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            calls: Arc::clone(&calls),
            fail: false,
        };
        let provisioner = ClientProvisioner::new(make_source(), connector);
        assert!(!provisioner.is_initialized());

        let first = provisioner.client().await.unwrap();
        let second = provisioner.client().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(provisioner.is_initialized());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            calls: Arc::clone(&calls),
            fail: false,
        };
        let provisioner = Arc::new(ClientProvisioner::new(make_source(), connector));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provisioner = Arc::clone(&provisioner);
                tokio::spawn(async move { provisioner.client().await.unwrap() })
            })
            .collect();

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    }

    #[tokio::test]
    async fn test_missing_config_is_reported() {
        let mut source = make_source();
        source.remove(BUCKET_VAR);
        let provisioner = ClientProvisioner::new(source, CountingConnector::default());

        let err = provisioner.client().await.err().unwrap();
        match err {
            ProvisionError::Config(err) => assert_eq!(err.missing(), &[BUCKET_VAR]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!provisioner.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried_on_next_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = CountingConnector {
            calls: Arc::clone(&calls),
            fail: true,
        };
        let provisioner = ClientProvisioner::new(make_source(), connector);

        assert!(matches!(
            provisioner.client().await,
            Err(ProvisionError::Connect(_))
        ));
        assert!(provisioner.client().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
