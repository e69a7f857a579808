//! COS client implementation using AWS S3 SDK

use crate::config::StorageConfig;
use crate::error::ConnectError;
use crate::provision::Connector;
use crate::store::{ObjectStore, PutObjectOutput, PutObjectRequest, StoreError};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{retry::RetryConfig, BehaviorVersion, Credentials, Region},
    error::{ProvideErrorMetadata, SdkError},
    operation::put_object::PutObjectError,
    primitives::ByteStream,
    Client,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use std::sync::Arc;
use tracing::debug;

/// COS bucket client. COS speaks the S3 protocol with virtual-hosted addressing.
pub struct CosStore {
    client: Client,
    region: String,
    host: String,
}

impl CosStore {
    /// Create a new COS client
    pub fn new(config: &StorageConfig) -> Result<Self, ConnectError> {
        let endpoint = config.endpoint();

        let uri: http::Uri = endpoint
            .parse()
            .map_err(|e| ConnectError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        let host = uri
            .host()
            .ok_or_else(|| ConnectError::InvalidEndpoint(format!("{} has no host", endpoint)))?;
        let host = match uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let credentials = Credentials::new(&config.secret_id, &config.secret_key, None, None, "cosup");

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(false)
            // Failures go straight back to the caller, never re-sent
            .retry_config(RetryConfig::disabled())
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            region: config.region.clone(),
            host,
        })
    }

    /// Location the store reports for `key`: `<bucket>.<host>/<key>`
    pub fn location_for(&self, bucket: &str, key: &str) -> String {
        format!("{}.{}/{}", bucket, self.host, key)
    }
}

#[async_trait]
impl ObjectStore for CosStore {
    async fn put_object(
        &self,
        request: PutObjectRequest<'_>,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PutObjectOutput, StoreError> {
        progress(0.0);

        let operation = self
            .client
            .put_object()
            .bucket(request.bucket)
            .key(request.key)
            .body(ByteStream::from(request.body.to_vec()))
            .content_length(request.body.len() as i64)
            .set_content_type(request.content_type.map(str::to_string));

        let response = if request.region == self.region {
            operation.send().await
        } else {
            debug!(region = request.region, "overriding client region for request");
            let region = Region::new(request.region.to_string());
            operation
                .customize()
                .config_override(aws_sdk_s3::config::Builder::default().region(region))
                .send()
                .await
        };

        let output = response.map_err(store_error)?;

        progress(1.0);

        Ok(PutObjectOutput {
            location: Some(self.location_for(request.bucket, request.key)),
            etag: output.e_tag().map(str::to_string),
        })
    }
}

/// Reduce an SDK failure to the store's error descriptor
fn store_error(err: SdkError<PutObjectError>) -> StoreError {
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => StoreError::network(message),
        _ => StoreError {
            code: err.code().map(str::to_string),
            status_code: err.raw_response().map(|response| response.status().as_u16()),
            network_code: None,
            message,
        },
    }
}

/// Builds [`CosStore`] clients
#[derive(Debug, Clone, Copy, Default)]
pub struct CosConnector;

#[async_trait]
impl Connector for CosConnector {
    async fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, ConnectError> {
        let store: Arc<dyn ObjectStore> = Arc::new(CosStore::new(config)?);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NETWORK_ERROR;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn make_config(endpoint: Option<&str>) -> StorageConfig {
        StorageConfig {
            secret_id: "AKIDexample".to_string(),
            secret_key: "secret".to_string(),
            bucket: "images-1250000000".to_string(),
            region: "ap-guangzhou".to_string(),
            endpoint: endpoint.map(str::to_string),
        }
    }

    #[test]
    fn test_location_uses_virtual_host() {
        let store = CosStore::new(&make_config(None)).unwrap();
        assert_eq!(
            store.location_for("images-1250000000", "avatars/a.png"),
            "images-1250000000.cos.ap-guangzhou.myqcloud.com/avatars/a.png"
        );
    }

    #[test]
    fn test_location_keeps_endpoint_port() {
        let store = CosStore::new(&make_config(Some("http://localhost:9000"))).unwrap();
        assert_eq!(store.location_for("b", "k"), "b.localhost:9000/k");
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let err = CosStore::new(&make_config(Some("not a url"))).err().unwrap();
        assert!(matches!(err, ConnectError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn test_connector_builds_store() {
        let store = CosConnector.connect(&make_config(None)).await;
        assert!(store.is_ok());
    }

    /// Answer every connection on a local port with the same response.
    /// Returns the endpoint and a count of requests served.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (endpoint, hits)
    }

    /// Consume the request head and a `Content-Length` body
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < head_end + length {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    async fn put(endpoint: &str) -> Result<PutObjectOutput, StoreError> {
        let store = CosStore::new(&make_config(Some(endpoint))).unwrap();
        let request = PutObjectRequest {
            bucket: "images-1250000000",
            region: "ap-guangzhou",
            key: "avatars/a.png",
            body: b"png",
            content_type: Some("image/png"),
        };
        store.put_object(request, &|_: f64| {}).await
    }

    #[tokio::test]
    async fn test_access_denied_keeps_code_and_status() {
        let (endpoint, hits) = serve(
            "403 Forbidden",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
        )
        .await;

        let err = put(&endpoint).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("AccessDenied"));
        assert_eq!(err.status_code, Some(403));
        assert_eq!(err.network_code, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let err = put("http://127.0.0.1:1").await.unwrap_err();
        assert_eq!(err.network_code.as_deref(), Some(NETWORK_ERROR));
        assert_eq!(err.code, None);
        assert_eq!(err.status_code, None);
    }

    #[tokio::test]
    async fn test_server_error_is_sent_once() {
        let (endpoint, hits) = serve(
            "500 Internal Server Error",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>InternalError</Code><Message>We encountered an internal error.</Message></Error>",
        )
        .await;

        let err = put(&endpoint).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("InternalError"));
        assert_eq!(err.status_code, Some(500));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
