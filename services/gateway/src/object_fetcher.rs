use crate::config::{BufferMode, S3Config};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::{ByteStream, ByteStreamError};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Read access to a key-addressed blob store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue a single GET for `bucket`/`key` and hand back the body stream
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, FetchError>;
}

/// `ObjectStore` backed by AWS S3 or an S3-compatible endpoint
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 store, taking credentials from the default provider chain
    pub async fn new(config: &S3Config, operation_timeout: Option<Duration>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(timeout) = operation_timeout {
            loader = loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            );
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint_url = ?config.endpoint_url,
            "S3 client initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, FetchError> {
        match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(output.body),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Err(FetchError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                } else {
                    Err(FetchError::Request {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        source: Box::new(e),
                    })
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },
    #[error("failed to get object s3://{bucket}/{key}")]
    Request {
        bucket: String,
        key: String,
        source: BoxError,
    },
    #[error("failed to read body of s3://{bucket}/{key}")]
    Body {
        bucket: String,
        key: String,
        source: ByteStreamError,
    },
    #[error("failed to buffer s3://{bucket}/{key} to a temporary file")]
    Spool {
        bucket: String,
        key: String,
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
#[error("failed to read back downloaded object")]
pub struct ReadPayloadError(#[from] std::io::Error);

/// A fully downloaded object body, owned by a single request
#[derive(Debug)]
pub enum Payload {
    Memory(Bytes),
    /// Anonymous temporary file positioned at its start; the OS removes it
    /// once the handle is dropped
    TempFile { file: tokio::fs::File, len: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Memory(bytes) => bytes.len() as u64,
            Payload::TempFile { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole payload into memory, releasing any backing file
    pub async fn into_bytes(self) -> Result<Bytes, ReadPayloadError> {
        match self {
            Payload::Memory(bytes) => Ok(bytes),
            Payload::TempFile { mut file, len } => {
                let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Downloads objects and drains them into a request-scoped buffer
#[derive(Clone)]
pub struct ObjectFetcher {
    store: Arc<dyn ObjectStore>,
    buffer_mode: BufferMode,
}

impl ObjectFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, buffer_mode: BufferMode) -> Self {
        Self { store, buffer_mode }
    }

    /// Fetch `bucket`/`key` in full.
    ///
    /// The body stream is dropped before this returns, whether or not the
    /// download succeeded. There is no retry; a failed read aborts the fetch.
    #[instrument(skip(self), fields(buffer_mode = ?self.buffer_mode))]
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<Payload, FetchError> {
        let body = self.store.get_object(bucket, key).await?;
        let payload = match self.buffer_mode {
            BufferMode::Memory => {
                let data = body.collect().await.map_err(|source| FetchError::Body {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    source,
                })?;
                Payload::Memory(data.into_bytes())
            }
            BufferMode::TempFile => spool_to_tempfile(body, bucket, key).await?,
        };
        debug!(size_bytes = payload.len(), "Object downloaded");
        Ok(payload)
    }
}

async fn spool_to_tempfile(
    mut body: ByteStream,
    bucket: &str,
    key: &str,
) -> Result<Payload, FetchError> {
    let spool_err = |source: std::io::Error| FetchError::Spool {
        bucket: bucket.to_string(),
        key: key.to_string(),
        source,
    };

    let mut file = tokio::fs::File::from_std(tempfile::tempfile().map_err(spool_err)?);
    let mut len = 0u64;
    while let Some(chunk) = body.try_next().await.map_err(|source| FetchError::Body {
        bucket: bucket.to_string(),
        key: key.to_string(),
        source,
    })? {
        file.write_all(&chunk).await.map_err(spool_err)?;
        len += chunk.len() as u64;
    }
    file.flush().await.map_err(spool_err)?;
    file.rewind().await.map_err(spool_err)?;
    Ok(Payload::TempFile { file, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "gps-bucket";
    const KEY: &str = "prefix/gps_data/dev/u1/v1/2024/April/15/gps_data.json";

    fn store_returning(body: &'static [u8]) -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_get_object()
            .withf(|bucket, key| bucket == BUCKET && key == KEY)
            .times(1)
            .returning(move |_, _| Ok(ByteStream::from_static(body)));
        store
    }

    #[tokio::test]
    async fn test_fetch_into_memory() {
        let fetcher = ObjectFetcher::new(
            Arc::new(store_returning(br#"{"lat":1,"lon":2}"#)),
            BufferMode::Memory,
        );
        let payload = fetcher.fetch(BUCKET, KEY).await.unwrap();
        assert!(matches!(payload, Payload::Memory(_)));
        assert_eq!(payload.len(), 17);
        assert_eq!(payload.into_bytes().await.unwrap(), &br#"{"lat":1,"lon":2}"#[..]);
    }

    #[tokio::test]
    async fn test_fetch_into_tempfile() {
        let fetcher = ObjectFetcher::new(
            Arc::new(store_returning(br#"{"lat":1,"lon":2}"#)),
            BufferMode::TempFile,
        );
        let payload = fetcher.fetch(BUCKET, KEY).await.unwrap();
        assert!(matches!(payload, Payload::TempFile { len: 17, .. }));
        assert_eq!(payload.into_bytes().await.unwrap(), &br#"{"lat":1,"lon":2}"#[..]);
    }

    #[tokio::test]
    async fn test_fetch_empty_object() {
        let fetcher = ObjectFetcher::new(Arc::new(store_returning(b"")), BufferMode::TempFile);
        let payload = fetcher.fetch(BUCKET, KEY).await.unwrap();
        assert!(payload.is_empty());
        assert!(payload.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_propagates_store_error() {
        let mut store = MockObjectStore::new();
        store.expect_get_object().times(1).returning(|bucket, key| {
            Err(FetchError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        });
        let fetcher = ObjectFetcher::new(Arc::new(store), BufferMode::Memory);
        let err = fetcher.fetch(BUCKET, "missing/key").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "object s3://gps-bucket/missing/key does not exist"
        );
    }

    #[tokio::test]
    async fn test_request_error_keeps_source() {
        let mut store = MockObjectStore::new();
        store.expect_get_object().returning(|bucket, key| {
            Err(FetchError::Request {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: "connection reset".into(),
            })
        });
        let fetcher = ObjectFetcher::new(Arc::new(store), BufferMode::TempFile);
        let err = fetcher.fetch(BUCKET, KEY).await.unwrap_err();
        assert!(!err.is_not_found());
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    /// Body that yields one chunk and then fails, like a connection dropped
    /// mid-transfer
    #[derive(Default)]
    struct TruncatedBody {
        sent_first_chunk: bool,
    }

    impl http_body::Body for TruncatedBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<http_body::Frame<Bytes>, Self::Error>>> {
            if self.sent_first_chunk {
                std::task::Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))))
            } else {
                self.sent_first_chunk = true;
                std::task::Poll::Ready(Some(Ok(http_body::Frame::data(Bytes::from_static(
                    br#"{"lat":"#,
                )))))
            }
        }
    }

    fn truncated_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_get_object().times(1).returning(|_, _| {
            Ok(ByteStream::new(aws_smithy_types::body::SdkBody::from_body_1_x(
                TruncatedBody::default(),
            )))
        });
        store
    }

    #[tokio::test]
    async fn test_body_failure_aborts_fetch() {
        for mode in [BufferMode::Memory, BufferMode::TempFile] {
            let fetcher = ObjectFetcher::new(Arc::new(truncated_store()), mode);
            let err = fetcher.fetch(BUCKET, KEY).await.unwrap_err();
            assert!(
                matches!(&err, FetchError::Body { bucket, key, .. } if bucket == BUCKET && key == KEY),
                "{mode:?}: {err:?}"
            );
            assert!(!err.is_not_found());
        }
    }
}
