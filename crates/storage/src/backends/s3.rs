//! S3-compatible storage backend using the AWS SDK.
//!
//! Backblaze B2 exposes an S3-compatible API, so this backend covers both
//! plain S3 and B2 deployments. Keys are optionally namespaced with a prefix
//! and a public base URL can be configured to enable direct downloads.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream, ProgressFn};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use satoshisend_core::file_id;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Maximum range size for load_range operations (128 MiB).
const MAX_RANGE_SIZE: u64 = 128 * 1024 * 1024;

/// S3-compatible blob store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    public_url: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Explicit credentials take precedence; otherwise the ambient AWS
    /// credential chain (env vars, profiles, IMDS) is used.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        public_url: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()))
            .force_path_style(force_path_style);

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiration
                "satoshisend-config",
            );
            builder = builder.credentials_provider(credentials);
        } else {
            let chain = aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(aws_config::Region::new(resolved_region))
                .build()
                .await;
            builder = builder.credentials_provider(chain);
        }

        if let Some(endpoint_url) = endpoint {
            // Handle bare host:port endpoints by prepending https://
            let endpoint_lower = endpoint_url.to_lowercase();
            let normalized = if endpoint_lower.starts_with("http://")
                || endpoint_lower.starts_with("https://")
            {
                endpoint_url
            } else {
                format!("https://{endpoint_url}")
            };
            builder = builder.endpoint_url(normalized);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()),
            public_url: public_url.filter(|u| !u.is_empty()),
        })
    }

    /// Object key for an id, validating the grammar first.
    fn object_key(&self, id: &str) -> StorageResult<String> {
        file_id::validate_id(id).map_err(|e| StorageError::InvalidId(e.to_string()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), id),
            None => id.to_string(),
        })
    }
}

fn s3_err<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self, data, on_progress), fields(backend = "s3", size = data.len()))]
    async fn save(
        &self,
        id: &str,
        data: Bytes,
        on_progress: Option<ProgressFn>,
    ) -> StorageResult<u64> {
        let key = self.object_key(id)?;
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(s3_err)?;

        // A single PutObject has no intermediate progress to report.
        if let Some(cb) = &on_progress {
            cb(size, size as i64);
        }

        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn load(&self, id: &str) -> StorageResult<ByteStream> {
        let key = self.object_key(id)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if matches!(
                    e.as_service_error(),
                    Some(err) if err.is_no_such_key()
                ) {
                    StorageError::NotFound(id.to_string())
                } else {
                    s3_err(e)
                }
            })?;

        let reader = resp.body.into_async_read();
        let stream = ReaderStream::new(reader).map(|item| item.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn load_range(&self, id: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        if end - start > MAX_RANGE_SIZE {
            return Err(StorageError::InvalidRange(format!(
                "range size {} exceeds maximum {MAX_RANGE_SIZE} bytes",
                end - start
            )));
        }
        if end == start {
            return Ok(Bytes::new());
        }

        let key = self.object_key(id)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            // HTTP ranges are inclusive; ours are half-open.
            .range(format!("bytes={}-{}", start, end - 1))
            .send()
            .await
            .map_err(|e| {
                if matches!(
                    e.as_service_error(),
                    Some(err) if err.is_no_such_key()
                ) {
                    StorageError::NotFound(id.to_string())
                } else {
                    s3_err(e)
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(data.into_bytes())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat(&self, id: &str) -> StorageResult<u64> {
        let key = self.object_key(id)?;
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if matches!(
                    e.as_service_error(),
                    Some(err) if err.is_not_found()
                ) {
                    StorageError::NotFound(id.to_string())
                } else {
                    s3_err(e)
                }
            })?;

        let size = resp.content_length().unwrap_or(0);
        u64::try_from(size)
            .map_err(|_| StorageError::Config(format!("negative content length for {key}")))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        let key = self.object_key(id)?;
        // S3 DeleteObject succeeds for absent keys, so this is idempotent.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(())
    }

    fn public_url(&self, id: &str) -> Option<String> {
        let base = self.public_url.as_ref()?;
        let key = self.object_key(id).ok()?;
        Some(format!("{}/{}", base.trim_end_matches('/'), key))
    }

    fn supports_ranges(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(s3_err)?;
        Ok(())
    }
}
