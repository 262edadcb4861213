//! # S3 object store for Surveyor
//!
//! Implements [`surveyor::ObjectStore`] over Amazon S3 or S3-compatible
//! object storage. Result artifacts and summaries are plain objects under
//! a configurable key prefix; `list_prefix` paginates with continuation
//! tokens internally so callers always see the full result set.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surveyor_s3_store::S3ObjectStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = S3ObjectStore::new("surveyor-artifacts").await?;
//!     let summaries = store.list_prefix("live/summaries/").await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use surveyor::{ObjectMeta, ObjectStore};
use tracing::{debug, info};

/// Errors from the S3 store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum S3StoreError {
    /// AWS configuration or connection failure.
    #[error("s3 connection error: {0}")]
    Connection(String),

    /// A get/put/list operation failed.
    #[error("s3 operation error: {0}")]
    Operation(String),
}

impl From<S3StoreError> for surveyor::Error {
    fn from(err: S3StoreError) -> Self {
        surveyor::Error::Store(err.to_string())
    }
}

/// S3-backed [`ObjectStore`].
///
/// Keys passed by the orchestrator (`live/...`) are stored under an
/// optional bucket-level prefix so several deployments can share one
/// bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3ObjectStore {
    /// Create a store using the default AWS configuration chain.
    ///
    /// # Errors
    ///
    /// Returns [`S3StoreError::Connection`] when configuration loading
    /// fails.
    pub async fn new(bucket: &str) -> Result<Self, S3StoreError> {
        info!(bucket = %bucket, "initializing s3 object store");
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: None,
        })
    }

    /// Create a store with a custom client (`MinIO`, `LocalStack`, tests).
    #[must_use]
    pub fn with_client(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: None,
        }
    }

    /// Prepend a bucket-level prefix to every key.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = if prefix.is_empty() {
            None
        } else {
            Some(prefix.trim_matches('/').to_string())
        };
        self
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .map_or(key, |rest| rest.trim_start_matches('/')),
            None => key,
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> surveyor::Result<Option<Bytes>> {
        let full_key = self.full_key(key);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(output) => {
                let body = output.body.collect().await.map_err(|e| {
                    surveyor::Error::from(S3StoreError::Operation(format!(
                        "failed to read body of {full_key}: {e}"
                    )))
                })?;
                Ok(Some(body.into_bytes()))
            }
            Err(e) => {
                if e.to_string().contains("NoSuchKey")
                    || e.as_service_error().map_or(false, |se| se.is_no_such_key())
                {
                    debug!(key = %full_key, "object not found");
                    Ok(None)
                } else {
                    Err(S3StoreError::Operation(format!("get {full_key}: {e}")).into())
                }
            }
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> surveyor::Result<()> {
        let full_key = self.full_key(key);
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(body.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| S3StoreError::Operation(format!("put {full_key}: {e}")))?;
        debug!(key = %full_key, size, "object written");
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> surveyor::Result<Vec<ObjectMeta>> {
        let full_prefix = self.full_key(prefix);
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| S3StoreError::Operation(format!("list {full_prefix}: {e}")))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                entries.push(ObjectMeta {
                    key: self.strip_prefix(key).to_string(),
                    last_modified: object.last_modified().and_then(to_chrono),
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix = %full_prefix, count = entries.len(), "listed objects");
        Ok(entries)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_prefix(prefix: &str) -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        S3ObjectStore::with_client(Client::from_conf(config), "bucket").with_prefix(prefix)
    }

    #[test]
    fn keys_gain_and_lose_the_bucket_prefix() {
        let store = store_with_prefix("deploy/eu");
        assert_eq!(
            store.full_key("live/summaries/a.json"),
            "deploy/eu/live/summaries/a.json"
        );
        assert_eq!(
            store.strip_prefix("deploy/eu/live/summaries/a.json"),
            "live/summaries/a.json"
        );
    }

    #[test]
    fn empty_prefix_is_identity() {
        let store = store_with_prefix("");
        assert_eq!(store.full_key("live/x.json"), "live/x.json");
        assert_eq!(store.strip_prefix("live/x.json"), "live/x.json");
    }

    #[test]
    fn smithy_timestamps_convert() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_714_521_600);
        let converted = to_chrono(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_714_521_600);
    }
}
