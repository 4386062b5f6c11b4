//! Abstractions over S3-compatible storage backends used for raw order extracts and
//! partitioned parquet output.

mod local;
mod location;
mod memory;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub use local::LocalBucketStore;
pub use location::ObjectLocation;
pub use memory::MemoryBucketStore;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::NotFound(_))
    }
}

/// Read/write capability over object storage. Every call names the full location,
/// so one store can serve the source bucket and the destination bucket of a run.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;
    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, BucketError>;
    /// Keys (not URIs) under the location's key prefix, sorted.
    async fn list_prefix(&self, location: &ObjectLocation) -> Result<Vec<String>, BucketError>;
    /// Server-side copy within the store; `to` is replaced if it exists.
    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<(), BucketError>;
    /// Deleting a missing object is not an error.
    async fn delete_object(&self, location: &ObjectLocation) -> Result<(), BucketError>;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
}

impl S3BucketStore {
    pub async fn new(config: S3Config) -> Result<Self, BucketError> {
        if config.region.is_empty() {
            return Err(BucketError::Configuration("region cannot be empty".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "static",
            );
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        debug!(location = %location, size = bytes.len(), "uploading object");
        self.client
            .put_object()
            .bucket(location.bucket())
            .key(location.key())
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(location.bucket())
            .key(location.key())
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    if service_err.err().is_no_such_key() {
                        return BucketError::NotFound(location.to_string());
                    }
                    let message = service_err.err().to_string();
                    if message.contains("NoSuchKey") || message.contains("NoSuchBucket") {
                        BucketError::NotFound(location.to_string())
                    } else {
                        BucketError::from_sdk(message)
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(data.into_bytes())
    }

    async fn list_prefix(&self, location: &ObjectLocation) -> Result<Vec<String>, BucketError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(location.bucket())
                .prefix(location.key())
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(BucketError::from_sdk)?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<(), BucketError> {
        debug!(from = %from, to = %to, "copying object");
        self.client
            .copy_object()
            .copy_source(copy_source(from))
            .bucket(to.bucket())
            .key(to.key())
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err)
                    if service_err.err().to_string().contains("NoSuchKey") =>
                {
                    BucketError::NotFound(from.to_string())
                }
                other => BucketError::from_sdk(other),
            })?;
        Ok(())
    }

    async fn delete_object(&self, location: &ObjectLocation) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(location.bucket())
            .key(location.key())
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }
}

/// `x-amz-copy-source` value: `<bucket>/<key>` with each key segment URL-encoded.
fn copy_source(location: &ObjectLocation) -> String {
    let key = location
        .key()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", location.bucket(), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_encodes_escaped_partition_values() {
        let location = ObjectLocation::parse(
            "s3://lake/sales/orders/order_date=2024%2F01%2F01/part 0.parquet",
        )
        .unwrap();
        assert_eq!(
            copy_source(&location),
            "lake/sales/orders/order_date%3D2024%252F01%252F01/part%200.parquet"
        );
    }
}
