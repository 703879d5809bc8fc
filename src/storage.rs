use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, presigning::PresigningConfig, Client};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::AppConfig;

/// Object storage used for recipe images.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
    /// Time-limited GET URL for `key`.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String>;
}

/// A single MinIO/S3 bucket.
#[derive(Clone)]
pub struct S3Bucket {
    client: Client,
    name: String,
}

impl S3Bucket {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let credentials = Credentials::new(
            &config.minio_access_key,
            &config.minio_secret_key,
            None,
            None,
            "recipebook-env",
        );
        let sdk = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.minio_region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        // MinIO wants path-style addressing
        let s3 = aws_sdk_s3::config::Builder::from(&sdk)
            .endpoint_url(&config.minio_endpoint)
            .force_path_style(true)
            .build();

        tracing::info!(endpoint = %config.minio_endpoint, bucket = %config.minio_bucket, "object storage configured");
        Ok(Self {
            client: Client::from_conf(s3),
            name: config.minio_bucket.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for S3Bucket {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        let req = self
            .client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));
        req.send()
            .await
            .with_context(|| format!("upload {}/{key}", self.name))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let req = self.client.delete_object().bucket(&self.name).key(key);
        req.send()
            .await
            .with_context(|| format!("delete {}/{key}", self.name))?;
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String> {
        let presigning = PresigningConfig::expires_in(ttl).context("presign ttl")?;
        let req = self
            .client
            .get_object()
            .bucket(&self.name)
            .key(key)
            .presigned(presigning)
            .await
            .with_context(|| format!("presign {}/{key}", self.name))?;
        Ok(req.uri().to_string())
    }
}

/// In-memory bucket for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    objects: std::sync::Mutex<std::collections::HashMap<String, (Bytes, String)>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.lock().unwrap();
        objects.get(key).map(|(_, ct)| ct.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{key}?expires={}", ttl.as_secs()))
    }
}
