use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

/// A file headed for the attachment bucket.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Blob store for task, message and ticket attachments.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_attachment(&self, upload: AttachmentUpload) -> Result<()>;

    async fn presign_attachment(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// `attachments/<owner>/<random>/<file_name>`; the random segment keeps
/// repeated uploads of the same name apart.
pub fn attachment_key(owner: Uuid, file_name: &str) -> String {
    format!("attachments/{owner}/{}/{file_name}", Uuid::new_v4())
}

pub fn inline_disposition(file_name: &str) -> String {
    let escaped: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();
    format!("inline; filename=\"{escaped}\"")
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_attachment(&self, upload: AttachmentUpload) -> Result<()> {
        let size = upload.bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&upload.key)
            .content_type(upload.content_type)
            .content_disposition(inline_disposition(&upload.file_name))
            .body(ByteStream::from(upload.bytes))
            .send()
            .await
            .with_context(|| format!("failed to upload attachment {}", upload.key))?;

        tracing::debug!(key = %upload.key, size, bucket = %self.bucket, "attachment stored");
        Ok(())
    }

    async fn presign_attachment(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to presign attachment URL")?;

        Ok(presigned.uri().to_string())
    }
}
