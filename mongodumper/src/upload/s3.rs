use std::path::Path;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;

use crate::artifact::UploadTarget;
use crate::config::StorageConfig;

use super::Uploader;

/// Uploads in-process with `aws-sdk-s3`.
///
/// Credentials and region resolve through the default AWS provider chain;
/// a custom endpoint switches to path-style addressing for MinIO and friends.
pub struct S3Uploader {
    client: Client,
    storage_class: Option<StorageClass>,
}

impl S3Uploader {
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            storage_class: config.storage_class.as_deref().map(StorageClass::from),
        }
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn describe(&self, file: &Path, target: &UploadTarget) -> String {
        format!("PutObject {} -> {target}", file.display())
    }

    async fn upload(&self, file: &Path, target: &UploadTarget) -> anyhow::Result<()> {
        let body = ByteStream::from_path(file)
            .await
            .with_context(|| format!("failed to open {}", file.display()))?;

        self.client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .set_storage_class(self.storage_class.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| anyhow!("PutObject failed: {}", DisplayErrorContext(&err)))?;
        Ok(())
    }

    async fn verify(&self, target: &UploadTarget, size: u64) -> anyhow::Result<()> {
        let head = self
            .client
            .head_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .map_err(|err| anyhow!("HeadObject failed: {}", DisplayErrorContext(&err)))?;

        match head.content_length() {
            Some(len) if u64::try_from(len).ok() == Some(size) => Ok(()),
            other => Err(anyhow!(
                "stored object size {other:?} does not match local size {size}"
            )),
        }
    }
}
