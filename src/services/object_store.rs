//! src/services/object_store.rs
//!
//! Access to the bucket being scanned. The scheduler only needs four things
//! from it: paginated listing by prefix, whole-object download, and reading
//! or writing a single textual tag on an object.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    types::{Tag, Tagging},
};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// One page of a prefix listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Token for the following page; `None` on the last page.
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("listing objects under `{prefix}` failed: {message}")]
    List { prefix: String, message: String },
    #[error("downloading `{key}` failed: {message}")]
    Download { key: String, message: String },
    #[error("reading tags of `{key}` failed: {message}")]
    ReadTags { key: String, message: String },
    #[error("writing tags of `{key}` failed: {message}")]
    WriteTags { key: String, message: String },
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of keys under `prefix`, continuing from `continuation_token`.
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> ObjectStoreResult<ObjectPage>;

    /// Download the full object body.
    async fn get_object(&self, key: &str) -> ObjectStoreResult<Bytes>;

    /// Value of tag `name` on `key`, if the tag is set.
    async fn get_tag(&self, key: &str, name: &str) -> ObjectStoreResult<Option<String>>;

    /// Set tag `name` on `key`, leaving the object's other tags in place.
    async fn put_tag(&self, key: &str, name: &str, value: &str) -> ObjectStoreResult<()>;
}

/// S3 (or S3-compatible) bucket accessed with static credentials.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(cfg: &S3Config) -> Self {
        let credentials = Credentials::new(
            cfg.access_key_id.clone(),
            cfg.secret_access_key.clone(),
            None,
            None,
            "av-scan-scheduler",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &cfg.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
        }
    }

    async fn fetch_tags(&self, key: &str) -> ObjectStoreResult<Vec<Tag>> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ObjectStoreError::ReadTags {
                key: key.to_string(),
                message: describe(err),
            })?;
        Ok(output.tag_set().to_vec())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> ObjectStoreResult<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|err| ObjectStoreError::List {
                prefix: prefix.to_string(),
                message: describe(err),
            })?;

        let keys: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        debug!(
            "listed {} keys under {} (more: {})",
            keys.len(),
            prefix,
            next_token.is_some()
        );
        Ok(ObjectPage { keys, next_token })
    }

    async fn get_object(&self, key: &str) -> ObjectStoreResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Download {
                key: key.to_string(),
                message: describe(err),
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::Download {
                key: key.to_string(),
                message: describe(err),
            })?;
        Ok(body.into_bytes())
    }

    async fn get_tag(&self, key: &str, name: &str) -> ObjectStoreResult<Option<String>> {
        let tags = self.fetch_tags(key).await?;
        Ok(tags
            .iter()
            .find(|tag| tag.key() == name)
            .map(|tag| tag.value().to_string()))
    }

    async fn put_tag(&self, key: &str, name: &str, value: &str) -> ObjectStoreResult<()> {
        let write_error = |message: String| ObjectStoreError::WriteTags {
            key: key.to_string(),
            message,
        };

        let mut tags: Vec<Tag> = self
            .fetch_tags(key)
            .await?
            .into_iter()
            .filter(|tag| tag.key() != name)
            .collect();
        tags.push(
            Tag::builder()
                .key(name)
                .value(value)
                .build()
                .map_err(|err| write_error(describe(err)))?,
        );
        let tagging = Tagging::builder()
            .set_tag_set(Some(tags))
            .build()
            .map_err(|err| write_error(describe(err)))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|err| write_error(describe(err)))?;
        Ok(())
    }
}

/// Render an SDK error with its full source chain.
fn describe<E: std::error::Error>(err: E) -> String {
    DisplayErrorContext(err).to_string()
}
