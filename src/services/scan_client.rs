//! HTTP client for the antivirus scan endpoint.
//!
//! The endpoint accepts a multipart upload with a single `file` field and
//! answers with a status code: `200` for clean, `406` for infected. The
//! status code is the only part of the response that is consumed.

use crate::config::ScanEndpointConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanClientError {
    #[error("building scan client failed: {0}")]
    Build(#[source] reqwest::Error),
    #[error("scan request for `{key}` timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },
    #[error("scan request for `{key}` failed: {source}")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait ScanEndpoint: Send + Sync {
    /// Submit `payload` for scanning and return the HTTP status of the reply.
    ///
    /// An `Err` means no response was received at all.
    async fn submit(&self, key: &str, payload: Bytes) -> Result<u16, ScanClientError>;
}

#[derive(Clone, Debug)]
pub struct HttpScanClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpScanClient {
    pub fn new(cfg: &ScanEndpointConfig) -> Result<Self, ScanClientError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(ScanClientError::Build)?;

        Ok(Self {
            client,
            url: cfg.url.clone(),
            timeout: cfg.request_timeout,
        })
    }
}

#[async_trait]
impl ScanEndpoint for HttpScanClient {
    async fn submit(&self, key: &str, payload: Bytes) -> Result<u16, ScanClientError> {
        let part = Part::bytes(payload.to_vec()).file_name(file_name(key).to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ScanClientError::Timeout {
                        key: key.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    ScanClientError::Transport {
                        key: key.to_string(),
                        source: err,
                    }
                }
            })?;

        Ok(response.status().as_u16())
    }
}

/// Last path segment of an object key.
fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
