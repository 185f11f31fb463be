//! Remote image acquisition.

use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Bytes downloaded from a remote image URL.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Capability for downloading an image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch `url`. Fails with [`ChatError::ImageFetch`]; never retries.
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ChatError>;
}

/// reqwest-backed fetcher with a hard timeout and size cap.
pub struct HttpImageFetcher {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    fn describe(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("timed out after {}s", self.timeout.as_secs())
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ChatError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ChatError::ImageFetch(self.describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::ImageFetch(format!("HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(ChatError::ImageFetch(format!(
                    "image is {len} bytes, limit is {}",
                    self.max_bytes
                )));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Content-Length may be absent, so the cap is enforced while reading.
        let mut response = response;
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ChatError::ImageFetch(self.describe(&e)))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(ChatError::ImageFetch(format!(
                    "image exceeds {} bytes",
                    self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, bytes = bytes.len(), "Image fetched");

        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}
