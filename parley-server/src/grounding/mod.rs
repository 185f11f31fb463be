//! Image grounding: turn an image plus a question into one text prompt.
//!
//! Acquire, decode, classify, then synthesize. Every step runs before any
//! session is touched, so a failure here leaves conversational state as it
//! was.

pub mod classify;
pub mod decode;
pub mod fetch;

pub use classify::{ClassificationResult, HttpClassifier, ImageClassifier, Label};
pub use decode::{decode_image, DecodedImage};
pub use fetch::{FetchedImage, HttpImageFetcher, ImageFetcher};

use crate::error::ChatError;
use std::sync::Arc;
use url::Url;

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    UploadedBytes(Vec<u8>),
    RemoteUrl(Url),
}

/// An image supplied with a single request. Dropped when the request ends.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub source: ImageSource,
    pub mime_type: Option<String>,
}

impl ImageAsset {
    pub fn uploaded(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self {
            source: ImageSource::UploadedBytes(bytes),
            mime_type,
        }
    }

    /// Parse a caller-supplied URL. Only http and https are accepted.
    pub fn remote(raw: &str) -> Result<Self, ChatError> {
        let url = Url::parse(raw)
            .map_err(|e| ChatError::Validation(format!("Invalid image_url: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self {
                source: ImageSource::RemoteUrl(url),
                mime_type: None,
            }),
            scheme => Err(ChatError::Validation(format!(
                "Invalid image_url: unsupported scheme '{scheme}'"
            ))),
        }
    }
}

/// Build the grounded prompt: `"The image contains: a, b, c. {question}"`.
pub fn synthesize_prompt(result: &ClassificationResult, question: &str) -> String {
    let labels = result
        .labels()
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("The image contains: {labels}. {question}")
}

/// Pipeline over the fetch and classification capabilities.
#[derive(Clone)]
pub struct ImageGrounding {
    fetcher: Arc<dyn ImageFetcher>,
    classifier: Arc<dyn ImageClassifier>,
    top_k: usize,
}

impl ImageGrounding {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        classifier: Arc<dyn ImageClassifier>,
        top_k: usize,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            top_k,
        }
    }

    /// Steps 1-2: obtain the bytes and decode them.
    pub async fn acquire(&self, asset: ImageAsset) -> Result<DecodedImage, ChatError> {
        let (bytes, mime_hint) = match asset.source {
            ImageSource::UploadedBytes(bytes) => (bytes, asset.mime_type),
            ImageSource::RemoteUrl(url) => {
                let fetched = self.fetcher.fetch(&url).await?;
                (fetched.bytes, asset.mime_type.or(fetched.content_type))
            }
        };

        // Decoding is CPU-bound
        tokio::task::spawn_blocking(move || decode_image(bytes, mime_hint.as_deref()))
            .await
            .map_err(|e| ChatError::ImageDecode(format!("decoder task failed: {e}")))?
    }

    /// Steps 1-3: acquire, decode, classify.
    pub async fn describe(&self, asset: ImageAsset) -> Result<ClassificationResult, ChatError> {
        let image = self.acquire(asset).await?;
        tracing::debug!(
            format = image.mime_type(),
            width = image.width,
            height = image.height,
            classifier = self.classifier.name(),
            "Classifying image"
        );

        let labels = self.classifier.classify(&image).await?;
        let result = ClassificationResult::top_k(labels, self.top_k);
        if result.is_empty() {
            return Err(ChatError::Classification(
                "classifier returned no labels".into(),
            ));
        }
        Ok(result)
    }

    /// Full grounding: returns the prompt to record and send.
    pub async fn ground(&self, question: &str, asset: ImageAsset) -> Result<String, ChatError> {
        let result = self.describe(asset).await?;
        let prompt = synthesize_prompt(&result, question);
        tracing::info!(
            labels = result.labels().len(),
            prompt_len = prompt.len(),
            "Image grounded"
        );
        Ok(prompt)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher that returns fixed bytes or a fixed failure.
    pub struct StaticFetcher {
        pub result: Result<Vec<u8>, String>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn ok(bytes: Vec<u8>) -> Self {
            Self {
                result: Ok(bytes),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                result: Err(reason.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchedImage, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(bytes) => Ok(FetchedImage {
                    bytes: bytes.clone(),
                    content_type: Some("image/png".into()),
                }),
                Err(reason) => Err(ChatError::ImageFetch(reason.clone())),
            }
        }
    }

    /// Classifier with canned labels.
    pub struct StaticClassifier {
        pub labels: Result<Vec<Label>, String>,
    }

    impl StaticClassifier {
        pub fn labels(labels: &[(&str, f32)]) -> Self {
            Self {
                labels: Ok(labels.iter().map(|(t, c)| Label::new(*t, *c)).collect()),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                labels: Err(reason.to_string()),
            }
        }
    }

    #[async_trait]
    impl ImageClassifier for StaticClassifier {
        fn name(&self) -> &str {
            "static"
        }

        async fn classify(&self, _image: &DecodedImage) -> Result<Vec<Label>, ChatError> {
            self.labels
                .clone()
                .map_err(ChatError::Classification)
        }
    }
}
