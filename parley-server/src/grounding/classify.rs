//! Image classification capability.

use super::decode::DecodedImage;
use crate::error::ChatError;
use async_trait::async_trait;
use parley_common::ClassifierConfig;
use reqwest::Client;
use serde::Deserialize;

/// One classifier label.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub text: String,
    pub confidence: f32,
}

impl Label {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Labels ordered by descending confidence, truncated to top-K.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    labels: Vec<Label>,
}

impl ClassificationResult {
    /// Order raw classifier output and keep the best `k` non-blank labels.
    pub fn top_k(mut labels: Vec<Label>, k: usize) -> Self {
        labels.retain(|l| !l.text.trim().is_empty());
        labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        labels.truncate(k);
        Self { labels }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Capability that names what an image shows.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`ChatError::Classification`] when unreachable or rejected.
    async fn classify(&self, image: &DecodedImage) -> Result<Vec<Label>, ChatError>;
}

#[derive(Debug, Deserialize)]
struct InferenceLabel {
    label: String,
    score: f32,
}

/// Client for a hosted image-classification inference endpoint.
///
/// Posts raw image bytes and expects `[{"label": ..., "score": ...}]`.
pub struct HttpClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl ImageClassifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, image: &DecodedImage) -> Result<Vec<Label>, ChatError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, image.mime_type())
            .body(image.bytes.clone());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Classification(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Classification(format!(
                "API error ({}): {}",
                status.as_u16(),
                error_text
            )));
        }

        let labels: Vec<InferenceLabel> = response
            .json()
            .await
            .map_err(|e| ChatError::Classification(format!("Failed to parse response: {e}")))?;

        Ok(labels
            .into_iter()
            .map(|l| Label::new(l.label, l.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::decode::{decode_image, png_fixture};
    use parley_common::ApiKey;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(server: &MockServer, token: Option<&str>) -> HttpClassifier {
        HttpClassifier::new(ClassifierConfig {
            url: format!("{}/classify", server.uri()),
            token: token.map(ApiKey::new),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_top_k_orders_and_truncates() {
        let result = ClassificationResult::top_k(
            vec![
                Label::new("pillow", 0.1),
                Label::new("cat", 0.9),
                Label::new("rug", 0.05),
                Label::new("sofa", 0.4),
                Label::new("  ", 0.95),
            ],
            3,
        );
        let texts: Vec<_> = result.labels().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["cat", "sofa", "pillow"]);
    }

    #[test]
    fn test_top_k_of_nothing_is_empty() {
        assert!(ClassificationResult::top_k(Vec::new(), 3).is_empty());
    }

    #[tokio::test]
    async fn test_classify_posts_image_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "image/png"))
            .and(header("authorization", "Bearer hf-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "label": "tabby cat", "score": 0.87 },
                { "label": "sofa", "score": 0.08 }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let image = decode_image(png_fixture(2, 2), None).unwrap();
        let labels = classifier(&server, Some("hf-token"))
            .classify(&image)
            .await
            .unwrap();
        assert_eq!(labels[0], Label::new("tabby cat", 0.87));
        assert_eq!(labels.len(), 2);
    }

    #[tokio::test]
    async fn test_classify_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({ "error": "Model is loading" })),
            )
            .mount(&server)
            .await;

        let image = decode_image(png_fixture(2, 2), None).unwrap();
        let err = classifier(&server, None).classify(&image).await.unwrap_err();
        assert!(matches!(err, ChatError::Classification(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_classify_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let image = decode_image(png_fixture(2, 2), None).unwrap();
        let err = classifier(&server, None).classify(&image).await.unwrap_err();
        assert!(matches!(err, ChatError::Classification(_)));
    }
}
