//! OpenAI-compatible embedding client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{validate_batch, EmbeddingProvider, ProviderError};

/// Default endpoint root for the hosted API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Model the catalog index is built with unless overridden.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Blocking embeddings client for OpenAI-compatible endpoints.
///
/// Each [`EmbeddingProvider::embed`] call is a single attempt; retries and
/// backoff belong to the caller's [`crate::retry::RetryPolicy`].
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    model_id: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a client; `timeout` bounds every request end to end.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Configuration("missing OpenAI API key".into()));
        }
        if model.trim().is_empty() {
            return Err(ProviderError::Configuration("missing embedding model name".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| ProviderError::Configuration("invalid OpenAI API key".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        let model = model.trim().to_string();
        let model_id = match dimensions {
            Some(dims) => format!("{model}@{dims}"),
            None => model.clone(),
        };
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            model_id,
            dimensions,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self.client.post(&self.endpoint).json(&request).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors: Vec<Vec<f32>> = parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect();
        validate_batch(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_credentials() {
        let err = OpenAiEmbedder::new(" ", DEFAULT_BASE_URL, DEFAULT_MODEL, None, Duration::from_secs(5))
            .err()
            .expect("blank key must fail");
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn model_id_includes_dimension_override() {
        let embedder = OpenAiEmbedder::new(
            "sk-test",
            "http://localhost:9/v1/",
            DEFAULT_MODEL,
            Some(256),
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(embedder.model_id(), "text-embedding-3-small@256");
        assert_eq!(embedder.endpoint, "http://localhost:9/v1/embeddings");
        assert!(embedder.embed(&[]).expect("empty batch").is_empty());
    }

    #[test]
    fn response_is_reordered_by_index() {
        let mut parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.5,0.5]},{"index":0,"embedding":[1.0,0.0]}],"model":"m"}"#,
        )
        .expect("parse");
        parsed.data.sort_by_key(|entry| entry.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }
}
