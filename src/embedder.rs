//! Embedding provider boundary.
//!
//! The index never computes embeddings itself. An [`Embedder`] turns texts into
//! vectors; [`OpenAiEmbedder`] talks to any OpenAI-compatible `/embeddings`
//! endpoint (OpenAI, a local inference server, ...).

use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::EmbedderConfig;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("expected {expected} embeddings, got {actual}")]
    Count { expected: usize, actual: usize },

    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
}

/// Text to vector. Returns exactly one vector per input text, all of the
/// same length for a given embedder.
#[allow(async_fn_in_trait)]
pub trait Embedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Name recorded in the index manifest, if known.
    fn model_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, EmbedError> {
        let endpoint = embeddings_endpoint(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(OpenAiEmbedder {
            client,
            endpoint,
            model: model.into(),
            api_key,
        })
    }

    /// Builds the client from configuration, reading the API key from the
    /// environment variable the configuration names.
    pub fn from_config(config: &EmbedderConfig) -> Result<Self, EmbedError> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!(var = %config.api_key_env, "no API key in environment, sending unauthenticated requests");
        }
        OpenAiEmbedder::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut request = self.client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status { status: status.as_u16(), body });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        into_ordered_vectors(parsed, texts.len())
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model)
    }
}

fn embeddings_endpoint(base_url: &str) -> Result<Url, EmbedError> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|u| u.join("embeddings"))
        .map_err(|_| EmbedError::Endpoint(base_url.to_string()))
}

fn into_ordered_vectors(mut response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    if response.data.len() != expected {
        return Err(EmbedError::Count { expected, actual: response.data.len() });
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}
