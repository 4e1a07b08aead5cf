//! Single-shot HTTP fetch of the upstream posts collection.

use crate::config::ImportConfig;
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::error::Error as StdError;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Classification of a failed fetch attempt. Both kinds are retryable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("unexpected status code {code}")]
    HttpStatus { code: u16 },
}

impl FetchError {
    pub fn transport(cause: impl Into<BoxError>) -> Self {
        FetchError::Transport(cause.into())
    }
}

/// Something that can produce the raw posts payload.
#[rocket::async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch(&self) -> Result<String, FetchError>;
}

/// [`PostSource`] backed by a GET against a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpPostSource {
    url: String,
    http: Client,
}

impl HttpPostSource {
    pub fn new(url: impl Into<String>, http: Client) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }

    pub fn from_config(config: &ImportConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent("posts-importer/0.1")
            .build()
            .map_err(FetchError::transport)?;

        Ok(Self::new(config.source_url.clone(), http))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[rocket::async_trait]
impl PostSource for HttpPostSource {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
            });
        }

        response.text().await.map_err(FetchError::transport)
    }
}
