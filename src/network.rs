use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::HOST;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

use crate::message::{Request, Response, end_to_end_headers};

/// Why a network fetch produced no response. The gateway handles every
/// variant the same way; the distinction only shows up in logs.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid upstream url for '{target}': {reason}")]
    InvalidUrl { target: String, reason: String },
    #[error("upstream request timed out")]
    Timeout,
    #[error("failed to connect to upstream: {0}")]
    Connect(String),
    #[error("failed to read upstream body: {0}")]
    Body(String),
    #[error("upstream body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("upstream request failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Timeout => "timeout",
            FetchError::Connect(_) => "connect",
            FetchError::Body(_) => "body",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err.to_string())
        } else {
            FetchError::Other(err.to_string())
        }
    }
}

/// Performs a request against the origin and returns the complete response.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `Network` backed by an HTTP client pointed at a single origin. Response
/// bodies are buffered up to `max_body` bytes.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
    max_body: usize,
}

impl HttpNetwork {
    pub fn new(origin: &str, timeout: Duration, max_body: usize) -> Result<Self> {
        let origin =
            Url::parse(origin).with_context(|| format!("invalid origin url '{origin}'"))?;
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self {
            client,
            origin,
            max_body,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolves the request target against the origin. Absolute-form targets
    /// keep only their path and query.
    pub fn upstream_url(&self, request: &Request) -> Result<Url, FetchError> {
        let target = request.path_and_query();
        self.origin
            .join(target)
            .map_err(|err| FetchError::InvalidUrl {
                target: target.to_string(),
                reason: err.to_string(),
            })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = self.upstream_url(request)?;
        let mut headers = end_to_end_headers(request.headers());
        headers.remove(HOST);

        debug!(method = %request.method(), url = %url, "fetching from upstream");
        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(headers);
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let mut upstream = builder.send().await?;
        let status = upstream.status();
        let headers = end_to_end_headers(upstream.headers());
        let body = read_body(&mut upstream, self.max_body).await?;
        Ok(Response::new(status, headers, body))
    }
}

async fn read_body(upstream: &mut reqwest::Response, limit: usize) -> Result<Bytes, FetchError> {
    if let Some(length) = upstream.content_length()
        && length > limit as u64
    {
        return Err(FetchError::TooLarge { limit });
    }
    let mut body = BytesMut::new();
    while let Some(chunk) = upstream.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(FetchError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
