use std::collections::HashSet;

use anyhow::{Result, anyhow, bail};
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::message::end_to_end_headers;

/// Collects request header lines while enforcing the head size limit and
/// pulling out the fields the connection loop needs.
pub(crate) struct Http1HeaderAccumulator {
    max_bytes: usize,
    total_bytes: usize,
    headers: HeaderMap,
    content_length: Option<usize>,
    chunked: bool,
    connection_tokens: HashSet<String>,
}

impl Http1HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
            headers: HeaderMap::new(),
            content_length: None,
            chunked: false,
            connection_tokens: HashSet::new(),
        }
    }

    /// Records one raw header line. Returns false on the blank line that ends
    /// the head.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        self.reserve(line.len())?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        if name.is_empty() || name.ends_with([' ', '\t']) {
            bail!("invalid header name '{name}'");
        }
        let value = value.trim();
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| anyhow!("invalid value for header '{name}'"))?;

        match header_name.as_str() {
            "content-length" => {
                let parsed: usize = value
                    .parse()
                    .map_err(|_| anyhow!("invalid Content-Length '{value}'"))?;
                if let Some(existing) = self.content_length
                    && existing != parsed
                {
                    bail!("conflicting Content-Length headers");
                }
                self.content_length = Some(parsed);
            }
            "transfer-encoding" => {
                self.chunked = true;
            }
            "connection" => {
                for token in value.split(',') {
                    let token = token.trim();
                    if !token.is_empty() {
                        self.connection_tokens.insert(token.to_ascii_lowercase());
                    }
                }
            }
            _ => {}
        }

        self.headers.append(header_name, header_value);
        Ok(true)
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        self.total_bytes = self
            .total_bytes
            .checked_add(len)
            .ok_or_else(|| anyhow!("request headers exceed configured limit"))?;
        if self.total_bytes > self.max_bytes {
            bail!(
                "request headers exceed configured limit of {} bytes",
                self.max_bytes
            );
        }
        Ok(())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn has_transfer_encoding(&self) -> bool {
        self.chunked
    }

    pub fn wants_connection_close(&self) -> bool {
        self.connection_tokens.contains("close")
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Headers to hand on, without hop-by-hop fields or framing.
    pub fn forward_header_map(&self) -> HeaderMap {
        let mut headers = end_to_end_headers(&self.headers);
        headers.remove(http::header::CONTENT_LENGTH);
        headers
    }
}
