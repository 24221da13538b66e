use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{Method, Uri, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::debug;

use super::headers::Http1HeaderAccumulator;
use super::line::read_line_with_deadline;

pub(crate) struct Http1RequestHead {
    pub method: Method,
    pub target: Uri,
    pub version: Version,
    pub headers: Http1HeaderAccumulator,
    pub request_line_bytes: usize,
    pub header_bytes: usize,
}

impl Http1RequestHead {
    pub fn head_bytes(&self) -> usize {
        self.request_line_bytes + self.header_bytes
    }

    /// HTTP/1.0 closes after every response; HTTP/1.1 unless asked to.
    pub fn keep_alive(&self) -> bool {
        self.version == Version::HTTP_11 && !self.headers.wants_connection_close()
    }
}

/// Reads a request head. Returns `None` when the client goes idle for
/// `idle_timeout` or closes the connection between requests.
pub(crate) async fn read_http1_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    idle_timeout: Duration,
    header_timeout: Duration,
    max_header_bytes: usize,
) -> Result<Option<Http1RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let available = match tokio::time::timeout(idle_timeout, reader.fill_buf()).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            return Err(err).with_context(|| format!("waiting for request data from {peer}"));
        }
        Err(_) => return Ok(None),
    };
    if available.is_empty() {
        return Ok(None);
    }

    let deadline = Instant::now() + header_timeout;
    let mut request_line = String::new();
    let request_line_bytes =
        read_line_with_deadline(reader, &mut request_line, deadline, peer, max_header_bytes)
            .await?;
    if request_line_bytes == 0 {
        debug!(peer = %peer, "connection closed before request line");
        return Ok(None);
    }
    let line = request_line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        bail!("empty request line from {peer}");
    }

    let mut parts = line.split_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing method"))?;
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing target"))?;
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing version"))?;
    if parts.next().is_some() {
        bail!("malformed request line: unexpected data");
    }
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("invalid HTTP version '{other}'"),
    };

    let method = Method::from_bytes(method_str.as_bytes())
        .with_context(|| format!("invalid method '{method_str}'"))?;
    let target = parse_target(target)?;

    let remaining = max_header_bytes
        .checked_sub(request_line_bytes)
        .ok_or_else(|| anyhow!("request headers exceed configured limit"))?;
    ensure!(remaining > 0, "request headers exceed configured limit");
    let mut headers = Http1HeaderAccumulator::new(remaining);
    let mut header_line = String::new();
    loop {
        let read =
            read_line_with_deadline(reader, &mut header_line, deadline, peer, remaining).await?;
        if read == 0 {
            bail!("connection closed while reading headers from {peer}");
        }
        if !headers
            .push_line(&header_line)
            .with_context(|| format!("invalid header from {peer}"))?
        {
            break;
        }
    }
    let header_bytes = headers.total_bytes();

    Ok(Some(Http1RequestHead {
        method,
        target,
        version,
        headers,
        request_line_bytes,
        header_bytes,
    }))
}

/// Accepts origin-form (`/path?query`) and absolute-form
/// (`http://host/path`) targets.
fn parse_target(target: &str) -> Result<Uri> {
    let uri: Uri = target
        .parse()
        .with_context(|| format!("invalid request target '{target}'"))?;
    if target.starts_with('/') {
        return Ok(uri);
    }
    ensure!(
        uri.scheme().is_some() && uri.authority().is_some(),
        "unsupported request target '{target}'"
    );
    Ok(uri)
}
