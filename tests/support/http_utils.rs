use std::time::Duration as StdDuration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("<binary>")
    }
}

/// Reads one response framed by its Content-Length header.
pub async fn read_http_response<S>(reader: &mut BufReader<S>) -> Result<HttpResponse>
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    let bytes = timeout(StdDuration::from_secs(5), reader.read_line(&mut line)).await??;
    if bytes == 0 {
        return Err(anyhow!("connection closed before response status line"));
    }
    let status = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status code in response line"))?
        .parse::<u16>()
        .map_err(|err| anyhow!("invalid status code: {err}"))?;

    let mut headers = Vec::new();
    loop {
        line.clear();
        let n = timeout(StdDuration::from_secs(5), reader.read_line(&mut line)).await??;
        if n == 0 || line == "\r\n" {
            break;
        }
        let (name, value) = line
            .trim_end()
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line {line:?}"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.parse::<usize>())
        .transpose()
        .context("invalid content-length")?
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    timeout(StdDuration::from_secs(5), reader.read_exact(&mut body)).await??;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Sends a raw request on `stream` and reads the single response.
pub async fn send_request(
    stream: &mut BufReader<TcpStream>,
    request: &str,
) -> Result<HttpResponse> {
    stream.get_mut().write_all(request.as_bytes()).await?;
    stream.get_mut().flush().await?;
    read_http_response(stream).await
}

pub fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: gateway.test\r\nAccept: */*\r\n\r\n")
}

pub fn navigate(path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\nHost: gateway.test\r\nAccept: text/html,application/xhtml+xml\r\nSec-Fetch-Mode: navigate\r\n\r\n"
    )
}

pub fn post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: gateway.test\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}
