use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::gateway::GatewayError;
use crate::logging::AccessLog;
use crate::message::{Request, Response};
use crate::util::{timeout_with_context, write_all_with_timeout};

use super::AppContext;
use super::codec::{
    Http1RequestHead, encode_response_head, error_response, read_http1_request_head,
};

enum ClientDisposition {
    Continue,
    Close,
}

/// Serves requests on one client connection until it closes, goes idle, or
/// asks not to be kept alive.
pub(super) async fn serve_connection<S>(stream: S, peer: SocketAddr, app: &AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_timeout = app.settings.client_timeout();
    let max_header_size = app.settings.max_header_size;
    let mut reader = BufReader::new(stream);

    loop {
        let start = Instant::now();
        let head = match read_http1_request_head(
            &mut reader,
            peer,
            client_timeout,
            client_timeout,
            max_header_size,
        )
        .await
        {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(err) => {
                debug!(peer = %peer, error = %err, "rejecting malformed request");
                let response = error_response(StatusCode::BAD_REQUEST, "malformed request");
                let written =
                    write_response(reader.get_mut(), &response, false, false, client_timeout)
                        .await
                        .unwrap_or(0);
                AccessLog::start(peer, start)
                    .failed("bad_request", &err)
                    .responded(StatusCode::BAD_REQUEST, 0, written)
                    .emit();
                break;
            }
        };

        match handle_request(&mut reader, peer, app, head, start).await? {
            ClientDisposition::Continue => continue,
            ClientDisposition::Close => break,
        }
    }

    let _ = timeout_with_context(
        client_timeout,
        reader.get_mut().shutdown(),
        "shutting down client stream",
    )
    .await;
    Ok(())
}

async fn handle_request<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    app: &AppContext,
    head: Http1RequestHead,
    start: Instant,
) -> Result<ClientDisposition>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_timeout = app.settings.client_timeout();
    let head_bytes = head.head_bytes() as u64;
    let keep_alive = head.keep_alive();
    let head_request = head.method == Method::HEAD;
    let path = head
        .target
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let log = AccessLog::start(peer, start).request(&head.method, &path);

    if head.headers.has_transfer_encoding() {
        let response = error_response(
            StatusCode::NOT_IMPLEMENTED,
            "chunked request bodies are not supported",
        );
        let written = write_response(reader.get_mut(), &response, false, false, client_timeout)
            .await?;
        log.failed("transfer_encoding", "chunked request body")
            .responded(response.status, head_bytes, written)
            .emit();
        return Ok(ClientDisposition::Close);
    }

    let body_len = head.headers.content_length().unwrap_or(0);
    if body_len > app.settings.max_request_body_size {
        let response = error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        let written = write_response(reader.get_mut(), &response, false, false, client_timeout)
            .await?;
        log.failed("body_too_large", format_args!("{body_len} bytes"))
            .responded(response.status, head_bytes, written)
            .emit();
        return Ok(ClientDisposition::Close);
    }
    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        timeout_with_context(
            client_timeout,
            reader.read_exact(&mut body),
            "reading request body from client",
        )
        .await?;
    }

    let request = Request::new(
        head.method,
        head.target,
        head.headers.forward_header_map(),
        Bytes::from(body),
    );
    let bytes_in = head_bytes + body_len as u64;

    match app.gateway.on_fetch(request).await {
        Ok(outcome) => {
            let written = write_response(
                reader.get_mut(),
                &outcome.response,
                keep_alive,
                head_request,
                client_timeout,
            )
            .await?;
            log.outcome(&outcome)
                .responded(outcome.response.status, bytes_in, written)
                .emit();
        }
        Err(err) => {
            let (status, reason) = match &err {
                GatewayError::Network(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
                GatewayError::Store(_) | GatewayError::Install { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "cache_error")
                }
            };
            let message = status.canonical_reason().unwrap_or("error");
            let response = error_response(status, message);
            let written = write_response(
                reader.get_mut(),
                &response,
                keep_alive,
                head_request,
                client_timeout,
            )
            .await?;
            log.failed(reason, &err)
                .responded(status, bytes_in, written)
                .emit();
        }
    }

    if keep_alive {
        Ok(ClientDisposition::Continue)
    } else {
        Ok(ClientDisposition::Close)
    }
}

async fn write_response<S>(
    stream: &mut S,
    response: &Response,
    keep_alive: bool,
    head_request: bool,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let head = encode_response_head(response, keep_alive, head_request);
    write_all_with_timeout(stream, &head, timeout_dur, "writing response head").await?;
    let mut written = head.len() as u64;
    if !head_request && !response.body.is_empty() {
        write_all_with_timeout(stream, &response.body, timeout_dur, "writing response body")
            .await?;
        written += response.body.len() as u64;
    }
    timeout_with_context(timeout_dur, stream.flush(), "flushing response").await?;
    Ok(written)
}
