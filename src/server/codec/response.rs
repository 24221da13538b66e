use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};

use crate::message::{Response, end_to_end_headers};

/// Encodes the status line and headers of `response`. `Content-Length` is
/// recomputed from the body that will follow, except for HEAD answers, which
/// keep the origin's value and carry no body.
pub(crate) fn encode_response_head(
    response: &Response,
    keep_alive: bool,
    head_request: bool,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(status_line(response.status).as_bytes());

    let headers = end_to_end_headers(&response.headers);
    for (name, value) in headers.iter() {
        if *name == CONTENT_LENGTH && !head_request {
            continue;
        }
        buffer.extend_from_slice(name.as_str().as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    if !head_request || !headers.contains_key(CONTENT_LENGTH) {
        let length = if head_request { 0 } else { response.body.len() };
        buffer.extend_from_slice(format!("content-length: {length}\r\n").as_bytes());
    }
    if !keep_alive {
        buffer.extend_from_slice(b"connection: close\r\n");
    }
    buffer.extend_from_slice(b"\r\n");
    buffer
}

/// A short plain-text answer generated by the gateway itself.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Response::new(status, headers, format!("{message}\n"))
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}
