use bytes::Bytes;
use http::header::{ACCEPT, HeaderName};
use http::{HeaderMap, Method, StatusCode, Uri};

const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");

/// Media types that mark a request as a navigation to a document.
const DOCUMENT_MEDIA_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// Headers that only make sense on a single connection and are never forwarded.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// An intercepted request. Immutable once observed.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri, HeaderMap::new(), Bytes::new())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Path plus query, the part of the URI the origin sees.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    /// True when the client declared it is navigating to a document, either by
    /// accepting an HTML media type or through `Sec-Fetch-Mode: navigate`.
    pub fn is_navigation(&self) -> bool {
        let navigate = self
            .headers
            .get(SEC_FETCH_MODE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().eq_ignore_ascii_case("navigate"))
            .unwrap_or(false);
        if navigate {
            return true;
        }
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .filter_map(|item| item.split(';').next())
            .map(str::trim)
            .any(|media| {
                DOCUMENT_MEDIA_TYPES
                    .iter()
                    .any(|doc| media.eq_ignore_ascii_case(doc))
            })
    }
}

/// A captured answer. The body is reference counted, so cloning a response to
/// hand one copy to the store and one to the caller does not copy the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    /// Only a plain `200 OK` is worth keeping; partial content, redirects and
    /// errors are passed on but never stored.
    pub fn is_storable(&self) -> bool {
        self.status == StatusCode::OK
    }
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Copies end-to-end headers, dropping hop-by-hop ones and anything listed in
/// the `Connection` header.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) || listed.iter().any(|listed| listed == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
