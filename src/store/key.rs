use http::Method;

use crate::message::Request;

/// Request identity inside a store: method plus the path and query the origin
/// is asked for. The authority of an absolute-form target and the request
/// headers are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CacheKey {
    key_base: String,
    entry_id: String,
}

impl CacheKey {
    pub(super) fn new(method: &Method, path_and_query: &str) -> Self {
        Self::from_key_base(format!("{method}::{path_and_query}"))
    }

    pub(super) fn for_request(request: &Request) -> Self {
        Self::new(request.method(), request.path_and_query())
    }

    pub(super) fn from_key_base(key_base: String) -> Self {
        let entry_id = Self::entry_id_for_key(&key_base);
        Self { key_base, entry_id }
    }

    pub(super) fn key_base(&self) -> &str {
        &self.key_base
    }

    pub(super) fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub(super) fn entry_id_for_key(key_base: &str) -> String {
        blake3::hash(key_base.as_bytes()).to_hex().to_string()
    }
}
