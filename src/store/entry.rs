use std::time::{Duration, SystemTime};

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub id: u64,
    pub entry_id: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub stored_at: SystemTime,
    pub content_hash: String,
    pub content_length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct PersistedEntry {
    pub key_base: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at: u64,
    pub content_hash: String,
    pub content_length: u64,
}

impl CacheEntry {
    pub(super) fn to_persisted(&self, key_base: &str) -> PersistedEntry {
        PersistedEntry {
            key_base: key_base.to_string(),
            status: self.status.as_u16(),
            headers: headermap_to_vec(&self.headers),
            stored_at: self
                .stored_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            content_hash: self.content_hash.clone(),
            content_length: self.content_length,
        }
    }

    pub(super) fn from_persisted(persisted: &PersistedEntry, entry_id: &str, id: u64) -> Self {
        Self {
            id,
            entry_id: entry_id.to_string(),
            status: StatusCode::from_u16(persisted.status).unwrap_or(StatusCode::OK),
            headers: to_headermap(&persisted.headers),
            stored_at: SystemTime::UNIX_EPOCH + Duration::from_secs(persisted.stored_at),
            content_hash: persisted.content_hash.clone(),
            content_length: persisted.content_length,
        }
    }
}

pub(super) fn to_headermap(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value_str) = value.to_str() {
            items.push((name.as_str().to_string(), value_str.to_string()));
        }
    }
    items
}
