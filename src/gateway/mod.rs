//! Per-request caching decisions.
//!
//! `CacheGateway` answers read requests for static assets from the current
//! store and refreshes hits in the background. Everything else (other
//! methods, navigations to documents, requests before activation) goes
//! straight to the network without touching any store.

use std::sync::Arc;

use async_trait::async_trait;
use http::Uri;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::message::{Request, Response};
use crate::metrics;
use crate::network::{FetchError, Network};
use crate::store::{CacheStorage, CacheStore, PutOutcome};

mod revalidate;
mod route;

pub use revalidate::{Revalidation, RevalidationResult};
pub use route::{DocumentPolicy, PassReason, Route};

/// What to do when a pre-cache manifest entry cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPolicy {
    /// Log the failure, skip the entry and finish installing.
    #[default]
    Lenient,
    /// Fail the install and store nothing.
    Strict,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Version name of the current store. Changing it invalidates every
    /// previously cached entry on the next activation.
    pub store_name: String,
    /// Absolute paths fetched and stored during install.
    pub precache: Vec<String>,
    pub install_policy: InstallPolicy,
    pub document_policy: DocumentPolicy,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Network(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error("failed to pre-cache '{path}': {reason}")]
    Install { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub store: String,
    pub stored: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub current: String,
    /// Superseded stores deleted by this activation, sorted.
    pub removed: Vec<String>,
}

/// Result of the store lookup for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
    /// The store was not consulted.
    Bypass,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Hit => "hit",
            Lookup::Miss => "miss",
            Lookup::Bypass => "bypass",
        }
    }
}

/// What happened to the network response on the miss path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResult {
    Stored,
    /// Status other than `200 OK`.
    NotStorable,
    TooLarge,
    Closed,
    Failed,
}

impl StoreResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreResult::Stored => "stored",
            StoreResult::NotStorable => "not_storable",
            StoreResult::TooLarge => "too_large",
            StoreResult::Closed => "closed",
            StoreResult::Failed => "failed",
        }
    }
}

impl From<PutOutcome> for StoreResult {
    fn from(outcome: PutOutcome) -> Self {
        match outcome {
            PutOutcome::Stored => StoreResult::Stored,
            PutOutcome::TooLarge => StoreResult::TooLarge,
            PutOutcome::Closed => StoreResult::Closed,
        }
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub response: Response,
    pub route: Route,
    pub lookup: Lookup,
    pub store: Option<StoreResult>,
    /// Present on a cache hit; the refresh keeps running if this is dropped.
    pub revalidation: Option<Revalidation>,
}

/// Event handlers a host drives: install once, activate, then fetch per
/// request.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn on_install(&self) -> Result<InstallReport, GatewayError>;
    async fn on_activate(&self) -> Result<ActivationReport, GatewayError>;
    async fn on_fetch(&self, request: Request) -> Result<FetchOutcome, GatewayError>;
}

pub struct CacheGateway<N> {
    config: GatewayConfig,
    storage: CacheStorage,
    network: Arc<N>,
    current: RwLock<Option<CacheStore>>,
}

impl<N: Network> CacheGateway<N> {
    pub fn new(config: GatewayConfig, storage: CacheStorage, network: Arc<N>) -> Self {
        Self {
            config,
            storage,
            network,
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// The activated store, if any.
    pub fn current_store(&self) -> Option<CacheStore> {
        self.current.read().clone()
    }

    async fn fetch_precache(&self, path: &str) -> Result<(Request, Response), String> {
        let uri: Uri = path
            .parse()
            .map_err(|err| format!("invalid manifest path: {err}"))?;
        let request = Request::get(uri);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|err| err.to_string())?;
        if !response.is_storable() {
            return Err(format!("unexpected status {}", response.status.as_u16()));
        }
        Ok((request, response))
    }

    async fn install_lenient(&self, store: &CacheStore) -> Result<InstallReport, GatewayError> {
        let mut report = InstallReport {
            store: store.name().to_string(),
            stored: Vec::new(),
            failed: Vec::new(),
        };
        for path in &self.config.precache {
            let result = match self.fetch_precache(path).await {
                Ok((request, response)) => store
                    .put(&request, &response)
                    .await
                    .map_err(|err| format!("{err:#}"))
                    .and_then(|outcome| match outcome {
                        PutOutcome::Stored => Ok(()),
                        other => Err(format!("not stored: {}", other.as_str())),
                    }),
                Err(reason) => Err(reason),
            };
            match result {
                Ok(()) => {
                    metrics::record_precache("stored");
                    report.stored.push(path.clone());
                }
                Err(reason) => {
                    warn!(path = %path, reason = %reason, "skipping pre-cache entry");
                    metrics::record_precache("failed");
                    report.failed.push(path.clone());
                }
            }
        }
        Ok(report)
    }

    async fn install_strict(&self, store: &CacheStore) -> Result<InstallReport, GatewayError> {
        let mut fetched = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            match self.fetch_precache(path).await {
                Ok(pair) => fetched.push((path, pair)),
                Err(reason) => {
                    metrics::record_precache("failed");
                    return Err(GatewayError::Install {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        let mut stored = Vec::with_capacity(fetched.len());
        for (path, (request, response)) in fetched {
            match store.put(&request, &response).await? {
                PutOutcome::Stored => {
                    metrics::record_precache("stored");
                    stored.push(path.clone());
                }
                other => {
                    metrics::record_precache("failed");
                    return Err(GatewayError::Install {
                        path: path.clone(),
                        reason: format!("not stored: {}", other.as_str()),
                    });
                }
            }
        }
        Ok(InstallReport {
            store: store.name().to_string(),
            stored,
            failed: Vec::new(),
        })
    }

    async fn pass_through(
        &self,
        request: &Request,
        route: Route,
    ) -> Result<FetchOutcome, GatewayError> {
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome {
            response,
            route,
            lookup: Lookup::Bypass,
            store: None,
            revalidation: None,
        })
    }
}

#[async_trait]
impl<N: Network> Lifecycle for CacheGateway<N> {
    async fn on_install(&self) -> Result<InstallReport, GatewayError> {
        let store = self.storage.open(&self.config.store_name).await?;
        let report = match self.config.install_policy {
            InstallPolicy::Lenient => self.install_lenient(&store).await?,
            InstallPolicy::Strict => self.install_strict(&store).await?,
        };
        info!(
            store = %report.store,
            stored = report.stored.len(),
            failed = report.failed.len(),
            "installed cache store"
        );
        Ok(report)
    }

    async fn on_activate(&self) -> Result<ActivationReport, GatewayError> {
        let store = self.storage.open(&self.config.store_name).await?;
        let mut removed = Vec::new();
        for name in self.storage.keys().await? {
            if name == self.config.store_name {
                continue;
            }
            if self.storage.delete(&name).await? {
                removed.push(name);
            }
        }
        *self.current.write() = Some(store);
        info!(
            store = %self.config.store_name,
            removed = ?removed,
            "activated cache store"
        );
        Ok(ActivationReport {
            current: self.config.store_name.clone(),
            removed,
        })
    }

    async fn on_fetch(&self, request: Request) -> Result<FetchOutcome, GatewayError> {
        let store = self.current_store();
        let route = Route::classify(&request, store.is_some(), self.config.document_policy);
        let store = match (route, store) {
            (Route::Cache, Some(store)) => store,
            _ => return self.pass_through(&request, route).await,
        };

        if let Some(cached) = store.match_request(&request).await? {
            metrics::record_cache_lookup(Lookup::Hit.as_str());
            let revalidation = Revalidation::spawn(self.network.clone(), store, request);
            return Ok(FetchOutcome {
                response: cached,
                route,
                lookup: Lookup::Hit,
                store: None,
                revalidation: Some(revalidation),
            });
        }
        metrics::record_cache_lookup(Lookup::Miss.as_str());

        let response = self.network.fetch(&request).await?;
        let stored = if response.is_storable() {
            match store.put(&request, &response).await {
                Ok(outcome) => StoreResult::from(outcome),
                Err(err) => {
                    warn!(
                        path = request.path_and_query(),
                        error = %format!("{err:#}"),
                        "failed to store response"
                    );
                    metrics::record_store_error();
                    StoreResult::Failed
                }
            }
        } else {
            debug!(
                path = request.path_and_query(),
                status = response.status.as_u16(),
                "response not cacheable"
            );
            StoreResult::NotStorable
        };

        Ok(FetchOutcome {
            response,
            route,
            lookup: Lookup::Miss,
            store: Some(stored),
            revalidation: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use http::header::ACCEPT;
    use http::{HeaderMap, HeaderValue, Method, StatusCode};
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;
    use crate::store::StoreLimits;

    #[derive(Clone)]
    enum Reply {
        Ok(StatusCode, &'static [u8]),
        Fail,
    }

    /// Scripted origin. Unknown paths fail. While `held`, fetches wait until
    /// `release` is called.
    #[derive(Default)]
    struct MockNetwork {
        replies: Mutex<HashMap<String, Reply>>,
        calls: Mutex<Vec<(Method, String)>>,
        held: AtomicBool,
        gate: Notify,
    }

    impl MockNetwork {
        fn reply(&self, path: &str, reply: Reply) {
            self.replies.lock().insert(path.to_string(), reply);
        }

        fn calls(&self) -> Vec<(Method, String)> {
            self.calls.lock().clone()
        }

        fn hold(&self) {
            self.held.store(true, Ordering::SeqCst);
        }

        fn release(&self) {
            self.held.store(false, Ordering::SeqCst);
            self.gate.notify_one();
        }
    }

    #[async_trait]
    impl Network for MockNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            let path = request.path_and_query().to_string();
            self.calls.lock().push((request.method().clone(), path.clone()));
            if self.held.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            let reply = self.replies.lock().get(&path).cloned();
            match reply {
                Some(Reply::Ok(status, body)) => {
                    Ok(Response::new(status, HeaderMap::new(), Bytes::from_static(body)))
                }
                Some(Reply::Fail) | None => Err(FetchError::Connect("refused".into())),
            }
        }
    }

    fn limits() -> StoreLimits {
        StoreLimits {
            max_entries: 64,
            max_entry_size: 64 * 1024,
            max_bytes: 1024 * 1024,
        }
    }

    fn config(name: &str) -> GatewayConfig {
        GatewayConfig {
            store_name: name.to_string(),
            precache: Vec::new(),
            install_policy: InstallPolicy::Lenient,
            document_policy: DocumentPolicy::Bypass,
        }
    }

    async fn gateway_with(
        dir: &TempDir,
        config: GatewayConfig,
    ) -> (CacheGateway<MockNetwork>, Arc<MockNetwork>) {
        let storage = CacheStorage::new(dir.path().to_path_buf(), limits())
            .await
            .unwrap();
        let network = Arc::new(MockNetwork::default());
        (CacheGateway::new(config, storage, network.clone()), network)
    }

    async fn active_gateway(dir: &TempDir) -> (CacheGateway<MockNetwork>, Arc<MockNetwork>) {
        let (gateway, network) = gateway_with(dir, config("tiles-v1")).await;
        gateway.on_install().await.unwrap();
        gateway.on_activate().await.unwrap();
        (gateway, network)
    }

    fn get(path: &'static str) -> Request {
        Request::get(Uri::from_static(path))
    }

    fn document(path: &'static str) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9"),
        );
        Request::new(Method::GET, Uri::from_static(path), headers, Bytes::new())
    }

    #[tokio::test]
    async fn miss_fetches_and_stores_before_returning() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/tiles/5/10/12.png", Reply::Ok(StatusCode::OK, b"B"));

        let outcome = gateway.on_fetch(get("/tiles/5/10/12.png")).await.unwrap();
        assert_eq!(outcome.response.body, Bytes::from_static(b"B"));
        assert_eq!(outcome.lookup, Lookup::Miss);
        assert_eq!(outcome.store, Some(StoreResult::Stored));
        assert!(outcome.revalidation.is_none());

        let store = gateway.current_store().unwrap();
        let cached = store
            .match_request(&get("/tiles/5/10/12.png"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, Bytes::from_static(b"B"));
    }

    #[tokio::test]
    async fn hit_returns_stored_copy_and_revalidates_in_background() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/tiles/5/10/12.png", Reply::Ok(StatusCode::OK, b"B"));
        gateway.on_fetch(get("/tiles/5/10/12.png")).await.unwrap();

        network.reply("/tiles/5/10/12.png", Reply::Ok(StatusCode::OK, b"B2"));
        network.hold();
        let outcome = gateway.on_fetch(get("/tiles/5/10/12.png")).await.unwrap();
        assert_eq!(outcome.lookup, Lookup::Hit);
        assert_eq!(outcome.response.body, Bytes::from_static(b"B"));

        let store = gateway.current_store().unwrap();
        let before = store
            .match_request(&get("/tiles/5/10/12.png"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.body, Bytes::from_static(b"B"));

        network.release();
        let result = outcome.revalidation.unwrap().wait().await;
        assert_eq!(result, RevalidationResult::Updated);
        let after = store
            .match_request(&get("/tiles/5/10/12.png"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.body, Bytes::from_static(b"B2"));
        assert_eq!(network.calls().len(), 2);
    }

    #[tokio::test]
    async fn failed_revalidation_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/data/routes.json", Reply::Ok(StatusCode::OK, b"[1]"));
        gateway.on_fetch(get("/data/routes.json")).await.unwrap();

        network.reply("/data/routes.json", Reply::Fail);
        let outcome = gateway.on_fetch(get("/data/routes.json")).await.unwrap();
        assert_eq!(outcome.response.body, Bytes::from_static(b"[1]"));
        assert_eq!(
            outcome.revalidation.unwrap().wait().await,
            RevalidationResult::FetchFailed
        );

        network.reply("/data/routes.json", Reply::Ok(StatusCode::NOT_FOUND, b"gone"));
        let outcome = gateway.on_fetch(get("/data/routes.json")).await.unwrap();
        assert_eq!(outcome.response.body, Bytes::from_static(b"[1]"));
        assert_eq!(
            outcome.revalidation.unwrap().wait().await,
            RevalidationResult::NotStorable
        );

        let store = gateway.current_store().unwrap();
        let cached = store
            .match_request(&get("/data/routes.json"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, Bytes::from_static(b"[1]"));
    }

    #[tokio::test]
    async fn miss_with_network_failure_fails_and_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/tiles/1/1/1.png", Reply::Fail);

        let err = gateway.on_fetch(get("/tiles/1/1/1.png")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
        assert!(gateway.current_store().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_ok_responses_are_returned_but_not_stored() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/missing.png", Reply::Ok(StatusCode::NOT_FOUND, b"nope"));

        let outcome = gateway.on_fetch(get("/missing.png")).await.unwrap();
        assert_eq!(outcome.response.status, StatusCode::NOT_FOUND);
        assert_eq!(outcome.store, Some(StoreResult::NotStorable));
        assert!(gateway.current_store().unwrap().is_empty());
    }

    #[tokio::test]
    async fn documents_never_touch_the_store() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        let store = gateway.current_store().unwrap();
        store
            .put(&get("/index.html"), &Response::ok(Bytes::from_static(b"old")))
            .await
            .unwrap();
        network.reply("/index.html", Reply::Ok(StatusCode::OK, b"live"));

        for _ in 0..2 {
            let outcome = gateway.on_fetch(document("/index.html")).await.unwrap();
            assert_eq!(outcome.response.body, Bytes::from_static(b"live"));
            assert_eq!(outcome.route, Route::PassThrough(PassReason::Document));
            assert_eq!(outcome.lookup, Lookup::Bypass);
            assert!(outcome.store.is_none());
        }
        let cached = store
            .match_request(&get("/index.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, Bytes::from_static(b"old"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cache_document_policy_caches_pages() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("site-v1");
        cfg.document_policy = DocumentPolicy::Cache;
        let (gateway, network) = gateway_with(&dir, cfg).await;
        gateway.on_activate().await.unwrap();
        network.reply("/index.html", Reply::Ok(StatusCode::OK, b"page"));

        let first = gateway.on_fetch(document("/index.html")).await.unwrap();
        assert_eq!(first.lookup, Lookup::Miss);
        let second = gateway.on_fetch(document("/index.html")).await.unwrap();
        assert_eq!(second.lookup, Lookup::Hit);
        assert_eq!(second.response.body, Bytes::from_static(b"page"));
    }

    #[tokio::test]
    async fn non_get_requests_pass_through() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = active_gateway(&dir).await;
        network.reply("/api/track", Reply::Ok(StatusCode::OK, b"ok"));

        let request = Request::new(
            Method::POST,
            Uri::from_static("/api/track"),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        );
        let outcome = gateway.on_fetch(request).await.unwrap();
        assert_eq!(outcome.route, Route::PassThrough(PassReason::Method));
        assert_eq!(outcome.response.body, Bytes::from_static(b"ok"));
        assert!(gateway.current_store().unwrap().is_empty());
        assert_eq!(network.calls(), vec![(Method::POST, "/api/track".to_string())]);
    }

    #[tokio::test]
    async fn requests_before_activation_pass_through() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = gateway_with(&dir, config("tiles-v1")).await;
        network.reply("/tiles/0/0/0.png", Reply::Ok(StatusCode::OK, b"t"));

        let outcome = gateway.on_fetch(get("/tiles/0/0/0.png")).await.unwrap();
        assert_eq!(outcome.route, Route::PassThrough(PassReason::NotActivated));
        assert!(gateway.current_store().is_none());
    }

    #[tokio::test]
    async fn activation_removes_previous_versions() {
        let dir = TempDir::new().unwrap();
        let (old, network) = active_gateway(&dir).await;
        network.reply("/tiles/2/2/2.png", Reply::Ok(StatusCode::OK, b"v1"));
        old.on_fetch(get("/tiles/2/2/2.png")).await.unwrap();
        let old_store = old.current_store().unwrap();

        let storage = old.storage().clone();
        let new = CacheGateway::new(config("tiles-v2"), storage.clone(), network.clone());
        new.on_install().await.unwrap();
        let report = new.on_activate().await.unwrap();
        assert_eq!(report.current, "tiles-v2");
        assert_eq!(report.removed, vec!["tiles-v1".to_string()]);
        assert_eq!(storage.keys().await.unwrap(), vec!["tiles-v2".to_string()]);
        assert!(old_store.is_closed());

        let again = new.on_activate().await.unwrap();
        assert!(again.removed.is_empty());
        assert_eq!(storage.keys().await.unwrap(), vec!["tiles-v2".to_string()]);

        let outcome = new.on_fetch(get("/tiles/2/2/2.png")).await.unwrap();
        assert_eq!(outcome.lookup, Lookup::Miss);
    }

    #[tokio::test]
    async fn lenient_install_skips_failures() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("site-v1");
        cfg.precache = vec!["/app.js".into(), "/broken.css".into(), "/logo.svg".into()];
        let (gateway, network) = gateway_with(&dir, cfg).await;
        network.reply("/app.js", Reply::Ok(StatusCode::OK, b"js"));
        network.reply("/logo.svg", Reply::Ok(StatusCode::OK, b"<svg/>"));
        network.reply("/broken.css", Reply::Ok(StatusCode::INTERNAL_SERVER_ERROR, b""));

        let report = gateway.on_install().await.unwrap();
        assert_eq!(report.stored, vec!["/app.js", "/logo.svg"]);
        assert_eq!(report.failed, vec!["/broken.css"]);

        gateway.on_activate().await.unwrap();
        let outcome = gateway.on_fetch(get("/app.js")).await.unwrap();
        assert_eq!(outcome.lookup, Lookup::Hit);
        assert_eq!(outcome.response.body, Bytes::from_static(b"js"));
    }

    #[tokio::test]
    async fn strict_install_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("site-v1");
        cfg.precache = vec!["/app.js".into(), "/offline.css".into()];
        cfg.install_policy = InstallPolicy::Strict;
        let (gateway, network) = gateway_with(&dir, cfg).await;
        network.reply("/app.js", Reply::Ok(StatusCode::OK, b"js"));

        let err = gateway.on_install().await.unwrap_err();
        match err {
            GatewayError::Install { path, .. } => assert_eq!(path, "/offline.css"),
            other => panic!("unexpected error: {other}"),
        }
        let store = gateway.storage().open("site-v1").await.unwrap();
        assert!(store.is_empty());

        network.reply("/offline.css", Reply::Ok(StatusCode::OK, b"body{}"));
        let report = gateway.on_install().await.unwrap();
        assert_eq!(report.stored.len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn empty_manifest_only_creates_store() {
        let dir = TempDir::new().unwrap();
        let (gateway, network) = gateway_with(&dir, config("site-v1")).await;
        let report = gateway.on_install().await.unwrap();
        assert!(report.stored.is_empty() && report.failed.is_empty());
        assert!(gateway.storage().has("site-v1").await.unwrap());
        assert!(network.calls().is_empty());
    }
}
