use http::Method;
use serde::Deserialize;

use crate::message::Request;

/// How navigable documents (HTML pages) are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentPolicy {
    /// Documents always go to the network and never touch the store.
    #[default]
    Bypass,
    /// Documents are cached like any other asset.
    Cache,
}

/// Why a request skipped the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// No store has been activated yet.
    NotActivated,
    /// Only `GET` is served from the cache.
    Method,
    /// The client is navigating to a document.
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PassThrough(PassReason),
    Cache,
}

impl Route {
    pub fn classify(request: &Request, activated: bool, documents: DocumentPolicy) -> Route {
        if !activated {
            return Route::PassThrough(PassReason::NotActivated);
        }
        if request.method() != Method::GET {
            return Route::PassThrough(PassReason::Method);
        }
        if documents == DocumentPolicy::Bypass && request.is_navigation() {
            return Route::PassThrough(PassReason::Document);
        }
        Route::Cache
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::PassThrough(PassReason::NotActivated) => "pass_inactive",
            Route::PassThrough(PassReason::Method) => "pass_method",
            Route::PassThrough(PassReason::Document) => "pass_document",
            Route::Cache => "cache",
        }
    }
}
