use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::Request;
use crate::metrics;
use crate::network::Network;
use crate::store::{CacheStore, PutOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationResult {
    /// The fresh copy replaced the stored entry.
    Updated,
    /// The origin answered with something other than `200 OK`.
    NotStorable,
    /// The fresh copy could not be written.
    StoreFailed,
    /// The origin could not be reached.
    FetchFailed,
    /// The task panicked or was cancelled.
    Aborted,
}

impl RevalidationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevalidationResult::Updated => "updated",
            RevalidationResult::NotStorable => "not_storable",
            RevalidationResult::StoreFailed => "store_failed",
            RevalidationResult::FetchFailed => "fetch_failed",
            RevalidationResult::Aborted => "aborted",
        }
    }
}

/// Background refresh of a cache hit. Dropping the handle leaves the task
/// running.
#[derive(Debug)]
pub struct Revalidation {
    handle: JoinHandle<RevalidationResult>,
}

impl Revalidation {
    pub(super) fn spawn<N: Network>(network: Arc<N>, store: CacheStore, request: Request) -> Self {
        let handle = tokio::spawn(async move {
            let result = refresh(network.as_ref(), &store, &request).await;
            metrics::record_revalidation(result.as_str());
            result
        });
        Self { handle }
    }

    pub async fn wait(self) -> RevalidationResult {
        self.handle.await.unwrap_or(RevalidationResult::Aborted)
    }
}

async fn refresh<N: Network>(
    network: &N,
    store: &CacheStore,
    request: &Request,
) -> RevalidationResult {
    let response = match network.fetch(request).await {
        Ok(response) => response,
        Err(err) => {
            debug!(
                path = request.path_and_query(),
                error = %err,
                "background revalidation failed"
            );
            return RevalidationResult::FetchFailed;
        }
    };
    if !response.is_storable() {
        debug!(
            path = request.path_and_query(),
            status = response.status.as_u16(),
            "revalidation response not stored"
        );
        return RevalidationResult::NotStorable;
    }
    match store.put(request, &response).await {
        Ok(PutOutcome::Stored) => RevalidationResult::Updated,
        Ok(outcome) => {
            debug!(
                path = request.path_and_query(),
                outcome = outcome.as_str(),
                "revalidated response not stored"
            );
            RevalidationResult::NotStorable
        }
        Err(err) => {
            warn!(
                path = request.path_and_query(),
                error = %err,
                "failed to store revalidated response"
            );
            metrics::record_store_error();
            RevalidationResult::StoreFailed
        }
    }
}
