use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::message::Response;
use crate::server::codec::{encode_response_head, error_response, read_http1_request_head};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn register<M>(metric: M) -> M
where
    M: Collector + Clone + 'static,
{
    REGISTRY
        .register(Box::new(metric.clone()))
        .expect("register metric");
    metric
}

fn counter(name: &str, help: &str) -> IntCounter {
    register(IntCounter::new(name, help).expect("create counter"))
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    register(IntCounterVec::new(Opts::new(name, help), labels).expect("create counter vec"))
}

static REQUESTS_TOTAL: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("requests_total", "Requests by route", &["route"]));

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "requests_status_total",
        "Requests by status class",
        &["status_class"],
    )
});

static REQUEST_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Request latency per route")
        .buckets(latency_buckets());
    register(HistogramVec::new(opts, &["route"]).expect("create histogram vec"))
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "cache_lookup_total",
        "Cache lookups by result (hit, miss, bypass)",
        &["result"],
    )
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_store_total", "Responses written to a cache store"));

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_store_errors_total", "Failed cache store writes"));

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_evictions_total", "Entries evicted to respect limits"));

static CACHE_REVALIDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "cache_revalidations_total",
        "Background revalidations by result",
        &["result"],
    )
});

static CACHE_STORES_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "cache_stores_deleted_total",
        "Superseded cache stores deleted on activation",
    )
});

static PRECACHE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "precache_total",
        "Pre-cache manifest entries by result",
        &["result"],
    )
});

fn latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

const METRICS_PATH: &str = "/metrics";
const METRICS_MAX_HEADER_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_request(route: &str, status: StatusCode, elapsed: Duration) {
    REQUESTS_TOTAL.with_label_values(&[route]).inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status.as_u16())])
        .inc();
    REQUEST_LATENCY_SECONDS
        .with_label_values(&[route])
        .observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUP_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_revalidation(result: &str) {
    CACHE_REVALIDATIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_store_deleted() {
    CACHE_STORES_DELETED_TOTAL.inc();
}

pub fn record_precache(result: &str) {
    PRECACHE_TOTAL.with_label_values(&[result]).inc();
}

pub fn gather() -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    buffer
}

/// Serves the registry in Prometheus text format at `/metrics`.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    serve_listener(listener).await
}

pub async fn serve_listener(listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(err) = answer_scrape(stream, peer, METRICS_READ_TIMEOUT).await {
                tracing::debug!(peer = %peer, error = %err, "metrics handler error");
            }
        });
    }
}

/// Answers a single request on `stream` and closes it.
async fn answer_scrape<S>(stream: S, peer: SocketAddr, read_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let Some(head) = read_http1_request_head(
        &mut reader,
        peer,
        read_timeout,
        read_timeout,
        METRICS_MAX_HEADER_BYTES,
    )
    .await?
    else {
        return Ok(());
    };

    let response = if head.method == Method::GET && head.target.path() == METRICS_PATH {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(prometheus::TEXT_FORMAT),
        );
        Response::new(StatusCode::OK, headers, gather())
    } else {
        error_response(StatusCode::NOT_FOUND, "not found")
    };

    let stream = reader.get_mut();
    stream
        .write_all(&encode_response_head(&response, false, false))
        .await?;
    stream.write_all(&response.body).await?;
    stream.shutdown().await?;
    Ok(())
}
