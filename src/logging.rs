use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Result, anyhow};
use http::{Method, StatusCode};
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;
use crate::gateway::{FetchOutcome, Route};

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// Access log record for one request, built up while the request is
/// handled and emitted once the response has been written.
#[derive(Debug)]
pub struct AccessLog {
    peer: SocketAddr,
    started: Instant,
    method: Option<String>,
    path: Option<String>,
    route: &'static str,
    lookup: Option<&'static str>,
    stored: Option<&'static str>,
    revalidating: bool,
    status: StatusCode,
    bytes_in: u64,
    bytes_out: u64,
    error: Option<(&'static str, String)>,
}

impl AccessLog {
    pub fn start(peer: SocketAddr, started: Instant) -> Self {
        Self {
            peer,
            started,
            method: None,
            path: None,
            route: "unrouted",
            lookup: None,
            stored: None,
            revalidating: false,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
        }
    }

    pub fn request(mut self, method: &Method, path: &str) -> Self {
        self.method = Some(method.as_str().to_string());
        self.path = Some(path.to_string());
        self
    }

    /// Copies the routing and cache decisions the gateway made.
    pub fn outcome(mut self, outcome: &FetchOutcome) -> Self {
        self.route = outcome.route.as_str();
        self.lookup = Some(outcome.lookup.as_str());
        self.stored = outcome.store.map(|stored| stored.as_str());
        self.revalidating = outcome.revalidation.is_some();
        self
    }

    pub fn route(mut self, route: &Route) -> Self {
        self.route = route.as_str();
        self
    }

    pub fn failed(mut self, reason: &'static str, detail: impl Display) -> Self {
        self.error = Some((reason, format!("{detail:#}")));
        self
    }

    pub fn responded(mut self, status: StatusCode, bytes_in: u64, bytes_out: u64) -> Self {
        self.status = status;
        self.bytes_in = bytes_in;
        self.bytes_out = bytes_out;
        self
    }

    pub fn emit(self) {
        let elapsed = self.started.elapsed();
        let (error_reason, error_detail) = match &self.error {
            Some((reason, detail)) => (Some(*reason), Some(detail.as_str())),
            None => (None, None),
        };

        tracing::info!(
            target: "access_log",
            ts = timestamp(OffsetDateTime::now_utc()),
            client_ip = %self.peer.ip(),
            client_port = self.peer.port(),
            method = self.method.as_deref(),
            path = self.path.as_deref(),
            route = self.route,
            cache_lookup = self.lookup,
            cache_store = self.stored,
            revalidate = self.revalidating,
            status = self.status.as_u16(),
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            elapsed_ms = elapsed.as_millis() as u64,
            error_reason,
            error_detail,
        );

        crate::metrics::record_request(self.route, self.status, elapsed);
    }
}

fn timestamp(now: OffsetDateTime) -> String {
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let month: u8 = month.into();
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{:03}Z",
        now.millisecond()
    )
}
