use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use cachegate::{
    build_gateway,
    cli::LogFormat,
    gateway::{
        ActivationReport, CacheGateway, DocumentPolicy, InstallPolicy, InstallReport, Lifecycle,
    },
    network::HttpNetwork,
    server::{self, AppContext},
    settings::Settings,
};

pub fn default_test_settings(origin: &str, cache_dir: &Path) -> Settings {
    Settings {
        listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        origin: origin.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        cache_name: "app-v1".to_string(),
        precache: Vec::new(),
        install_policy: InstallPolicy::Lenient,
        document_policy: DocumentPolicy::Bypass,
        log: LogFormat::Text,
        client_timeout: 5,
        upstream_timeout: 5,
        max_header_size: 16 * 1024,
        max_request_body_size: 64 * 1024,
        max_response_body_size: 64 * 1024,
        cache_max_entry_size: 64 * 1024,
        cache_max_entries: 128,
        cache_total_capacity: 1024 * 1024,
        metrics_listen: None,
    }
}

/// A gateway serving on a loopback port, with its cache under a temp dir
/// unless the builder points it somewhere else.
pub struct GatewayHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub gateway: Arc<CacheGateway<HttpNetwork>>,
    pub install: InstallReport,
    pub activation: ActivationReport,
    _dir: Option<TempDir>,
    handle: JoinHandle<Result<()>>,
}

impl GatewayHarness {
    pub fn builder(origin: &str) -> GatewayHarnessBuilder {
        GatewayHarnessBuilder {
            origin: origin.to_string(),
            cache_dir: None,
            overrides: Vec::new(),
        }
    }

    pub async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("connecting to gateway at {}", self.addr))?;
        Ok(BufReader::new(stream))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.settings.cache_dir
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for GatewayHarness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct GatewayHarnessBuilder {
    origin: String,
    cache_dir: Option<PathBuf>,
    overrides: Vec<Box<dyn FnOnce(&mut Settings)>>,
}

impl GatewayHarnessBuilder {
    pub fn cache_dir(mut self, dir: &Path) -> Self {
        self.cache_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_settings<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Settings) + 'static,
    {
        self.overrides.push(Box::new(f));
        self
    }

    pub async fn start(self) -> Result<GatewayHarness> {
        let (dir, cache_dir) = match self.cache_dir {
            Some(path) => (None, path),
            None => {
                let dir = TempDir::new()?;
                let path = dir.path().join("cache");
                (Some(dir), path)
            }
        };
        let mut settings = default_test_settings(&self.origin, &cache_dir);
        for apply in self.overrides {
            apply(&mut settings);
        }
        settings.validate()?;

        let gateway = Arc::new(build_gateway(&settings).await?);
        let install = gateway.on_install().await?;
        let activation = gateway.on_activate().await?;

        let listener = TcpListener::bind(settings.listen).await?;
        let addr = listener.local_addr()?;
        let settings = Arc::new(settings);
        let app = AppContext::new(settings.clone(), gateway.clone());
        let handle = tokio::spawn(server::serve(listener, app));

        Ok(GatewayHarness {
            addr,
            settings,
            gateway,
            install,
            activation,
            _dir: dir,
            handle,
        })
    }
}
