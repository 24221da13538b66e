use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct OriginState {
    seen: Vec<SeenRequest>,
    counts: HashMap<String, usize>,
    statuses: HashMap<String, u16>,
}

/// Origin server answering every request with `"<path> #<n>"`, where `n`
/// counts the requests seen for that path. Paths registered with
/// [`MockOrigin::set_status`] answer with that status instead of 200.
pub struct MockOrigin {
    addr: SocketAddr,
    state: Arc<Mutex<OriginState>>,
    handle: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(OriginState::default()));
        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });
        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, path: &str, status: u16) {
        self.state.lock().statuses.insert(path.to_string(), status);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().counts.get(path).copied().unwrap_or(0)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state.lock().seen.clone()
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<Mutex<OriginState>>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| anyhow!("missing method"))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| anyhow!("missing target"))?
        .to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.trim_end().split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let (status, count) = {
        let mut state = state.lock();
        let count = {
            let entry = state.counts.entry(path.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let status = state.statuses.get(&path).copied().unwrap_or(200);
        state.seen.push(SeenRequest {
            method,
            path: path.clone(),
            headers,
            body,
        });
        (status, count)
    };

    let payload = format!("{path} #{count}");
    let content_type = if path.ends_with(".html") || path == "/" {
        "text/html"
    } else {
        "text/plain"
    };
    let response = format!(
        "HTTP/1.1 {status} Origin\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nX-Origin-Count: {count}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let stream = reader.get_mut();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await.ok();
    Ok(())
}
