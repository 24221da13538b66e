use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tokio::time::sleep;

/// Polls `check` until it returns true or the attempts run out.
pub async fn wait_until<F>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return Ok(());
        }
        sleep(StdDuration::from_millis(20)).await;
    }
    Err(anyhow!("timed out waiting for {what}"))
}

/// An address nothing listens on.
pub fn unused_addr() -> Result<SocketAddr> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}
