pub(crate) mod codec;
mod connection;
pub mod listener;

use std::sync::Arc;

use anyhow::Result;

use crate::gateway::Lifecycle;
use crate::settings::Settings;

pub use listener::{serve, start_listener};

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub gateway: Arc<dyn Lifecycle>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, gateway: Arc<dyn Lifecycle>) -> Self {
        Self { settings, gateway }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
