use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use relay_clickup::ClickUpClient;
use relay_core::Config;
use relay_scheduler::{CoalesceConfig, CoalescingScheduler};

use crate::payload_log::PayloadLog;

pub struct AppState {
    pub config: Config,
    /// `None` when no API token is configured; webhook intake still works,
    /// API-calling automations are skipped.
    pub clickup: Option<Arc<ClickUpClient>>,
    pub scheduler: CoalescingScheduler,
    pub payload_log: PayloadLog,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let clickup = if config.clickup.is_configured() {
            Some(Arc::new(ClickUpClient::new(&config.clickup)?))
        } else {
            warn!("CLICKUP_API_TOKEN not set — automations that call ClickUp are disabled");
            None
        };

        let scheduler = CoalescingScheduler::new(CoalesceConfig::from(&config.scheduler));
        let payload_log = PayloadLog::new(&config.logs.dir)?;

        Ok(Self {
            config,
            clickup,
            scheduler,
            payload_log,
            started_at: Instant::now(),
        })
    }
}
