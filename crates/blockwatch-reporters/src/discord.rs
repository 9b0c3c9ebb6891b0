//! Discord reporter: send-only delivery over the REST channel-message
//! endpoint. Interactive commands are a Telegram capability.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use blockwatch_core::config::{DiscordConfig, ExplorerConfig};
use blockwatch_core::events::RenderFormat;
use blockwatch_core::manager::StateManager;
use blockwatch_core::report::Report;

use crate::{ReportRenderer, Reporter, ReporterError};

const API_BASE: &str = "https://discord.com/api/v10";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DiscordReporter {
    config: Option<DiscordConfig>,
    http: reqwest::Client,
    renderer: ReportRenderer,
}

impl DiscordReporter {
    pub fn new(
        config: Option<DiscordConfig>,
        manager: Arc<StateManager>,
        explorer: Option<ExplorerConfig>,
    ) -> Result<Self, ReporterError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        let renderer = ReportRenderer::new(manager, explorer, "discord", RenderFormat::Markdown, "");

        Ok(Self {
            config,
            http,
            renderer,
        })
    }
}

#[async_trait]
impl Reporter for DiscordReporter {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn enabled(&self) -> bool {
        self.config
            .as_ref()
            .map(|c| !c.token.is_empty() && !c.channel_id.is_empty())
            .unwrap_or(false)
    }

    async fn init(&self) -> Result<(), ReporterError> {
        let Some(config) = &self.config else {
            debug!("discord credentials not set, reporter disabled");
            return Ok(());
        };

        // Validate the token against the gateway-free identity endpoint.
        let response = self
            .http
            .get(format!("{API_BASE}/users/@me"))
            .header("Authorization", format!("Bot {}", config.token))
            .send()
            .await
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReporterError::Api {
                status: status.as_u16(),
                body,
            });
        }
        info!("discord reporter connected");
        Ok(())
    }

    async fn send(&self, report: &Report) -> Result<(), ReporterError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        if report.is_empty() {
            return Ok(());
        }

        let content = self.renderer.serialize_report(report);
        debug!(report = %content, "sending discord report");

        let response = self
            .http
            .post(format!(
                "{API_BASE}/channels/{}/messages",
                config.channel_id
            ))
            .header("Authorization", format!("Bot {}", config.token))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReporterError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
