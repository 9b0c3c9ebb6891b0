//! Telegram reporter: report delivery plus the interactive command loop.
//!
//! Speaks the Bot HTTP API directly: `sendMessage` for outbound reports
//! (HTML parse mode) and `getUpdates` long polling for `/help`,
//! `/subscribe`, `/unsubscribe`, and `/status`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use blockwatch_core::config::{ExplorerConfig, TelegramConfig};
use blockwatch_core::events::RenderFormat;
use blockwatch_core::manager::StateManager;
use blockwatch_core::report::Report;
use blockwatch_core::types::{Link, Validator};
use blockwatch_metrics::Metrics;

use crate::{serialize_link, ReportRenderer, Reporter, ReporterError};

const API_BASE: &str = "https://api.telegram.org";
/// Long-poll window; the HTTP timeout must exceed it.
const POLL_TIMEOUT_SECS: u64 = 30;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TelegramReporter {
    config: Option<TelegramConfig>,
    chain_name: String,
    http: reqwest::Client,
    manager: Arc<StateManager>,
    explorer: Option<ExplorerConfig>,
    renderer: ReportRenderer,
    metrics: Arc<Metrics>,
}

impl TelegramReporter {
    pub fn new(
        config: Option<TelegramConfig>,
        chain_name: impl Into<String>,
        manager: Arc<StateManager>,
        explorer: Option<ExplorerConfig>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ReporterError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ReporterError::Http(e.to_string()))?;

        let renderer = ReportRenderer::new(
            Arc::clone(&manager),
            explorer.clone(),
            "telegram",
            RenderFormat::Html,
            "@",
        );

        Ok(Self {
            config,
            chain_name: chain_name.into(),
            http,
            manager,
            explorer,
            renderer,
            metrics,
        })
    }

    fn api_url(&self, method: &str) -> String {
        let token = self
            .config
            .as_ref()
            .map(|c| c.token.as_str())
            .unwrap_or_default();
        format!("{API_BASE}/bot{token}/{method}")
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ReporterError> {
        let response = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
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

    fn validator_link(&self, validator: &Validator) -> String {
        let link = match &self.explorer {
            Some(explorer) => explorer.validator_link(validator),
            None => Link {
                text: validator.moniker.clone(),
                href: String::new(),
            },
        };
        serialize_link(RenderFormat::Html, &link)
    }

    // ─── Interactive commands ────────────────────────────────────────────────

    /// Start the `getUpdates` long-poll loop. `None` when disabled.
    pub fn spawn_command_loop(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled() {
            return None;
        }

        let reporter = self;
        Some(tokio::spawn(async move {
            info!("telegram command loop started");
            let mut offset: i64 = 0;
            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        info!("telegram command loop stopped");
                        return;
                    }
                    polled = reporter.poll_updates(offset) => {
                        match polled {
                            Err(e) => {
                                warn!(error = %e, "getUpdates failed, backing off");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                            }
                            Ok(updates) => {
                                for update in updates {
                                    offset = offset.max(update.update_id + 1);
                                    reporter.handle_update(update).await;
                                }
                            }
                        }
                    }
                }
            }
        }))
    }

    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>, ReporterError> {
        let response = self
            .http
            .post(self.api_url("getUpdates"))
            .json(&serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }))
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

        let parsed: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| ReporterError::Http(e.to_string()))?;
        Ok(parsed.result.unwrap_or_default())
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.clone() else {
            return;
        };
        if !text.starts_with('/') {
            return;
        }

        let sender = message
            .from
            .as_ref()
            .and_then(|from| from.username.clone())
            .or_else(|| message.from.as_ref().map(|from| from.id.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let args: Vec<&str> = text.split_whitespace().collect();
        // "/subscribe@my_bot" and "/subscribe" are the same command.
        let command = args[0]
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or_default();

        info!(sender = %sender, text = %text, "got telegram query");
        self.metrics
            .record_reporter_query(&self.chain_name, "telegram", command);

        let reply = match command {
            "help" => self.handle_help(),
            "subscribe" => self.handle_subscribe(&sender, &args).await,
            "unsubscribe" => self.handle_unsubscribe(&sender, &args).await,
            "status" => self.handle_status(&sender),
            _ => return,
        };

        if let Err(e) = self.send_message(message.chat.id, &reply).await {
            warn!(error = %e, "could not reply to telegram query");
        }
    }

    fn handle_help(&self) -> String {
        [
            format!("<b>blockwatch</b> — missed-blocks monitoring on {}", self.chain_name),
            "/subscribe &lt;validator address&gt; — get notified about a validator".into(),
            "/unsubscribe &lt;validator address&gt; — stop notifications".into(),
            "/status — list your subscriptions".into(),
            "/help — this message".into(),
        ]
        .join("\n")
    }

    async fn handle_subscribe(&self, sender: &str, args: &[&str]) -> String {
        if args.len() < 2 {
            return format!("Usage: {} &lt;validator address&gt;", args[0]);
        }
        let address = args[1];

        let Some(validator) = self.manager.get_validator(address) else {
            return format!(
                "Could not find a validator with address <code>{}</code> on {}",
                escape(address),
                self.chain_name,
            );
        };

        match self.manager.add_notifier(address, "telegram", sender).await {
            Err(e) => {
                warn!(error = %e, "could not persist subscription");
                "Could not save the subscription, please try again later".into()
            }
            Ok(false) => "You are already subscribed to this validator's notifications".into(),
            Ok(true) => format!(
                "Subscribed to validator's notifications on {}: {}",
                self.chain_name,
                self.validator_link(&validator),
            ),
        }
    }

    async fn handle_unsubscribe(&self, sender: &str, args: &[&str]) -> String {
        if args.len() < 2 {
            return format!("Usage: {} &lt;validator address&gt;", args[0]);
        }
        let address = args[1];

        let Some(validator) = self.manager.get_validator(address) else {
            return format!(
                "Could not find a validator with address <code>{}</code> on {}",
                escape(address),
                self.chain_name,
            );
        };

        match self
            .manager
            .remove_notifier(address, "telegram", sender)
            .await
        {
            Err(e) => {
                warn!(error = %e, "could not remove subscription");
                "Could not remove the subscription, please try again later".into()
            }
            Ok(false) => "You are not subscribed to this validator's notifications".into(),
            Ok(true) => format!(
                "Unsubscribed from validator's notifications on {}: {}",
                self.chain_name,
                self.validator_link(&validator),
            ),
        }
    }

    fn handle_status(&self, sender: &str) -> String {
        let addresses = self.manager.validators_for_notifier("telegram", sender);
        if addresses.is_empty() {
            return format!(
                "You are not subscribed to any validator's notifications on {}",
                self.chain_name,
            );
        }

        let mut lines = vec![format!("Your subscriptions on {}:", self.chain_name)];
        for address in addresses {
            match self.manager.get_validator(&address) {
                Some(validator) => {
                    let missed = self.manager.missed_blocks(&validator).not_signed;
                    lines.push(format!(
                        "{}: {} missed blocks",
                        self.validator_link(&validator),
                        missed,
                    ));
                }
                None => lines.push(format!("<code>{}</code>: not found", escape(&address))),
            }
        }
        lines.join("\n")
    }
}

fn escape(raw: &str) -> String {
    crate::escape_html(raw)
}

#[async_trait]
impl Reporter for TelegramReporter {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn enabled(&self) -> bool {
        self.config.is_some()
    }

    async fn init(&self) -> Result<(), ReporterError> {
        if !self.enabled() {
            debug!("telegram credentials not set, reporter disabled");
            return Ok(());
        }

        let response = self
            .http
            .get(self.api_url("getMe"))
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
        info!("telegram reporter connected");
        Ok(())
    }

    async fn send(&self, report: &Report) -> Result<(), ReporterError> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        if report.is_empty() {
            return Ok(());
        }

        let text = self.renderer.serialize_report(report);
        debug!(report = %text, "sending telegram report");
        self.send_message(config.chat_id, &text).await
    }
}

// ─── Bot API wire shapes ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[allow(dead_code)]
    ok: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    text: Option<String>,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}
