//! Chat-platform adapters for blockwatch reports.
//!
//! A reporter is the seam between the dispatch loop and one chat platform.
//! Missing credentials disable a reporter; a disabled reporter accepts
//! `send` as a no-op so the dispatch loop never special-cases it. Send
//! failures are logged and counted but never abort dispatch to the other
//! reporters — that policy lives in the app loop.
//!
//! Both concrete reporters speak their platform's plain HTTP Bot API
//! through `reqwest`; richer SDKs would plug in behind the same trait.

pub mod discord;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use blockwatch_core::config::ExplorerConfig;
use blockwatch_core::events::{RenderData, RenderFormat, ReportEvent};
use blockwatch_core::manager::StateManager;
use blockwatch_core::report::Report;
use blockwatch_core::types::Link;

pub use discord::DiscordReporter;
pub use telegram::TelegramReporter;

/// Errors surfaced by a reporter. The dispatch loop logs and counts them.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// The reporter capability.
#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `false` when credentials are missing; `send` is then a no-op.
    fn enabled(&self) -> bool;

    /// Connect/validate credentials. Called once at startup.
    async fn init(&self) -> Result<(), ReporterError>;

    /// Deliver one report, one rendered entry per line.
    async fn send(&self, report: &Report) -> Result<(), ReporterError>;
}

/// Serialize a link for the given format. An empty href degrades to text.
pub fn serialize_link(format: RenderFormat, link: &Link) -> String {
    match format {
        RenderFormat::Html => {
            let text = escape_html(&link.text);
            if link.href.is_empty() {
                text
            } else {
                format!("<a href=\"{}\">{}</a>", link.href, text)
            }
        }
        RenderFormat::Markdown => {
            if link.href.is_empty() {
                link.text.clone()
            } else {
                format!("[{}]({})", link.text, link.href)
            }
        }
        RenderFormat::Test => link.text.clone(),
    }
}

/// Minimal HTML escaping for user-controlled strings (monikers).
pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Compact human duration, largest-two units: `"26h 3m"` -> `"1d 2h"`.
pub fn format_duration(duration: Duration) -> String {
    let mut seconds = duration.num_seconds().max(0);

    let units = [(86_400, "d"), (3_600, "h"), (60, "m"), (1, "s")];
    let mut parts = Vec::new();
    for (size, suffix) in units {
        let count = seconds / size;
        if count > 0 {
            parts.push(format!("{count}{suffix}"));
            seconds -= count * size;
        }
        if parts.len() == 2 {
            break;
        }
    }

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

/// Shared event-to-line pipeline: resolves the validator link, the
/// subscribed notifiers, and the time-till-jail suffix, then renders.
pub struct ReportRenderer {
    manager: Arc<StateManager>,
    explorer: Option<ExplorerConfig>,
    reporter_name: &'static str,
    format: RenderFormat,
    /// Prepended to each notifier handle (`"@"` on Telegram).
    mention_prefix: &'static str,
}

impl ReportRenderer {
    pub fn new(
        manager: Arc<StateManager>,
        explorer: Option<ExplorerConfig>,
        reporter_name: &'static str,
        format: RenderFormat,
        mention_prefix: &'static str,
    ) -> Self {
        Self {
            manager,
            explorer,
            reporter_name,
            format,
            mention_prefix,
        }
    }

    pub fn serialize_entry(&self, event: &ReportEvent) -> String {
        let validator = event.validator();

        let link = match &self.explorer {
            Some(explorer) => explorer.validator_link(validator),
            None => Link {
                text: validator.moniker.clone(),
                href: String::new(),
            },
        };

        let notifiers = self
            .manager
            .notifiers_for_reporter(&validator.operator_address, self.reporter_name)
            .iter()
            .map(|notifier| format!("{}{notifier}", self.mention_prefix))
            .collect::<Vec<_>>()
            .join(" ");

        let time_till_jail = if event.is_increasing() {
            self.manager.time_till_jail(validator).map(format_duration)
        } else {
            None
        };

        event.render(
            self.format,
            &RenderData {
                notifiers,
                validator_link: serialize_link(self.format, &link),
                time_till_jail,
            },
        )
    }

    pub fn serialize_report(&self, report: &Report) -> String {
        report
            .entries
            .iter()
            .map(|entry| self.serialize_entry(entry))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
