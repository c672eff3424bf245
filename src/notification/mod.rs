//! Batch report delivery.
//!
//! The dispatcher renders one [`Report`] per batch and hands it to every
//! configured [`Reporter`]. Delivery failures are logged and never affect
//! the batch outcome.

pub mod pushplus;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{beijing, format_beijing, Clock, SystemClock};
use crate::models::BatchResult;

pub use pushplus::PushPlusReporter;
pub use webhook::WebhookReporter;

/// Default number of accounts above which per-account lines are omitted.
pub const DEFAULT_PUSH_MAX: usize = 30;

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub account: String,
    pub success: bool,
    pub message: String,
}

/// A rendered batch report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub success_count: usize,
    pub total_count: usize,
    /// HTML body for channels that render markup.
    #[serde(skip)]
    pub html: String,
    pub entries: Vec<ReportEntry>,
}

#[async_trait]
pub trait Reporter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn send(&self, report: &Report) -> anyhow::Result<()>;
}

pub struct ReportDispatcher {
    reporters: Vec<Box<dyn Reporter>>,
    /// Only report when the current Beijing hour equals this value.
    report_hour: Option<u32>,
    max_detail: usize,
    clock: Arc<dyn Clock>,
}

impl ReportDispatcher {
    pub fn new(report_hour: Option<u32>, max_detail: usize) -> Self {
        Self {
            reporters: Vec::new(),
            report_hour,
            max_detail,
            clock: Arc::new(SystemClock),
        }
    }

    /// A dispatcher with no reporters; `report` is a no-op.
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_PUSH_MAX)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn render(&self, batch: &BatchResult) -> Report {
        let now = self.clock.now();
        let entries: Vec<ReportEntry> = batch
            .results
            .iter()
            .map(|r| ReportEntry {
                account: r.identity.redacted(),
                success: r.success(),
                message: r.message(),
            })
            .collect();

        let summary = batch.summary();
        let mut html = format!("<div>{}</div>", escape_html(&summary));
        if entries.len() >= self.max_detail {
            html.push_str("<div>too many accounts for a detailed report, see the run logs</div>");
        } else {
            html.push_str("<ul>");
            for entry in &entries {
                let verdict = if entry.success {
                    "succeeded"
                } else {
                    "failed"
                };
                html.push_str(&format!(
                    "<li><span>{}</span> {}: {}</li>",
                    escape_html(&entry.account),
                    verdict,
                    escape_html(&entry.message)
                ));
            }
            html.push_str("</ul>");
        }

        Report {
            title: format!("{} step sync report", format_beijing(now)),
            summary,
            success_count: batch.success_count,
            total_count: batch.total_count,
            html,
            entries,
        }
    }

    /// Render and deliver the batch report to every reporter.
    pub async fn report(&self, batch: &BatchResult) {
        if self.reporters.is_empty() {
            return;
        }
        if let Some(hour) = self.report_hour {
            let current = beijing(self.clock.now()).hour();
            if current != hour {
                info!(report_hour = hour, current_hour = current, "outside report hour, skipping notifications");
                return;
            }
        }

        let report = self.render(batch);
        for reporter in &self.reporters {
            match reporter.send(&report).await {
                Ok(()) => debug!(reporter = reporter.name(), "report delivered"),
                Err(e) => warn!(reporter = reporter.name(), error = %e, "report delivery failed"),
            }
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
