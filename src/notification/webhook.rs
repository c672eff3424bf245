use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Report, Reporter};
use crate::clock::{Clock, SystemClock};

// ── Webhook Event ─────────────────────────────────────────────

/// JSON payload posted to webhook endpoints after each batch.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent<'a> {
    /// Always "run_summary".
    pub event_type: &'static str,
    /// ISO-8601 timestamp of delivery.
    pub timestamp: String,
    #[serde(flatten)]
    pub report: &'a Report,
}

impl<'a> WebhookEvent<'a> {
    pub fn run_summary(report: &'a Report, now: DateTime<Utc>) -> Self {
        Self {
            event_type: "run_summary",
            timestamp: now.to_rfc3339(),
            report,
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload`, formatted as "sha256=<hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("invalid webhook signing key")?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Reporter ──────────────────────────────────────────

/// Posts the batch report to one or more URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Stepsync-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
pub struct WebhookReporter {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
    backoff: Vec<Duration>,
    clock: Arc<dyn Clock>,
}

impl WebhookReporter {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("stepsync-webhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            urls,
            signing_secret,
            backoff: [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retry schedule. The first entry is the delay before the
    /// first attempt.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        if !backoff.is_empty() {
            self.backoff = backoff;
        }
        self
    }

    /// Deliver one payload to a single URL with retry.
    async fn deliver(
        &self,
        url: &str,
        payload: &[u8],
        signature: Option<&str>,
        timestamp: &str,
    ) -> Result<()> {
        let delivery_id = uuid::Uuid::new_v4().to_string();

        for (attempt, &delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(url, attempt, delay_secs = delay.as_secs(), "retrying webhook delivery");
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-stepsync-delivery-id", &delivery_id)
                .header("x-stepsync-timestamp", timestamp)
                .header("x-stepsync-event", "run_summary");

            if let Some(sig) = signature {
                req = req.header("x-stepsync-signature", sig);
            }

            match req.body(payload.to_vec()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        anyhow::bail!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        )
    }
}

#[async_trait]
impl Reporter for WebhookReporter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    /// Each URL is attempted independently; the first failure is reported
    /// after all URLs have been tried.
    async fn send(&self, report: &Report) -> Result<()> {
        let now = self.clock.now();
        let timestamp = now.timestamp().to_string();
        let event = WebhookEvent::run_summary(report, now);
        let payload = serde_json::to_vec(&event).context("webhook serialize error")?;
        let signature = self
            .signing_secret
            .as_deref()
            .map(|secret| hmac_sha256_hex(secret, &payload))
            .transpose()?;

        let mut first_error = None;
        for url in &self.urls {
            if let Err(e) = self
                .deliver(url, &payload, signature.as_deref(), &timestamp)
                .await {
                warn!(url, error = %e, "webhook dispatch ultimately failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::notification::ReportEntry;

    fn report() -> Report {
        Report {
            title: "2026-10-16 21:05:00 step sync report".into(),
            summary: "accounts: 1, succeeded: 1, failed: 0".into(),
            success_count: 1,
            total_count: 1,
            html: "<div>ignored</div>".into(),
            entries: vec![ReportEntry {
                account: "+86***000".into(),
                success: true,
                message: "submitted 20000 steps [success]".into(),
            }],
        }
    }

    #[test]
    fn test_event_serializes_flat() {
        let report = report();
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 13, 5, 0).unwrap();
        let json = serde_json::to_value(WebhookEvent::run_summary(&report, now)).unwrap();
        assert_eq!(json["event_type"], "run_summary");
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["entries"][0]["account"], "+86***000");
        assert!(json.get("html").is_none());
        assert_eq!(json["timestamp"], "2026-10-16T13:05:00+00:00");
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret2", b"payload").unwrap();
        assert_ne!(sig1, sig2);
    }
}
