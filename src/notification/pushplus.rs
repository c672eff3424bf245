use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{Report, Reporter};

pub const DEFAULT_PUSHPLUS_URL: &str = "http://www.pushplus.plus/send";

#[derive(Debug, Deserialize)]
struct PushPlusResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Sends the HTML report through PushPlus to WeChat.
pub struct PushPlusReporter {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl PushPlusReporter {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(token, DEFAULT_PUSHPLUS_URL)
    }

    pub fn with_endpoint(token: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build PushPlus HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl Reporter for PushPlusReporter {
    fn name(&self) -> &'static str {
        "pushplus"
    }

    async fn send(&self, report: &Report) -> Result<()> {
        let form = [
            ("token", self.token.as_str()),
            ("title", report.title.as_str()),
            ("content", report.html.as_str()),
            ("template", "html"),
            ("channel", "wechat"),
        ];

        let resp = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .context("PushPlus request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("PushPlus returned HTTP {}", status);
        }

        let body: PushPlusResponse = resp
            .json()
            .await
            .context("PushPlus returned an unreadable body")?;
        if body.code != 200 {
            bail!("PushPlus rejected the message: {} {}", body.code, body.msg);
        }

        info!(code = body.code, msg = %body.msg, "PushPlus notification sent");
        Ok(())
    }
}
