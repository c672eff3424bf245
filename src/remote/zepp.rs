//! HTTPS client for the Zepp (Huami) account and health APIs.
//!
//! Only the five calls the lifecycle manager and executor need are
//! implemented. Every request runs under the client-wide timeout; an expired
//! timeout surfaces as `RemoteError::Timeout`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, redirect, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{LoginGrant, RemoteService};
use crate::clock::beijing;
use crate::errors::RemoteError;
use crate::models::AccountIdentity;

const USER_AGENT: &str = "MiFit/6.12.0 (MCE16; Android 16; Density/1.5)";
const APP_NAME: &str = "com.xiaomi.hm.health";
const CLIENT_ID: &str = "HuaMi";
const REDIRECT_URI: &str = "https://s3-us-west-2.amazonaws.com/hm-registration/successsignin.html";
const APP_TOKEN_DN: &str = "api-user.huami.com,api-mifit.huami.com,app-analytics.huami.com";
const LAST_DEVICE_ID: &str = "DA932FFFFE8816E7";
const LAST_SYNC_TIME: &str = "1597306380";

/// Base URLs of the four API hosts. Overridable so tests can point every
/// host at one mock server.
#[derive(Debug, Clone)]
pub struct ZeppEndpoints {
    pub user_api: String,
    pub account: String,
    pub account_cn: String,
    pub health: String,
}

impl Default for ZeppEndpoints {
    fn default() -> Self {
        Self {
            user_api: "https://api-user.huami.com".into(),
            account: "https://account.huami.com".into(),
            account_cn: "https://account-cn.huami.com".into(),
            health: "https://api-mifit-cn2.huami.com".into(),
        }
    }
}

impl ZeppEndpoints {
    /// Every host replaced by one base URL.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            user_api: base.clone(),
            account: base.clone(),
            account_cn: base.clone(),
            health: base,
        }
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[derive(Clone)]
pub struct ZeppClient {
    client: Client,
    endpoints: ZeppEndpoints,
    timeout: Duration,
}

impl ZeppClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        Self::with_endpoints(ZeppEndpoints::default(), timeout)
    }

    pub fn with_endpoints(endpoints: ZeppEndpoints, timeout: Duration) -> Result<Self, RemoteError> {
        // The access-token login answers with a redirect whose Location
        // carries the token, so redirects must not be followed.
        let client = Client::builder()
            .use_rustls_tls()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    fn transport(&self, err: reqwest::Error) -> RemoteError {
        RemoteError::from_transport(err, self.timeout)
    }

    async fn read_json<T: DeserializeOwned>(&self, resp: Response) -> Result<T, RemoteError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Protocol(format!("unexpected status {}", status)));
        }
        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::Protocol(format!("malformed response body: {}", e))
            }
        })
    }

    fn location_url(&self, location: &str) -> Result<Url, RemoteError> {
        match Url::parse(location) {
            Ok(url) => Ok(url),
            Err(_) => Url::parse(&self.endpoints.user_api)
                .and_then(|base| base.join(location))
                .map_err(|e| RemoteError::Protocol(format!("bad redirect location: {}", e))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token_info: Option<TokenInfo>,
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    login_token: Option<String>,
    app_token: Option<String>,
    user_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    #[serde(default)]
    message: Option<String>,
}

impl TokenEnvelope {
    fn failure(&self) -> RemoteError {
        let code = self
            .error_code
            .as_ref()
            .map(scalar_to_string)
            .or_else(|| self.result.clone())
            .unwrap_or_else(|| "missing token_info".into());
        RemoteError::Rejected(code)
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The `data_json` document for one day's band data, carrying the step total.
fn band_data_json(steps: u32, date: &str) -> String {
    let summary = json!({
        "v": 6,
        "slp": { "st": 0, "ed": 0, "dp": 0, "lt": 0, "wk": 0, "usrSt": -1440, "usrEd": -1440 },
        "stp": {
            "ttl": steps,
            "dis": u64::from(steps) * 7 / 10,
            "cal": steps / 25,
            "wk": 41,
            "rn": 50,
            "runDist": 0,
            "runCal": 0,
            "stage": []
        },
        "goal": 8000,
        "tz": "28800"
    });
    json!([{
        "data_hr": "",
        "date": date,
        "data": [{
            "start": 0,
            "stop": 1439,
            "value": "",
            "tz": 32,
            "did": LAST_DEVICE_ID,
            "src": 24
        }],
        "summary": summary.to_string(),
        "source": 24,
        "type": 0
    }])
    .to_string()
}

#[async_trait]
impl RemoteService for ZeppClient {
    async fn login_access_token(
        &self,
        identity: &AccountIdentity,
        secret: &str,
    ) -> Result<String, RemoteError> {
        let url = endpoint(
            &self.endpoints.user_api,
            &format!("/registrations/{}/tokens", urlencoding::encode(identity.as_str())),
        );
        let form = [
            ("client_id", CLIENT_ID),
            ("password", secret),
            ("redirect_uri", REDIRECT_URI),
            ("token", "access"),
        ];

        let resp = self
            .client
            .post(&url)
            .header("app_name", "com.huami.midong")
            .header("appname", "com.huami.midong")
            .header("appPlatform", "web")
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        let location = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                RemoteError::Protocol(format!("login answered {} without a redirect", status))
            })?;
        let location = self.location_url(location)?;

        let mut access = None;
        let mut error = None;
        for (key, value) in location.query_pairs() {
            match key.as_ref() {
                "access" if !value.is_empty() => access = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        match (access, error) {
            (Some(token), _) => Ok(token),
            (None, Some(code)) => Err(RemoteError::Rejected(format!("login error {}", code))),
            (None, None) => Err(RemoteError::Protocol(
                "redirect carried neither access token nor error".into(),
            )),
        }
    }

    async fn grant_login_tokens(
        &self,
        access_token: &str,
        device_id: &str,
        is_phone: bool,
    ) -> Result<LoginGrant, RemoteError> {
        let url = endpoint(&self.endpoints.account, "/v2/client/login");
        let third_name = if is_phone { "huami_phone" } else { "huami" };
        let form = [
            ("app_name", APP_NAME),
            ("app_version", "6.12.0"),
            ("code", access_token),
            ("country_code", "CN"),
            ("device_id", device_id),
            ("device_model", "phone"),
            ("grant_type", "access_token"),
            ("third_name", third_name),
            ("allow_registration", "false"),
            ("source", APP_NAME),
        ];

        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let envelope: TokenEnvelope = self.read_json(resp).await?;

        let grant = envelope.token_info.as_ref().and_then(|info| {
            Some(LoginGrant {
                login_token: info.login_token.clone()?,
                app_token: info.app_token.clone()?,
                user_id: info.user_id.as_ref().map(scalar_to_string)?,
            })
        });
        grant.ok_or_else(|| envelope.failure())
    }

    async fn grant_app_token(&self, login_token: &str) -> Result<String, RemoteError> {
        let url = endpoint(&self.endpoints.account_cn, "/v1/client/app_tokens");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("app_name", APP_NAME),
                ("dn", APP_TOKEN_DN),
                ("login_token", login_token),
            ])
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let envelope: TokenEnvelope = self.read_json(resp).await?;

        match envelope.token_info.as_ref().and_then(|i| i.app_token.clone()) {
            Some(token) => Ok(token),
            None => Err(envelope.failure()),
        }
    }

    async fn check_app_token(&self, app_token: &str) -> Result<bool, RemoteError> {
        let url = endpoint(&self.endpoints.health, "/huami.health.getUserInfo.json");
        let resp = self
            .client
            .get(&url)
            .header("apptoken", app_token)
            .query(&[
                ("r", uuid::Uuid::new_v4().to_string()),
                ("t", Utc::now().timestamp_millis().to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(false);
        }
        let body: MessageEnvelope = self.read_json(resp).await?;
        debug!(message = ?body.message, "app token check answered");
        Ok(body.message.as_deref() == Some("success"))
    }

    async fn post_activity_data(
        &self,
        steps: u32,
        app_token: &str,
        user_id: &str,
    ) -> Result<String, RemoteError> {
        let now = Utc::now();
        let date = beijing(now).format("%Y-%m-%d").to_string();
        let url = endpoint(&self.endpoints.health, "/v1/data/band_data.json");
        let data_json = band_data_json(steps, &date);
        let form = [
            ("userid", user_id),
            ("last_sync_data_time", LAST_SYNC_TIME),
            ("device_type", "0"),
            ("last_deviceid", LAST_DEVICE_ID),
            ("data_json", data_json.as_str()),
        ];

        let resp = self
            .client
            .post(&url)
            .header("apptoken", app_token)
            .query(&[
                ("t", now.timestamp_millis().to_string()),
                ("r", uuid::Uuid::new_v4().to_string()),
            ])
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let body: MessageEnvelope = self.read_json(resp).await?;

        match body.message {
            Some(message) if message == "success" => Ok(message),
            Some(message) => Err(RemoteError::Rejected(message)),
            None => Err(RemoteError::Protocol("submission answered without a message".into())),
        }
    }
}
