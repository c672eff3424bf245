use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// In-memory token store contents, keyed by normalized identity.
pub type TokenMap = BTreeMap<String, CredentialBundle>;

/// The three credential tiers, longest- to shortest-lived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Access,
    Login,
    App,
}

impl Tier {
    pub fn validity(self) -> Duration {
        match self {
            Tier::Access => Duration::days(30),
            Tier::Login => Duration::days(7),
            Tier::App => Duration::hours(24),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Access => f.write_str("access_token"),
            Tier::Login => f.write_str("login_token"),
            Tier::App => f.write_str("app_token"),
        }
    }
}

/// One tier's token together with the moment it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            issued_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    /// Fresh while strictly younger than the tier's validity window.
    pub fn is_fresh(&self, tier: Tier, now: DateTime<Utc>) -> bool {
        self.age(now) < tier.validity()
    }
}

/// Per-account tiered credential record.
///
/// Each tier is optional: "absent" (never issued, or lost) and "present but
/// stale" are different states and take different paths in the lifecycle
/// manager. `device_id` is assigned once and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredBundle", into = "StoredBundle")]
pub struct CredentialBundle {
    pub access: Option<IssuedToken>,
    pub login: Option<IssuedToken>,
    pub app: Option<IssuedToken>,
    pub user_id: Option<String>,
    device_id: String,
}

impl CredentialBundle {
    /// Empty bundle with a freshly generated device id.
    pub fn new() -> Self {
        Self::with_device_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            access: None,
            login: None,
            app: None,
            user_id: None,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn tier(&self, tier: Tier) -> Option<&IssuedToken> {
        match tier {
            Tier::Access => self.access.as_ref(),
            Tier::Login => self.login.as_ref(),
            Tier::App => self.app.as_ref(),
        }
    }

    /// The tier's token if it is present and within its validity window.
    pub fn fresh(&self, tier: Tier, now: DateTime<Utc>) -> Option<&IssuedToken> {
        self.tier(tier).filter(|t| t.is_fresh(tier, now))
    }
}

impl Default for CredentialBundle {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat on-disk shape: token strings plus millisecond timestamps per tier.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login_token_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_token_time: Option<i64>,
}

fn join_tier(token: Option<String>, millis: Option<i64>) -> Option<IssuedToken> {
    // A token without a usable timestamp can never be proven fresh; keep it
    // as issued at the epoch so it reads as stale rather than vanishing.
    let token = token?;
    let issued_at = millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Some(IssuedToken { token, issued_at })
}

fn split_tier(tier: Option<IssuedToken>) -> (Option<String>, Option<i64>) {
    match tier {
        Some(t) => (Some(t.token), Some(t.issued_at.timestamp_millis())),
        None => (None, None),
    }
}

impl From<StoredBundle> for CredentialBundle {
    fn from(s: StoredBundle) -> Self {
        let mut bundle = match s.device_id {
            Some(id) if !id.is_empty() => CredentialBundle::with_device_id(id),
            _ => CredentialBundle::new(),
        };
        bundle.access = join_tier(s.access_token, s.access_token_time);
        bundle.login = join_tier(s.login_token, s.login_token_time);
        bundle.app = join_tier(s.app_token, s.app_token_time);
        bundle.user_id = s.user_id;
        bundle
    }
}

impl From<CredentialBundle> for StoredBundle {
    fn from(b: CredentialBundle) -> Self {
        let (access_token, access_token_time) = split_tier(b.access);
        let (login_token, login_token_time) = split_tier(b.login);
        let (app_token, app_token_time) = split_tier(b.app);
        StoredBundle {
            access_token,
            login_token,
            app_token,
            user_id: b.user_id,
            device_id: Some(b.device_id),
            access_token_time,
            login_token_time,
            app_token_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hours_ago: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(hours_ago)
    }

    #[test]
    fn test_freshness_boundaries() {
        let now = Utc::now();
        let app = IssuedToken::new("a", at(23, now));
        assert!(app.is_fresh(Tier::App, now));

        let app = IssuedToken::new("a", at(24, now));
        assert!(!app.is_fresh(Tier::App, now), "exactly 24h is stale");

        let login = IssuedToken::new("l", at(7 * 24 - 1, now));
        assert!(login.is_fresh(Tier::Login, now));

        let access = IssuedToken::new("x", at(30 * 24, now));
        assert!(!access.is_fresh(Tier::Access, now));
    }

    #[test]
    fn test_absent_and_stale_are_distinct() {
        let now = Utc::now();
        let mut bundle = CredentialBundle::new();
        assert!(bundle.tier(Tier::App).is_none());

        bundle.app = Some(IssuedToken::new("app", at(48, now)));
        assert!(bundle.tier(Tier::App).is_some());
        assert!(bundle.fresh(Tier::App, now).is_none());
    }

    #[test]
    fn test_flat_json_field_names() {
        let issued = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut bundle = CredentialBundle::with_device_id("dev-1");
        bundle.access = Some(IssuedToken::new("acc", issued));
        bundle.user_id = Some("42".into());

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["access_token"], "acc");
        assert_eq!(json["access_token_time"], 1_700_000_000_000i64);
        assert_eq!(json["device_id"], "dev-1");
        assert_eq!(json["user_id"], "42");
        assert!(json.get("login_token").is_none());
    }

    #[test]
    fn test_missing_device_id_is_generated() {
        let bundle: CredentialBundle =
            serde_json::from_str(r#"{"app_token":"t","app_token_time":1}"#).unwrap();
        assert!(!bundle.device_id().is_empty());
        assert_eq!(bundle.app.as_ref().unwrap().token, "t");
    }

    #[test]
    fn test_token_without_timestamp_reads_as_stale() {
        let bundle: CredentialBundle =
            serde_json::from_str(r#"{"login_token":"l","device_id":"d"}"#).unwrap();
        assert!(bundle.tier(Tier::Login).is_some());
        assert!(bundle.fresh(Tier::Login, Utc::now()).is_none());
    }
}
