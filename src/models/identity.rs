use std::fmt;

use serde::{Deserialize, Serialize};

/// Country code prepended to bare phone numbers.
pub const DEFAULT_COUNTRY_CODE: &str = "+86";

/// Normalized account key used for the token store and for log redaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountIdentity(String);

impl AccountIdentity {
    /// Normalize raw user input. Email addresses and numbers that already
    /// carry a `+` country prefix are kept; bare numbers get `+86`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains('@') || raw.starts_with('+') {
            Self(raw.to_string())
        } else {
            Self(format!("{DEFAULT_COUNTRY_CODE}{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_email(&self) -> bool {
        self.0.contains('@')
    }

    /// Selects the `huami_phone` vs `huami` login flavour.
    pub fn is_phone(&self) -> bool {
        !self.is_email()
    }

    /// Masked form safe for logs and notifications.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short values keep a third of their characters on each side; longer ones
/// keep the first three and the last four.
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();
    if len <= 8 {
        let keep = (len / 3).max(1).min(len);
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[len - keep..].iter().collect();
        format!("{head}***{tail}")
    } else {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[len - 4..].iter().collect();
        format!("{head}****{tail}")
    }
}
