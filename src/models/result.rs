use std::fmt;

use chrono::Duration;

use crate::errors::AppError;
use crate::models::bundle::{CredentialBundle, Tier};
use crate::models::identity::AccountIdentity;

/// One step the lifecycle manager took while producing a usable app token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierEvent {
    /// Cached tier reused without any remote call.
    Reused { tier: Tier, age: Duration },
    /// Stale app token confirmed valid by the remote service.
    Verified,
    /// Remote verification rejected the app token (or errored).
    VerifyFailed { reason: String },
    /// Verification skipped because skip-verify mode is on.
    VerifySkipped,
    /// A tier was (re)issued from the tier above it.
    Refreshed { tier: Tier },
    /// A refresh attempt for a tier failed; falling through.
    RefreshFailed { tier: Tier, reason: String },
    /// A tier was too old to use.
    Expired { tier: Tier, age: Option<Duration> },
    /// Cached tokens are unusable without the user id they belong to.
    MissingUserId,
    /// The full three-step login chain ran.
    FullLogin,
}

impl fmt::Display for TierEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierEvent::Reused { tier, age } => {
                write!(f, "reused cached {tier} (age {}h)", age.num_hours())
            }
            TierEvent::Verified => f.write_str("app_token verified by remote, timestamp refreshed"),
            TierEvent::VerifyFailed { reason } => {
                write!(f, "app_token no longer valid ({reason}), refreshing")
            }
            TierEvent::VerifySkipped => f.write_str("app_token may be stale, verification skipped"),
            TierEvent::Refreshed { tier } => write!(f, "obtained new {tier}"),
            TierEvent::RefreshFailed { tier, reason } => {
                write!(f, "could not refresh {tier}: {reason}")
            }
            TierEvent::Expired { tier, age: Some(age) } => {
                write!(f, "{tier} expired (age {}h)", age.num_hours())
            }
            TierEvent::Expired { tier, age: None } => write!(f, "no cached {tier}"),
            TierEvent::MissingUserId => f.write_str("no cached user id, re-deriving tokens"),
            TierEvent::FullLogin => f.write_str("performed full login"),
        }
    }
}

/// Outcome of one account's run. Never escapes as an error: every fault is
/// captured in `outcome`.
#[derive(Debug)]
pub struct AccountResult {
    pub identity: AccountIdentity,
    pub steps: Option<u32>,
    pub outcome: Result<String, AppError>,
    /// Updated bundle to write back, present whenever a token was obtained.
    pub bundle: Option<CredentialBundle>,
    pub trace: Vec<TierEvent>,
}

impl AccountResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Human-readable message for logs and notifications.
    pub fn message(&self) -> String {
        match (&self.outcome, self.steps) {
            (Ok(ack), Some(steps)) => format!("submitted {steps} steps [{ack}]"),
            (Ok(ack), None) => ack.clone(),
            (Err(e), _) => e.to_string(),
        }
    }

    pub fn trace_lines(&self) -> Vec<String> {
        self.trace.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub results: Vec<AccountResult>,
    pub success_count: usize,
    pub total_count: usize,
    pub persisted: bool,
}

impl BatchResult {
    pub fn new(results: Vec<AccountResult>, persisted: bool) -> Self {
        let success_count = results.iter().filter(|r| r.success()).count();
        let total_count = results.len();
        Self {
            results,
            success_count,
            total_count,
            persisted,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.total_count - self.success_count
    }

    pub fn summary(&self) -> String {
        format!(
            "accounts: {}, succeeded: {}, failed: {}",
            self.total_count,
            self.success_count,
            self.failure_count()
        )
    }
}
