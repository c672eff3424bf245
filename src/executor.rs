//! One account's run: obtain a token, submit the step count, and fold every
//! fault (including panics) into an `AccountResult`.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Timelike};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::errors::AppError;
use crate::lifecycle::TokenLifecycleManager;
use crate::models::{AccountIdentity, AccountResult, CredentialBundle, TierEvent};
use crate::remote::RemoteService;

/// How many steps to submit: a fixed value or an inclusive random range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSpec {
    Fixed(u32),
    Range { min: u32, max: u32 },
}

impl StepSpec {
    pub fn range(min: u32, max: u32) -> Result<Self, AppError> {
        if min > max {
            return Err(AppError::Config(format!(
                "min step {} is greater than max step {}",
                min, max
            )));
        }
        Ok(StepSpec::Range { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match *self {
            StepSpec::Fixed(steps) => steps,
            StepSpec::Range { min, max } => rng.gen_range(min..=max),
        }
    }

    /// Scale a range by how much of the day (up to 22:00) has passed, so
    /// early runs submit plausibly small totals. Fixed values are kept.
    pub fn scaled_by_time_of_day(self, local: DateTime<FixedOffset>) -> Self {
        match self {
            StepSpec::Fixed(_) => self,
            StepSpec::Range { min, max } => {
                let minutes = f64::from(local.hour() * 60 + local.minute());
                let rate = (minutes / (22.0 * 60.0)).min(1.0);
                StepSpec::Range {
                    min: (rate * f64::from(min)) as u32,
                    max: (rate * f64::from(max)) as u32,
                }
            }
        }
    }
}

impl std::fmt::Display for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepSpec::Fixed(steps) => write!(f, "{steps}"),
            StepSpec::Range { min, max } => write!(f, "{min}~{max}"),
        }
    }
}

pub struct AccountExecutor {
    lifecycle: TokenLifecycleManager,
    remote: Arc<dyn RemoteService>,
    rng: Mutex<StdRng>,
}

impl AccountExecutor {
    pub fn new(remote: Arc<dyn RemoteService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            lifecycle: TokenLifecycleManager::new(remote.clone(), clock),
            remote,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic step sampling.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn draw_steps(&self, spec: StepSpec) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        spec.sample(&mut *rng)
    }

    /// Run one account. Never fails: faults end up in the result's outcome.
    pub async fn execute(
        &self,
        identity: &AccountIdentity,
        secret: &str,
        cached: Option<CredentialBundle>,
        steps: StepSpec,
        skip_remote_verify: bool,
    ) -> AccountResult {
        let mut trace = Vec::new();
        let attempt = AssertUnwindSafe(self.attempt(
            identity,
            secret,
            cached,
            steps,
            skip_remote_verify,
            &mut trace,
        ))
        .catch_unwind()
        .await;

        let (steps, bundle, outcome) = match attempt {
            Ok(parts) => parts,
            Err(payload) => (None, None, Err(AppError::Panicked(panic_message(&*payload)))),
        };

        let account = identity.redacted();
        for line in trace.iter().map(TierEvent::to_string) {
            info!(account = %account, "{}", line);
        }
        match &outcome {
            Ok(ack) => info!(account = %account, steps = ?steps, ack = %ack, "step submission succeeded"),
            Err(e) => warn!(account = %account, error = %e, "account run failed"),
        }

        AccountResult {
            identity: identity.clone(),
            steps,
            outcome,
            bundle,
            trace,
        }
    }

    async fn attempt(
        &self,
        identity: &AccountIdentity,
        secret: &str,
        cached: Option<CredentialBundle>,
        steps: StepSpec,
        skip_remote_verify: bool,
        trace: &mut Vec<TierEvent>,
    ) -> (Option<u32>, Option<CredentialBundle>, Result<String, AppError>) {
        if identity.is_empty() || secret.is_empty() {
            return (None, None, Err(AppError::InvalidAccount));
        }

        let grant = match self
            .lifecycle
            .obtain_valid_token(identity, secret, cached, skip_remote_verify, trace)
            .await
        {
            Ok(grant) => grant,
            Err(e) => return (None, None, Err(e)),
        };

        let count = self.draw_steps(steps);
        let outcome = self
            .remote
            .post_activity_data(count, &grant.app_token, &grant.user_id)
            .await
            .map_err(AppError::from);

        // The refreshed bundle is worth keeping even if the submission failed.
        (Some(count), Some(grant.bundle), outcome)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
