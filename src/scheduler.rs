//! Multi-account batch runner.
//!
//! Accounts run either one at a time (input order, fixed delay between
//! accounts) or through a bounded pool of concurrent executors. In both modes
//! the token map has a single writer: the scheduler applies each returned
//! bundle after its executor completes. The map is persisted once, after the
//! whole batch.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{error, info};

use crate::errors::AppError;
use crate::executor::{AccountExecutor, StepSpec};
use crate::models::{AccountIdentity, AccountResult, BatchResult, TokenMap};
use crate::notification::ReportDispatcher;
use crate::store::TokenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: RunMode,
    /// Pause between accounts in sequential mode.
    pub account_delay: Duration,
    /// Upper bound on executors in flight in concurrent mode.
    pub max_workers: usize,
    /// Minimum gap between account launches in concurrent mode.
    pub launch_spacing: Duration,
    pub steps: StepSpec,
    pub skip_remote_verify: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    executor: AccountExecutor,
    store: Option<TokenStore>,
    reporter: ReportDispatcher,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, executor: AccountExecutor) -> Self {
        Self {
            config,
            executor,
            store: None,
            reporter: ReportDispatcher::disabled(),
        }
    }

    /// Enable batch-end persistence.
    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reporter(mut self, reporter: ReportDispatcher) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run every account once, then persist and report.
    ///
    /// Fails only on configuration faults, before any account runs.
    pub async fn run(
        &self,
        identities: &[String],
        secrets: &[String],
        tokens: &mut TokenMap,
    ) -> Result<BatchResult, AppError> {
        if identities.len() != secrets.len() {
            return Err(AppError::ConfigMismatch {
                identities: identities.len(),
                secrets: secrets.len(),
            });
        }

        let accounts: Vec<(AccountIdentity, &str)> = identities
            .iter()
            .zip(secrets)
            .map(|(id, secret)| (AccountIdentity::parse(id), secret.as_str()))
            .collect();

        info!(
            accounts = accounts.len(),
            mode = ?self.config.mode,
            steps = %self.config.steps,
            skip_verify = self.config.skip_remote_verify,
            "starting batch"
        );

        let results = match self.config.mode {
            RunMode::Sequential => self.run_sequential(accounts, tokens).await,
            RunMode::Concurrent => self.run_concurrent(accounts, tokens).await,
        };

        let persisted = match &self.store {
            Some(store) => match store.save(tokens) {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "failed to persist tokens");
                    false
                }
            },
            None => false,
        };

        let batch = BatchResult::new(results, persisted);
        info!(
            total = batch.total_count,
            succeeded = batch.success_count,
            failed = batch.failure_count(),
            persisted = batch.persisted,
            "batch finished"
        );

        self.reporter.report(&batch).await;
        Ok(batch)
    }

    async fn run_sequential(
        &self,
        accounts: Vec<(AccountIdentity, &str)>,
        tokens: &mut TokenMap,
    ) -> Vec<AccountResult> {
        let total = accounts.len();
        let mut results = Vec::with_capacity(total);

        for (idx, (identity, secret)) in accounts.into_iter().enumerate() {
            info!(account = %identity.redacted(), "[{}/{}] running account", idx + 1, total);
            let cached = tokens.get(identity.as_str()).cloned();
            let result = self
                .executor
                .execute(
                    &identity,
                    secret,
                    cached,
                    self.config.steps,
                    self.config.skip_remote_verify,
                )
                .await;
            apply_result(tokens, &result);
            results.push(result);

            if idx + 1 < total && !self.config.account_delay.is_zero() {
                sleep(self.config.account_delay).await;
            }
        }

        results
    }

    async fn run_concurrent(
        &self,
        accounts: Vec<(AccountIdentity, &str)>,
        tokens: &mut TokenMap,
    ) -> Vec<AccountResult> {
        let total = accounts.len();
        let workers = self.config.max_workers.max(1);
        let pacer = Pacer::new(self.config.launch_spacing);

        // Executors work on snapshots; the map itself is only touched below.
        let jobs: Vec<_> = accounts
            .into_iter()
            .map(|(identity, secret)| {
                let cached = tokens.get(identity.as_str()).cloned();
                (identity, secret, cached)
            })
            .collect();

        let executor = &self.executor;
        let pacer = &pacer;
        let steps = self.config.steps;
        let skip = self.config.skip_remote_verify;

        let mut in_flight = stream::iter(jobs)
            .map(|(identity, secret, cached)| async move {
                pacer.wait().await;
                executor
                    .execute(&identity, secret, cached, steps, skip)
                    .await
            })
            .buffer_unordered(workers);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = in_flight.next().await {
            apply_result(tokens, &result);
            results.push(result);
        }
        results
    }
}

fn apply_result(tokens: &mut TokenMap, result: &AccountResult) {
    if let Some(bundle) = &result.bundle {
        tokens.insert(result.identity.as_str().to_string(), bundle.clone());
    }
}

/// Enforces a minimum gap between launches, independent of the worker bound.
struct Pacer {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.spacing.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            if slot > Instant::now() {
                sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + self.spacing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_launches() {
        let pacer = Pacer::new(Duration::from_secs(2));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;
        assert!(Instant::now() - start >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_zero_spacing_never_waits() {
        let pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait().await;
        }
        assert!(Instant::now() - start < Duration::from_millis(100));
    }
}
