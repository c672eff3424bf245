//! Shared fixtures for integration tests: a counting remote-service stub and
//! helpers for building cached bundles.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use stepsync::clock::{Clock, FixedClock};
use stepsync::errors::RemoteError;
use stepsync::models::{AccountIdentity, CredentialBundle, IssuedToken};
use stepsync::remote::{LoginGrant, RemoteService};

/// Secret that makes the stub reject the access-token login.
pub const BAD_SECRET: &str = "wrong-password";
/// Secret that makes the stub panic inside the login call.
pub const PANIC_SECRET: &str = "explode";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(now()))
}

/// Tokens issued by the stub carry the identity after the `|`, so every call
/// can be attributed to an account.
pub fn token(kind: &str, identity: &str) -> String {
    format!("{kind}|{identity}")
}

fn owner(token: &str) -> String {
    token.split_once('|').map(|(_, id)| id.to_string()).unwrap_or_default()
}

/// Bundle whose every tier was issued `age` ago.
pub fn cached_bundle(identity: &str, age: chrono::Duration) -> CredentialBundle {
    let issued = now() - age;
    let mut bundle = CredentialBundle::with_device_id(format!("device-{identity}"));
    bundle.access = Some(IssuedToken::new(token("access", identity), issued));
    bundle.login = Some(IssuedToken::new(token("login", identity), issued));
    bundle.app = Some(IssuedToken::new(token("app", identity), issued));
    bundle.user_id = Some(token("uid", identity));
    bundle
}

#[derive(Default)]
pub struct CountingRemote {
    calls: Mutex<Vec<(String, &'static str)>>,
    devices: Mutex<Vec<(String, String)>>,
    valid_app_tokens: Mutex<HashSet<String>>,
    post_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each step submission take `delay`, so overlap is observable.
    pub fn with_post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = delay;
        self
    }

    pub fn accept_app_token(&self, app_token: &str) {
        self.valid_app_tokens
            .lock()
            .unwrap()
            .insert(app_token.to_string());
    }

    fn record(&self, identity: &str, op: &'static str) {
        self.calls.lock().unwrap().push((identity.to_string(), op));
    }

    /// Operations made on behalf of `identity`, in call order.
    pub fn calls_for(&self, identity: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == identity)
            .map(|(_, op)| *op)
            .collect()
    }

    /// Identities in the order their step submissions arrived.
    pub fn post_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, op)| *op == "post_activity_data")
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Device ids sent with login grants for `identity`.
    pub fn devices_for(&self, identity: &str) -> Vec<String> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == identity)
            .map(|(_, device)| device.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteService for CountingRemote {
    async fn login_access_token(
        &self,
        identity: &AccountIdentity,
        secret: &str,
    ) -> Result<String, RemoteError> {
        self.record(identity.as_str(), "login_access_token");
        if secret == PANIC_SECRET {
            panic!("stub exploded for {}", identity.as_str());
        }
        if secret == BAD_SECRET {
            return Err(RemoteError::Rejected("401".into()));
        }
        Ok(token("access", identity.as_str()))
    }

    async fn grant_login_tokens(
        &self,
        access_token: &str,
        device_id: &str,
        _is_phone: bool,
    ) -> Result<LoginGrant, RemoteError> {
        let identity = owner(access_token);
        self.record(&identity, "grant_login_tokens");
        self.devices
            .lock()
            .unwrap()
            .push((identity.clone(), device_id.to_string()));
        Ok(LoginGrant {
            login_token: token("login", &identity),
            app_token: token("app", &identity),
            user_id: token("uid", &identity),
        })
    }

    async fn grant_app_token(&self, login_token: &str) -> Result<String, RemoteError> {
        let identity = owner(login_token);
        self.record(&identity, "grant_app_token");
        Ok(token("app", &identity))
    }

    async fn check_app_token(&self, app_token: &str) -> Result<bool, RemoteError> {
        self.record(&owner(app_token), "check_app_token");
        Ok(self.valid_app_tokens.lock().unwrap().contains(app_token))
    }

    async fn post_activity_data(
        &self,
        _steps: u32,
        app_token: &str,
        _user_id: &str,
    ) -> Result<String, RemoteError> {
        self.record(&owner(app_token), "post_activity_data");

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.post_delay.is_zero() {
            tokio::time::sleep(self.post_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok("success".to_string())
    }
}
