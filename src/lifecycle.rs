//! Tiered token lifecycle.
//!
//! Given a possibly-absent cached bundle, produce an app token that is
//! usable right now. Checks run cheapest first and every tier that cannot be
//! used falls through to the next one:
//!
//! 1. no bundle: full login chain
//! 2. app token younger than 24h: reuse, no remote call
//! 3. stale app token: remote check (unless skip-verify), reuse if valid
//! 4. login token younger than 7d: grant a new app token
//! 5. access token younger than 30d: grant new login + app tokens
//! 6. full login chain, keeping the bundle's device id
//!
//! A bundle without a cached user id never takes step 2, since the submit
//! call needs the user id alongside the app token.
//!
//! Only a failure of the full chain is terminal (`AppError::LoginFailure`).

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::{AppError, LoginStage};
use crate::models::{AccountIdentity, CredentialBundle, IssuedToken, Tier, TierEvent};
use crate::remote::{LoginGrant, RemoteService};

/// A usable app token plus the bundle that must be written back.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub app_token: String,
    pub user_id: String,
    pub bundle: CredentialBundle,
}

pub struct TokenLifecycleManager {
    remote: Arc<dyn RemoteService>,
    clock: Arc<dyn Clock>,
}

impl TokenLifecycleManager {
    pub fn new(remote: Arc<dyn RemoteService>, clock: Arc<dyn Clock>) -> Self {
        Self { remote, clock }
    }

    /// Obtain a currently valid app token, refreshing lower tiers as needed.
    ///
    /// Every decision is appended to `trace`, including on failure.
    pub async fn obtain_valid_token(
        &self,
        identity: &AccountIdentity,
        secret: &str,
        cached: Option<CredentialBundle>,
        skip_remote_verify: bool,
        trace: &mut Vec<TierEvent>,
    ) -> Result<TokenGrant, AppError> {
        let account = identity.redacted();

        let Some(mut bundle) = cached else {
            debug!(account = %account, "no cached credentials");
            return self
                .full_login(identity, secret, CredentialBundle::new(), trace)
                .await;
        };

        let now = self.clock.now();
        let user_id = bundle.user_id.clone();

        // A cached app token is only usable together with the user id it was
        // issued for.
        if let Some(user_id) = user_id {
            if let Some(app) = bundle.fresh(Tier::App, now) {
                trace.push(TierEvent::Reused {
                    tier: Tier::App,
                    age: app.age(now),
                });
                debug!(account = %account, age_hours = app.age(now).num_hours(), "reusing cached app token");
                let app_token = app.token.clone();
                return Ok(TokenGrant {
                    app_token,
                    user_id,
                    bundle,
                });
            }

            match (bundle.app.clone(), skip_remote_verify) {
                (Some(_), true) => trace.push(TierEvent::VerifySkipped),
                (Some(app), false) => match self.remote.check_app_token(&app.token).await {
                    Ok(true) => {
                        bundle.app = Some(IssuedToken::new(app.token.clone(), self.clock.now()));
                        trace.push(TierEvent::Verified);
                        info!(account = %account, "stale app token still valid");
                        return Ok(TokenGrant {
                            app_token: app.token,
                            user_id,
                            bundle,
                        });
                    }
                    Ok(false) => trace.push(TierEvent::VerifyFailed {
                        reason: "rejected by remote".into(),
                    }),
                    Err(e) => {
                        warn!(account = %account, error = %e, "app token check failed");
                        trace.push(TierEvent::VerifyFailed {
                            reason: e.to_string(),
                        });
                    }
                },
                (None, _) => trace.push(TierEvent::Expired {
                    tier: Tier::App,
                    age: None,
                }),
            }

            match bundle.fresh(Tier::Login, now).map(|t| t.token.clone()) {
                Some(login_token) => match self.remote.grant_app_token(&login_token).await {
                    Ok(app_token) => {
                        bundle.app = Some(IssuedToken::new(app_token.clone(), self.clock.now()));
                        trace.push(TierEvent::Refreshed { tier: Tier::App });
                        info!(account = %account, "app token refreshed from login token");
                        return Ok(TokenGrant {
                            app_token,
                            user_id,
                            bundle,
                        });
                    }
                    Err(e) => {
                        warn!(account = %account, error = %e, "app token grant failed");
                        trace.push(TierEvent::RefreshFailed {
                            tier: Tier::App,
                            reason: e.to_string(),
                        });
                    }
                },
                None => trace.push(TierEvent::Expired {
                    tier: Tier::Login,
                    age: bundle.login.as_ref().map(|t| t.age(now)),
                }),
            }
        } else {
            trace.push(TierEvent::MissingUserId);
        }

        match bundle.fresh(Tier::Access, now).map(|t| t.token.clone()) {
            Some(access_token) => {
                match self
                    .remote
                    .grant_login_tokens(&access_token, bundle.device_id(), identity.is_phone())
                    .await
                {
                    Ok(grant) => {
                        let user_id = grant.user_id.clone();
                        let app_token = grant.app_token.clone();
                        apply_login_grant(&mut bundle, grant, self.clock.now());
                        trace.push(TierEvent::Refreshed { tier: Tier::Login });
                        info!(account = %account, "login and app tokens refreshed from access token");
                        return Ok(TokenGrant {
                            app_token,
                            user_id,
                            bundle,
                        });
                    }
                    Err(e) => {
                        warn!(account = %account, error = %e, "login token grant failed");
                        trace.push(TierEvent::RefreshFailed {
                            tier: Tier::Login,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            None => trace.push(TierEvent::Expired {
                tier: Tier::Access,
                age: bundle.access.as_ref().map(|t| t.age(now)),
            }),
        }

        self.full_login(identity, secret, bundle, trace).await
    }

    /// access token → login token + app token + user id. The bundle's
    /// device id is kept; every tier is replaced and stamped.
    async fn full_login(
        &self,
        identity: &AccountIdentity,
        secret: &str,
        mut bundle: CredentialBundle,
        trace: &mut Vec<TierEvent>,
    ) -> Result<TokenGrant, AppError> {
        let account = identity.redacted();
        trace.push(TierEvent::FullLogin);
        info!(account = %account, "performing full login");

        let access_token = self
            .remote
            .login_access_token(identity, secret)
            .await
            .map_err(|source| AppError::LoginFailure {
                stage: LoginStage::AccessToken,
                source,
            })?;
        let access_issued = self.clock.now();

        let grant = self
            .remote
            .grant_login_tokens(&access_token, bundle.device_id(), identity.is_phone())
            .await
            .map_err(|source| AppError::LoginFailure {
                stage: LoginStage::LoginTokens,
                source,
            })?;

        bundle.access = Some(IssuedToken::new(access_token, access_issued));
        let user_id = grant.user_id.clone();
        let app_token = grant.app_token.clone();
        apply_login_grant(&mut bundle, grant, self.clock.now());

        Ok(TokenGrant {
            app_token,
            user_id,
            bundle,
        })
    }
}

fn apply_login_grant(
    bundle: &mut CredentialBundle,
    grant: LoginGrant,
    issued_at: chrono::DateTime<chrono::Utc>,
) {
    bundle.login = Some(IssuedToken::new(grant.login_token, issued_at));
    bundle.app = Some(IssuedToken::new(grant.app_token, issued_at));
    bundle.user_id = Some(grant.user_id);
}
