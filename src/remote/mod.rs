pub mod zepp;

use async_trait::async_trait;

use crate::errors::RemoteError;
use crate::models::AccountIdentity;

pub use zepp::{ZeppClient, ZeppEndpoints};

/// Tokens issued by the login-token grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub login_token: String,
    pub app_token: String,
    pub user_id: String,
}

/// The remote operations the lifecycle manager and executor depend on.
/// Implementations: ZeppClient (HTTPS).
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Exchange identity + secret for a long-lived access token.
    async fn login_access_token(
        &self,
        identity: &AccountIdentity,
        secret: &str,
    ) -> Result<String, RemoteError>;

    /// Derive login token, app token and user id from an access token.
    async fn grant_login_tokens(
        &self,
        access_token: &str,
        device_id: &str,
        is_phone: bool,
    ) -> Result<LoginGrant, RemoteError>;

    /// Derive a fresh app token from a login token.
    async fn grant_app_token(&self, login_token: &str) -> Result<String, RemoteError>;

    /// Ask the service whether an app token is still accepted.
    async fn check_app_token(&self, app_token: &str) -> Result<bool, RemoteError>;

    /// Submit the day's step total. Returns the service's acknowledgement.
    async fn post_activity_data(
        &self,
        steps: u32,
        app_token: &str,
        user_id: &str,
    ) -> Result<String, RemoteError>;
}
