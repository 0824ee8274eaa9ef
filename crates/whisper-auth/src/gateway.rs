//! Auth gateway: register, login, logout, refresh and profile requests.
//!
//! Each function performs one exchange with the `auth/` endpoints and hands
//! the result to the [`SessionManager`]. Auth paths are never decorated by
//! the request gateway; `logout` and `profile` attach the header themselves.

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use whisper_core::{ClientError, ClientResult};

use crate::http::ApiClient;
use crate::session::{SessionManager, SessionState};
use crate::types::{
    CredentialPair, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest,
    RegisterResponse, RegisteredUser, TokenResponse, User,
};
use crate::validate::FieldRules;

/// How the remote side took a logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Server acknowledged the logout.
    Delivered,
    /// No credential was held, nothing to notify.
    Skipped,
    /// Notification failed; the local session is gone regardless.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct AuthGateway {
    api: Arc<ApiClient>,
    rules: Option<FieldRules>,
}

impl AuthGateway {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api, rules: None }
    }

    /// Check form values with `rules` before login and register requests.
    pub fn with_rules(mut self, rules: FieldRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.api.session()
    }

    fn check_fields(&self, values: &[(&str, &str)]) -> ClientResult<()> {
        match &self.rules {
            Some(rules) => rules.check(values),
            None => Ok(()),
        }
    }

    /// Create an account. Does not sign in.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<RegisteredUser> {
        self.check_fields(&[("email", email), ("username", username), ("password", password)])?;

        let session = self.session();
        session.set_loading(true);
        let result = self.post_register(email, username, password).await;
        session.set_loading(false);

        match &result {
            Ok(user) => info!(user_id = user.id, "Account registered"),
            Err(e) => warn!("Registration failed: {}", e),
        }
        result
    }

    async fn post_register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> ClientResult<RegisteredUser> {
        let request = self.api.request(Method::POST, "auth/register")?.json(&RegisterRequest {
            email,
            username,
            password,
        });
        let response: RegisterResponse = self.api.send_json(request).await?;
        response.into_user()
    }

    /// Sign in and move the session to `Authenticated`.
    ///
    /// With `remember` set the credentials land in the durable tier,
    /// otherwise in the session tier only.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str, remember: bool) -> ClientResult<User> {
        self.check_fields(&[("email", email), ("password", password)])?;

        let session = self.session();
        session.set_loading(true);
        let result = self.post_login(email, password, remember).await;
        session.set_loading(false);

        let (user, credentials) = result.map_err(|e| {
            warn!("Login failed: {}", e);
            e
        })?;

        session.establish(user.clone(), credentials, remember);
        Ok(user)
    }

    async fn post_login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> ClientResult<(User, CredentialPair)> {
        let request = self.api.request(Method::POST, "auth/login")?.json(&LoginRequest {
            email,
            password,
            remember_me,
        });
        let response: LoginResponse = self.api.send_json(request).await?;
        response.into_session()
    }

    /// Tear the session down locally, then tell the server.
    ///
    /// Never fails: the local teardown is unconditional and the remote
    /// outcome is only reported.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> LogoutOutcome {
        let session = self.session();
        let header = session.auth_header_value();
        session.clear();

        let Some(header) = header else {
            return LogoutOutcome::Skipped;
        };

        let result = match self.api.request(Method::POST, "auth/logout") {
            Ok(request) => {
                self.api
                    .send_empty(request.header(AUTHORIZATION, header))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Logout delivered");
                LogoutOutcome::Delivered
            }
            Err(e) => {
                warn!("Remote logout failed, local session already cleared: {}", e);
                LogoutOutcome::Failed(e.to_string())
            }
        }
    }

    /// Renew the credential pair.
    ///
    /// Fails with `Unauthenticated` before any network call when no refresh
    /// token is held. On failure the previous credentials stay installed and
    /// the caller decides whether to log out.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> ClientResult<()> {
        let session = self.session();
        let ticket = session.begin_refresh()?;

        match self.post_refresh(ticket.refresh_token()).await {
            Ok(credentials) => {
                session.complete_refresh(&ticket, credentials);
                Ok(())
            }
            Err(e) => {
                session.abort_refresh(&ticket);
                warn!("Credential refresh failed: {}", e);
                Err(e)
            }
        }
    }

    async fn post_refresh(&self, refresh_token: &str) -> ClientResult<CredentialPair> {
        let request = self
            .api
            .request(Method::POST, "auth/refresh")?
            .json(&RefreshRequest { refresh_token });

        // A rejected refresh token comes back as a plain 400
        let tokens: TokenResponse = self.api.send_json(request).await.map_err(|e| match e {
            ClientError::ValidationRejected { message, .. } => ClientError::unauthorized(message),
            other => other,
        })?;
        Ok(tokens.into())
    }

    /// Fetch the signed-in user's profile and install it.
    #[instrument(skip(self))]
    pub async fn fetch_profile(&self) -> ClientResult<User> {
        let session = self.session();
        let header = session
            .auth_header_value()
            .ok_or(ClientError::Unauthenticated)?;

        let request = self
            .api
            .request(Method::GET, "auth/profile")?
            .header(AUTHORIZATION, header);
        let user: User = self.api.send_json(request).await?;

        session.set_user(user.clone());
        Ok(user)
    }

    pub fn enter_guest_mode(&self) -> SessionState {
        self.session().enter_guest_mode()
    }
}
