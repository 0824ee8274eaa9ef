//! Account and credential types, plus the auth endpoints' wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whisper_core::{ClientError, ClientResult};

/// Signed-in account as returned by `auth/login` and `auth/profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Display name
    pub username: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub last_login: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Access/refresh token pair.
///
/// Tokens never leave the crate except through
/// [`SessionManager::auth_header_value`](crate::SessionManager::auth_header_value).
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) token_type: String,
    /// Lifetime hint in seconds; 0 when unknown (e.g. restored from storage).
    pub(crate) expires_in: u64,
}

impl CredentialPair {
    pub const DEFAULT_SCHEME: &'static str = "bearer";

    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            expires_in,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// `"<scheme> <access_token>"`
    pub(crate) fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Token payload of `auth/login` and `auth/refresh`.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_scheme")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
}

fn default_scheme() -> String {
    CredentialPair::DEFAULT_SCHEME.to_string()
}

impl From<TokenResponse> for CredentialPair {
    fn from(tokens: TokenResponse) -> Self {
        CredentialPair::new(
            tokens.access_token,
            tokens.refresh_token,
            tokens.token_type,
            tokens.expires_in,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub remember_me: bool,
}

#[derive(Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub remaining_attempts: Option<u32>,
    pub locked_until: Option<String>,
    pub user: Option<User>,
    pub tokens: Option<TokenResponse>,
}

impl LoginResponse {
    /// Split a successful response into its parts; anything else is a rejection
    /// carrying the lockout hints verbatim.
    pub fn into_session(self) -> ClientResult<(User, CredentialPair)> {
        match (self.success, self.user, self.tokens) {
            (true, Some(user), Some(tokens)) => Ok((user, tokens.into())),
            _ => Err(ClientError::Unauthorized {
                message: if self.message.is_empty() {
                    "Login failed".to_string()
                } else {
                    self.message
                },
                remaining_attempts: self.remaining_attempts,
                locked_until: self.locked_until,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Summary of a freshly created account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub user: Option<RegisteredUser>,
}

impl RegisterResponse {
    pub fn into_user(self) -> ClientResult<RegisteredUser> {
        match (self.success, self.user) {
            (true, Some(user)) => Ok(user),
            (true, None) => Err(ClientError::server(0, "Registration response missing user")),
            (false, _) if self.message.is_empty() => Err(ClientError::validation("Registration failed")),
            (false, _) => Err(ClientError::validation(self.message)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Lenient timestamp (de)serialization.
///
/// The server emits naive ISO-8601 values (no offset) for some fields;
/// those are read as UTC. Output is always RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
                None => Ok(None),
            }
        }
    }
}
