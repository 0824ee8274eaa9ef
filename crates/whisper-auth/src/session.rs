//! Session state machine.
//!
//! [`SessionManager`] is the single owner of the signed-in user and the
//! credential pair. Every transition mirrors its change into the
//! [`PersistenceAdapter`], then updates memory and publishes the resulting
//! [`SessionState`] on a watch channel.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use whisper_core::{ClientError, ClientResult, FieldErrors};

use crate::storage::{keys, PersistenceAdapter, Tier};
use crate::types::{CredentialPair, User};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Anonymous,
    Guest,
    Authenticated,
    /// Authenticated, with a credential renewal in flight.
    Refreshing,
}

impl SessionState {
    pub fn is_authenticated(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }
}

/// Token-free view of the session for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<User>,
    pub is_guest: bool,
    pub is_loading: bool,
    pub is_authenticated: bool,
}

/// Display-ready description of a failed auth operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthFeedback {
    pub message: String,
    /// Field name to message; empty when the failure is not field-scoped.
    pub fields: FieldErrors,
}

/// Handed out by [`SessionManager::begin_refresh`]; ties a renewal to the
/// session it was started for.
#[derive(Debug)]
pub struct RefreshTicket {
    refresh_token: String,
    generation: u64,
}

impl RefreshTicket {
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }
}

#[derive(Default)]
struct Session {
    user: Option<User>,
    credentials: Option<CredentialPair>,
    guest: bool,
    loading: bool,
    /// Renewals in flight
    refreshing: u32,
    remember: bool,
    /// Bumped whenever the signed-in identity is replaced or dropped.
    generation: u64,
}

impl Session {
    /// Fresh session for the next identity.
    fn next(&self) -> Session {
        Session {
            generation: self.generation + 1,
            ..Session::default()
        }
    }

    fn state(&self) -> SessionState {
        match (&self.user, &self.credentials) {
            (Some(_), Some(_)) if self.refreshing > 0 => SessionState::Refreshing,
            (Some(_), Some(_)) => SessionState::Authenticated,
            _ if self.guest => SessionState::Guest,
            _ => SessionState::Anonymous,
        }
    }
}

pub struct SessionManager {
    storage: Arc<dyn PersistenceAdapter>,
    inner: Mutex<Session>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Create an empty (anonymous) session. Call [`hydrate`](Self::hydrate)
    /// to pick up persisted credentials.
    pub fn new(storage: Arc<dyn PersistenceAdapter>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Anonymous);
        Self {
            storage,
            inner: Mutex::new(Session::default()),
            state_tx,
        }
    }

    /// Restore credentials from storage.
    ///
    /// The durable tier is consulted before the session tier, and a tier only
    /// counts when it holds both tokens. The user record is read from the same
    /// tier as the tokens.
    pub fn hydrate(&self) -> SessionState {
        let remember = self.read(Tier::Durable, keys::REMEMBER_ME).as_deref() == Some("true");

        let restored = Tier::ALL.into_iter().find_map(|tier| {
            let access = self.read(tier, keys::ACCESS_TOKEN)?;
            let refresh = self.read(tier, keys::REFRESH_TOKEN)?;
            Some((
                tier,
                CredentialPair::new(access, refresh, CredentialPair::DEFAULT_SCHEME, 0),
            ))
        });

        let Some((tier, credentials)) = restored else {
            debug!("No persisted credentials found");
            let mut session = self.inner.lock();
            session.remember = remember;
            return self.publish(&session);
        };

        let user = self.read(tier, keys::USER).and_then(|raw| {
            serde_json::from_str::<User>(&raw)
                .map_err(|e| warn!("Discarding unreadable persisted user: {}", e))
                .ok()
        });

        info!(
            tier = tier.name(),
            has_user = user.is_some(),
            "Restored persisted credentials"
        );

        let mut session = self.inner.lock();
        *session = Session {
            user,
            credentials: Some(credentials),
            remember: remember || tier == Tier::Durable,
            ..session.next()
        };
        self.publish(&session)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.inner.lock();
        let state = session.state();
        SessionSnapshot {
            state,
            user: session.user.clone(),
            is_guest: session.guest,
            is_loading: session.loading,
            is_authenticated: state.is_authenticated(),
        }
    }

    /// Pure predicate over in-memory state; never touches storage.
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// `"<scheme> <access_token>"`, or `None` without credentials.
    pub fn auth_header_value(&self) -> Option<String> {
        self.inner
            .lock()
            .credentials
            .as_ref()
            .map(CredentialPair::header_value)
    }

    pub fn has_credentials(&self) -> bool {
        self.inner.lock().credentials.is_some()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock().user.clone()
    }

    /// Identity counter. Changes on every login, logout, guest entry and
    /// credential restore; stays put across refreshes and profile updates.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Whether credentials are kept in the durable tier.
    pub fn remembers(&self) -> bool {
        self.inner.lock().remember
    }

    /// Receive every published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Install a freshly signed-in user.
    ///
    /// Any previously persisted session is purged first. Tokens are written
    /// before the user record; the remember flag only ever lands in the
    /// durable tier.
    pub fn establish(&self, user: User, credentials: CredentialPair, remember: bool) -> SessionState {
        // Storage is only touched under the session lock
        let mut session = self.inner.lock();
        self.purge();

        let tier = tier_for(remember);
        self.persist_credentials(tier, &credentials);
        self.persist_user(tier, &user);
        if remember {
            self.write(Tier::Durable, keys::REMEMBER_ME, "true");
        }

        info!(user_id = user.id, tier = tier.name(), "Session established");

        *session = Session {
            user: Some(user),
            credentials: Some(credentials),
            loading: session.loading,
            remember,
            ..session.next()
        };
        self.publish(&session)
    }

    /// Replace the user record, persisting it next to the tokens.
    pub fn set_user(&self, user: User) -> SessionState {
        let mut session = self.inner.lock();
        self.persist_user(tier_for(session.remember), &user);
        session.user = Some(user);
        self.publish(&session)
    }

    pub fn enter_guest_mode(&self) -> SessionState {
        let mut session = self.inner.lock();
        self.purge();
        info!("Entered guest mode");

        *session = Session {
            guest: true,
            ..session.next()
        };
        self.publish(&session)
    }

    /// Drop everything, in memory and in both tiers.
    pub fn clear(&self) -> SessionState {
        let mut session = self.inner.lock();
        self.purge();
        info!("Session cleared");

        *session = session.next();
        self.publish(&session)
    }

    pub fn set_loading(&self, loading: bool) {
        self.inner.lock().loading = loading;
    }

    /// Enter the refreshing sub-state and hand out the refresh token.
    pub fn begin_refresh(&self) -> ClientResult<RefreshTicket> {
        let mut session = self.inner.lock();
        let refresh_token = session
            .credentials
            .as_ref()
            .map(|c| c.refresh_token.clone())
            .ok_or(ClientError::Unauthenticated)?;

        session.refreshing += 1;
        self.publish(&session);
        Ok(RefreshTicket {
            refresh_token,
            generation: session.generation,
        })
    }

    /// Swap in renewed credentials under the recorded remember preference.
    ///
    /// Ignored when the session the ticket was issued for has ended.
    pub fn complete_refresh(&self, ticket: &RefreshTicket, credentials: CredentialPair) -> SessionState {
        let mut session = self.inner.lock();
        if session.generation != ticket.generation || session.credentials.is_none() {
            warn!("Discarding refreshed credentials for a session that has ended");
            return session.state();
        }

        self.persist_credentials(tier_for(session.remember), &credentials);
        info!("Credentials refreshed");

        session.credentials = Some(credentials);
        session.refreshing = session.refreshing.saturating_sub(1);
        self.publish(&session)
    }

    /// Leave the refreshing sub-state with the prior credentials intact.
    pub fn abort_refresh(&self, ticket: &RefreshTicket) -> SessionState {
        let mut session = self.inner.lock();
        if session.generation == ticket.generation {
            session.refreshing = session.refreshing.saturating_sub(1);
        }
        self.publish(&session)
    }

    /// Map a gateway error to what the sign-in form should show.
    pub fn describe_failure(error: &ClientError) -> AuthFeedback {
        let mut message = error.user_message();
        if let ClientError::Unauthorized {
            locked_until: Some(until),
            ..
        } = error
        {
            message = format!("{} Account locked until {}.", message, until);
        }

        AuthFeedback {
            message,
            fields: error.field_errors().cloned().unwrap_or_default(),
        }
    }

    fn publish(&self, session: &Session) -> SessionState {
        let state = session.state();
        self.state_tx.send_replace(state);
        debug!(?state, "Session state published");
        state
    }

    fn read(&self, tier: Tier, key: &str) -> Option<String> {
        self.storage.get(tier, key).unwrap_or_else(|e| {
            warn!(tier = tier.name(), key, "Failed to read session key: {:#}", e);
            None
        })
    }

    fn write(&self, tier: Tier, key: &str, value: &str) {
        if let Err(e) = self.storage.set(tier, key, value) {
            warn!(tier = tier.name(), key, "Failed to persist session key: {:#}", e);
        }
    }

    fn purge(&self) {
        for tier in Tier::ALL {
            for key in keys::ALL {
                if let Err(e) = self.storage.remove(tier, key) {
                    warn!(tier = tier.name(), key, "Failed to remove session key: {:#}", e);
                }
            }
        }
    }

    fn persist_credentials(&self, tier: Tier, credentials: &CredentialPair) {
        self.write(tier, keys::ACCESS_TOKEN, &credentials.access_token);
        self.write(tier, keys::REFRESH_TOKEN, &credentials.refresh_token);
    }

    fn persist_user(&self, tier: Tier, user: &User) {
        match serde_json::to_string(user) {
            Ok(json) => self.write(tier, keys::USER, &json),
            Err(e) => warn!("Failed to encode user record: {}", e),
        }
    }
}

fn tier_for(remember: bool) -> Tier {
    if remember {
        Tier::Durable
    } else {
        Tier::Session
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
