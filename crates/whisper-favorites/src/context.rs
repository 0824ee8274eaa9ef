//! Process-wide wiring of the client components.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use whisper_auth::{ApiClient, AuthGateway, SessionManager, SessionState, TieredStorage};
use whisper_core::Config;

use crate::sync::FavoritesSync;

/// Owns one instance of every component; built once per process.
///
/// After [`restore`](Self::restore) the context also owns the task that
/// reloads favorites on session changes. It is stopped on drop.
#[derive(Debug)]
pub struct WhisperContext {
    session: Arc<SessionManager>,
    api: Arc<ApiClient>,
    auth: AuthGateway,
    favorites: Arc<FavoritesSync>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl WhisperContext {
    /// Build the context with the durable tier backed by the configured data directory.
    pub fn new(config: &Config) -> Result<Self> {
        let storage = TieredStorage::with_durable_file(config.storage.durable_path())?;
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: &Config, storage: TieredStorage) -> Result<Self> {
        let session = Arc::new(SessionManager::new(Arc::new(storage)));
        let api = Arc::new(ApiClient::new(&config.api, session.clone())?);
        let auth = AuthGateway::new(api.clone());
        let favorites = Arc::new(FavoritesSync::new(api.clone()));

        Ok(Self {
            session,
            api,
            auth,
            favorites,
            listener: Mutex::new(None),
        })
    }

    /// Restore the persisted session, prime the favorites cache and start
    /// following session changes.
    ///
    /// The cached user record is trusted as-is. The profile is only fetched
    /// when tokens were restored without one; if the server rejects them the
    /// session is cleared. Network failures are logged and leave the restored
    /// credentials in place.
    pub async fn restore(&self) -> SessionState {
        self.session.hydrate();

        if self.session.has_credentials() && self.session.user().is_none() {
            match self.auth.fetch_profile().await {
                Ok(user) => info!(user_id = user.id, "Profile fetched for restored session"),
                Err(e) if e.should_reauthenticate() => {
                    warn!("Restored credentials rejected, clearing session: {}", e);
                    self.session.clear();
                }
                Err(e) => warn!("Could not fetch profile for restored session: {}", e),
            }
        }

        if let Err(e) = self.favorites.init().await {
            warn!("Initial favorites sync failed: {}", e);
        }
        self.listen();

        self.session.state()
    }

    /// Start the favorites listener unless it is already running.
    fn listen(&self) {
        let mut listener = self.listener.lock();
        if listener.is_none() {
            *listener = Some(self.favorites.clone().spawn_session_listener());
            debug!("Favorites listener started");
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn auth(&self) -> &AuthGateway {
        &self.auth
    }

    pub fn favorites(&self) -> &Arc<FavoritesSync> {
        &self.favorites
    }
}

impl Drop for WhisperContext {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
