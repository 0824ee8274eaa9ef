//! Favorites synchronizer.
//!
//! Keeps a bounded, deduplicated cache of favorite locations in step with
//! the remote store. The remote store is authoritative: local state only
//! changes after the remote call succeeds.
//!
//! The cache belongs to one session generation. Any access after the session
//! changes identity (logout, guest mode, another sign-in) finds it empty, and
//! results of calls started under the previous identity are dropped.

use futures_util::future::join_all;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use reqwest::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use whisper_auth::{ApiClient, SessionManager};
use whisper_core::{ClientError, ClientResult};

use crate::types::{FavoriteCandidate, FavoriteLocation, RemoteFavorite};

/// Maximum number of cached favorites.
pub const FAVORITES_CAPACITY: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoritesState {
    /// Display order
    pub items: Vec<FavoriteLocation>,
    pub loading: bool,
    pub last_error: Option<ClientError>,
}

#[derive(Debug, Default)]
struct Cache {
    view: FavoritesState,
    /// Session generation the view belongs to
    generation: u64,
}

#[derive(Debug)]
pub struct FavoritesSync {
    api: Arc<ApiClient>,
    cache: Mutex<Cache>,
}

impl FavoritesSync {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            cache: Mutex::new(Cache::default()),
        }
    }

    fn session(&self) -> &Arc<SessionManager> {
        self.api.session()
    }

    /// Lock the cache, emptying it first if the session has moved on.
    fn cache(&self) -> MutexGuard<'_, Cache> {
        // Session lock is released before the cache lock is taken
        let generation = self.session().generation();
        let mut cache = self.cache.lock();
        if generation > cache.generation {
            debug!(from = cache.generation, to = generation, "Session changed, favorites reset");
            cache.view = FavoritesState::default();
            cache.generation = generation;
        }
        cache
    }

    fn state(&self) -> MappedMutexGuard<'_, FavoritesState> {
        MutexGuard::map(self.cache(), |cache| &mut cache.view)
    }

    /// The cache, if it still belongs to `generation`.
    fn state_for(&self, generation: u64) -> Option<MappedMutexGuard<'_, FavoritesState>> {
        let cache = self.cache();
        if cache.generation == generation {
            Some(MutexGuard::map(cache, |cache| &mut cache.view))
        } else {
            None
        }
    }

    /// Record `error` in the last-error slot of `generation` and return it.
    fn fail<T>(&self, generation: u64, error: ClientError) -> ClientResult<T> {
        if let Some(mut state) = self.state_for(generation) {
            state.last_error = Some(error.clone());
        }
        Err(error)
    }

    fn ensure_authenticated(&self) -> ClientResult<()> {
        if self.session().is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::Unauthenticated)
        }
    }

    /// Replace the cache with the remote list.
    ///
    /// On failure the cache is emptied and the error recorded. A list that
    /// arrives after the session changed identity is discarded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> ClientResult<()> {
        let generation = self.session().generation();
        if let Err(e) = self.ensure_authenticated() {
            if let Some(mut state) = self.state_for(generation) {
                state.items.clear();
                state.last_error = Some(e.clone());
            }
            return Err(e);
        }

        if let Some(mut state) = self.state_for(generation) {
            state.loading = true;
        }
        let result = self.fetch_remote().await;

        let Some(mut state) = self.state_for(generation) else {
            debug!("Session changed during load, list discarded");
            return Ok(());
        };
        state.loading = false;
        match result {
            Ok(items) => {
                info!(count = items.len(), "Favorites loaded");
                state.items = items;
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load favorites: {}", e);
                state.items.clear();
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn fetch_remote(&self) -> ClientResult<Vec<FavoriteLocation>> {
        let request = self.api.request(Method::GET, "favorites/list")?;
        let remote: Vec<RemoteFavorite> = self.api.send_json(request).await?;

        let mut items: Vec<FavoriteLocation> = Vec::with_capacity(remote.len());
        for location in remote.into_iter().map(FavoriteLocation::from) {
            if items.iter().any(|f| f.id == location.id) {
                warn!(id = %location.id, "Skipping duplicate remote favorite");
                continue;
            }
            if items.len() == FAVORITES_CAPACITY {
                warn!("Remote favorites exceed capacity, truncating");
                break;
            }
            items.push(location);
        }
        Ok(items)
    }

    /// Add a location, appending the remote's canonical record on success.
    ///
    /// Capacity and duplicate checks run locally first, then again once the
    /// remote record is back, since overlapping adds are not serialized.
    #[instrument(skip(self), fields(name = %candidate.name))]
    pub async fn add(&self, candidate: FavoriteCandidate) -> ClientResult<FavoriteLocation> {
        let generation = self.session().generation();
        if let Err(e) = self.ensure_authenticated() {
            return self.fail(generation, e);
        }
        if let Err(e) = self.check_insertable(&candidate) {
            return self.fail(generation, e);
        }

        let remote: RemoteFavorite = match self.post_add(&candidate).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Failed to add favorite: {}", e);
                return self.fail(generation, e);
            }
        };
        let location = FavoriteLocation::from(remote);

        let Some(mut state) = self.state_for(generation) else {
            warn!(id = %location.id, "Session changed during add, not caching");
            return Err(ClientError::Unauthenticated);
        };
        let conflict = if state
            .items
            .iter()
            .any(|f| f.id == location.id || f.same_place(&location.name, location.province.as_deref()))
        {
            Some(ClientError::DuplicateEntry(location.id.clone()))
        } else if state.items.len() >= FAVORITES_CAPACITY {
            Some(ClientError::CapacityExceeded {
                capacity: FAVORITES_CAPACITY,
            })
        } else {
            None
        };

        if let Some(e) = conflict {
            warn!(id = %location.id, "Concurrent add conflicted, not caching: {}", e);
            state.last_error = Some(e.clone());
            return Err(e);
        }

        info!(id = %location.id, "Favorite added");
        state.items.push(location.clone());
        state.last_error = None;
        Ok(location)
    }

    fn check_insertable(&self, candidate: &FavoriteCandidate) -> ClientResult<()> {
        let state = self.state();
        if state.items.len() >= FAVORITES_CAPACITY {
            return Err(ClientError::CapacityExceeded {
                capacity: FAVORITES_CAPACITY,
            });
        }
        if let Some(existing) = state.items.iter().find(|f| candidate.duplicates(f)) {
            return Err(ClientError::DuplicateEntry(existing.id.clone()));
        }
        Ok(())
    }

    async fn post_add(&self, candidate: &FavoriteCandidate) -> ClientResult<RemoteFavorite> {
        let request = self
            .api
            .request(Method::POST, "favorites/add")?
            .json(&candidate.request());
        self.api.send_json(request).await
    }

    /// Remove the entry with `id`, locally only after the remote delete succeeds.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> ClientResult<()> {
        let generation = self.session().generation();
        if let Err(e) = self.ensure_authenticated() {
            return self.fail(generation, e);
        }

        let existing = self.state().items.iter().find(|f| f.id == id).cloned();
        let Some(existing) = existing else {
            return self.fail(generation, ClientError::NotFound(id.to_string()));
        };

        let path = format!("favorites/remove/{}", urlencoding::encode(&existing.name));
        let result = match self.api.request(Method::DELETE, &path) {
            Ok(mut request) => {
                if let Some(province) = &existing.province {
                    request = request.query(&[("province", province)]);
                }
                self.api.send_empty(request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(id, "Failed to remove favorite: {}", e);
            return self.fail(generation, e);
        }

        let Some(mut state) = self.state_for(generation) else {
            debug!(id, "Session changed during remove");
            return Err(ClientError::Unauthenticated);
        };
        state.items.retain(|f| f.id != id);
        state.last_error = None;
        info!(id, "Favorite removed");
        Ok(())
    }

    /// Remove every cached entry concurrently.
    ///
    /// Not atomic: successful removals stick, and the entries whose removal
    /// failed stay cached and are named in `PartialFailure`.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> ClientResult<()> {
        let generation = self.session().generation();
        if let Err(e) = self.ensure_authenticated() {
            return self.fail(generation, e);
        }

        let ids: Vec<String> = self.state().items.iter().map(|f| f.id.clone()).collect();
        debug!(count = ids.len(), "Clearing favorites");

        let results = join_all(ids.iter().map(|id| self.remove(id))).await;
        let failed: Vec<String> = ids
            .into_iter()
            .zip(results)
            .filter_map(|(id, result)| result.err().map(|_| id))
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            warn!(failed = failed.len(), "Favorites only partially cleared");
            self.fail(generation, ClientError::PartialFailure { failed })
        }
    }

    /// Sync the cache with the session: load when authenticated, otherwise
    /// reset without touching the network.
    pub async fn init(&self) -> ClientResult<()> {
        if self.session().is_authenticated() {
            self.load().await
        } else {
            *self.state() = FavoritesState::default();
            debug!("Favorites reset for unauthenticated session");
            Ok(())
        }
    }

    /// Re-run [`init`](Self::init) whenever the session gains or loses
    /// authentication or changes identity. Runs until the handle is aborted.
    pub fn spawn_session_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.session().subscribe();

        tokio::spawn(async move {
            let mut seen = (
                rx.borrow_and_update().is_authenticated(),
                self.session().generation(),
            );

            // Coalesced updates still show up as a generation change
            while rx.changed().await.is_ok() {
                let now = (
                    rx.borrow_and_update().is_authenticated(),
                    self.session().generation(),
                );
                if now == seen {
                    continue;
                }
                seen = now;

                if let Err(e) = self.init().await {
                    warn!("Favorites sync after session change failed: {}", e);
                }
            }
        })
    }

    pub fn snapshot(&self) -> FavoritesState {
        self.state().clone()
    }

    pub fn items(&self) -> Vec<FavoriteLocation> {
        self.state().items.clone()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= FAVORITES_CAPACITY
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().items.iter().any(|f| f.id == id)
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.state().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn capacity(&self) -> usize {
        FAVORITES_CAPACITY
    }
}
