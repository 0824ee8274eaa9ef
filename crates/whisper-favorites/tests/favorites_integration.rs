//! Integration tests for FavoritesSync and WhisperContext using wiremock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use whisper_auth::storage::keys;
use whisper_auth::{CredentialPair, PersistenceAdapter, SessionState, TieredStorage, Tier};
use whisper_core::{ClientError, Config};
use whisper_favorites::{FavoriteCandidate, WhisperContext, FAVORITES_CAPACITY};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_user() -> serde_json::Value {
    serde_json::json!({
        "id": 1,
        "email": "a@b.com",
        "username": "alice",
        "created_at": "2025-03-01T08:30:00"
    })
}

fn remote_favorite(id: i64, city: &str, province: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "city_name": city,
        "province": province,
        "created_at": "2025-03-01T08:30:00"
    })
}

fn context_with(server: &MockServer, storage: TieredStorage) -> WhisperContext {
    let mut config = Config::default();
    config.api.base_url = format!("{}/api", server.uri());
    WhisperContext::with_storage(&config, storage).unwrap()
}

/// Context with an authenticated session holding access token `T1`.
fn signed_in(server: &MockServer) -> WhisperContext {
    let context = context_with(server, TieredStorage::in_memory());
    context.session().establish(
        serde_json::from_value(test_user()).unwrap(),
        CredentialPair::new("T1", "R1", "bearer", 1800),
        false,
    );
    context
}

async fn mount_list(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .and(header("Authorization", "bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items))
        .mount(server)
        .await;
}

/// Echoes the added city back with a fresh id, like the real store.
struct CreatedFavorite {
    next_id: AtomicI64,
}

impl CreatedFavorite {
    fn starting_at(id: i64) -> Self {
        Self {
            next_id: AtomicI64::new(id),
        }
    }
}

impl Respond for CreatedFavorite {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = request.body_json().unwrap();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = body.clone();
        record["id"] = serde_json::json!(id);
        ResponseTemplate::new(200).set_body_json(record)
    }
}

#[tokio::test]
async fn test_load_replaces_cache() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([
            remote_favorite(1, "Hangzhou", "Zhejiang"),
            remote_favorite(2, "Chengdu", "Sichuan"),
        ]),
    )
    .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();

    let items = favorites.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "1");
    assert_eq!(items[0].name, "Hangzhou");
    assert_eq!(items[1].province.as_deref(), Some("Sichuan"));
    assert!(!favorites.is_loading());
    assert_eq!(favorites.last_error(), None);
}

#[tokio::test]
async fn test_load_failure_empties_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")])),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();
    assert_eq!(favorites.len(), 1);

    let err = favorites.load().await.unwrap_err();
    assert!(matches!(err, ClientError::ServerError { status: 503, .. }));
    assert!(favorites.is_empty());
    assert_eq!(favorites.last_error(), Some(err));
}

#[tokio::test]
async fn test_add_appends_remote_record() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/favorites/add"))
        .and(header("Authorization", "bearer T1"))
        .respond_with(CreatedFavorite::starting_at(99))
        .expect(1)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();

    let added = favorites
        .add(
            FavoriteCandidate::new("Hangzhou")
                .with_id("local-1")
                .with_province("Zhejiang"),
        )
        .await
        .unwrap();

    assert_eq!(added.id, "99");
    assert!(favorites.contains("99"));
    assert!(!favorites.contains("local-1"));
    assert_eq!(favorites.items().last().map(|f| f.name.as_str()), Some("Hangzhou"));
}

#[tokio::test]
async fn test_add_on_full_cache_makes_no_call() {
    let mock_server = MockServer::start().await;
    let full: Vec<_> = (1..=FAVORITES_CAPACITY as i64)
        .map(|i| remote_favorite(i, &format!("City{}", i), "Province"))
        .collect();
    mount_list(&mock_server, serde_json::Value::Array(full)).await;

    Mock::given(method("POST"))
        .and(path("/api/favorites/add"))
        .respond_with(CreatedFavorite::starting_at(100))
        .expect(0)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();
    assert!(favorites.is_full());

    let err = favorites.add(FavoriteCandidate::new("Overflow")).await.unwrap_err();
    assert_eq!(err, ClientError::CapacityExceeded { capacity: 10 });
    assert_eq!(favorites.len(), FAVORITES_CAPACITY);
    assert_eq!(favorites.last_error(), Some(err));
}

#[tokio::test]
async fn test_add_duplicate_makes_no_call() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/api/favorites/add"))
        .respond_with(CreatedFavorite::starting_at(100))
        .expect(0)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();

    let by_place = favorites
        .add(FavoriteCandidate::new("Hangzhou").with_province("Zhejiang"))
        .await;
    assert_eq!(by_place, Err(ClientError::DuplicateEntry("1".into())));

    let by_id = favorites.add(FavoriteCandidate::new("Elsewhere").with_id("1")).await;
    assert_eq!(by_id, Err(ClientError::DuplicateEntry("1".into())));
    assert_eq!(favorites.len(), 1);
}

#[tokio::test]
async fn test_concurrent_adds_never_exceed_capacity() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/favorites/add"))
        .respond_with(CreatedFavorite::starting_at(1))
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();

    let adds = (0..15).map(|i| favorites.add(FavoriteCandidate::new(format!("City{}", i))));
    let results = futures_util::future::join_all(adds).await;

    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ClientError::CapacityExceeded { .. })))
        .count();
    assert_eq!(rejected, 5);

    let items = favorites.items();
    assert_eq!(items.len(), FAVORITES_CAPACITY);
    let ids: HashSet<_> = items.iter().map(|f| f.id.clone()).collect();
    assert_eq!(ids.len(), items.len());
}

#[tokio::test]
async fn test_remove_unknown_makes_no_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let err = context.favorites().remove("404").await.unwrap_err();
    assert_eq!(err, ClientError::NotFound("404".into()));
}

#[tokio::test]
async fn test_remove_deletes_by_name_and_province() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([
            remote_favorite(1, "New York", "NY"),
            remote_favorite(2, "Chengdu", "Sichuan"),
        ]),
    )
    .await;

    Mock::given(method("DELETE"))
        .and(path("/api/favorites/remove/New%20York"))
        .and(query_param("province", "NY"))
        .and(header("Authorization", "bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "removed"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();

    favorites.remove("1").await.unwrap();
    assert!(!favorites.contains("1"));
    assert_eq!(favorites.len(), 1);
}

#[tokio::test]
async fn test_failed_remove_keeps_entry() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;

    Mock::given(method("DELETE"))
        .and(path("/api/favorites/remove/Hangzhou"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();

    assert!(favorites.remove("1").await.is_err());
    assert!(favorites.contains("1"));
    assert!(matches!(
        favorites.last_error(),
        Some(ClientError::ServerError { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_clear_with_one_failure_is_partial() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([
            remote_favorite(1, "Hangzhou", "Zhejiang"),
            remote_favorite(2, "Chengdu", "Sichuan"),
            remote_favorite(3, "Wuhan", "Hubei"),
        ]),
    )
    .await;

    Mock::given(method("DELETE"))
        .and(path("/api/favorites/remove/Chengdu"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();

    let err = favorites.clear().await.unwrap_err();

    assert_eq!(
        err,
        ClientError::PartialFailure {
            failed: vec!["2".into()]
        }
    );
    let items = favorites.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "2");
    assert_eq!(favorites.last_error(), Some(err));
}

#[tokio::test]
async fn test_unauthenticated_operations_make_no_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/favorites/add"))
        .respond_with(CreatedFavorite::starting_at(1))
        .expect(0)
        .mount(&mock_server)
        .await;

    let context = context_with(&mock_server, TieredStorage::in_memory());
    context.session().enter_guest_mode();
    let favorites = context.favorites();

    assert_eq!(favorites.load().await, Err(ClientError::Unauthenticated));
    assert_eq!(
        favorites.add(FavoriteCandidate::new("Hangzhou")).await,
        Err(ClientError::Unauthenticated)
    );
    favorites.init().await.unwrap();
    assert!(favorites.is_empty());
}

/// Context restored from a persisted session for user 1 (`T1`), listener running.
async fn restored(server: &MockServer) -> WhisperContext {
    let storage = TieredStorage::in_memory();
    storage.set(Tier::Durable, keys::ACCESS_TOKEN, "T1").unwrap();
    storage.set(Tier::Durable, keys::REFRESH_TOKEN, "R1").unwrap();
    storage
        .set(Tier::Durable, keys::USER, &test_user().to_string())
        .unwrap();

    let context = context_with(server, storage);
    assert_eq!(context.restore().await, SessionState::Authenticated);
    context
}

#[tokio::test]
async fn test_logout_empties_cache_immediately() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let context = restored(&mock_server).await;
    let favorites = context.favorites();
    assert_eq!(favorites.len(), 1);

    context.auth().logout().await;

    assert!(favorites.is_empty());
    assert_eq!(favorites.last_error(), None);
}

#[tokio::test]
async fn test_guest_mode_empties_cache_immediately() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;

    let context = restored(&mock_server).await;
    assert_eq!(context.favorites().len(), 1);

    assert_eq!(context.auth().enter_guest_mode(), SessionState::Guest);

    assert!(context.favorites().is_empty());
    assert!(!context.favorites().contains("1"));
}

#[tokio::test]
async fn test_user_switch_replaces_cache() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .and(header("Authorization", "bearer T2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([remote_favorite(7, "Wuhan", "Hubei")])),
        )
        .mount(&mock_server)
        .await;

    let context = restored(&mock_server).await;
    let favorites = context.favorites();
    assert!(favorites.contains("1"));

    context.session().establish(
        serde_json::from_value(serde_json::json!({
            "id": 2,
            "email": "c@d.com",
            "username": "bob",
            "created_at": "2025-03-02T09:00:00"
        }))
        .unwrap(),
        CredentialPair::new("T2", "R2", "bearer", 1800),
        false,
    );
    assert!(!favorites.contains("1"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !favorites.contains("7") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("favorites were not reloaded for the new user");

    assert_eq!(favorites.len(), 1);
    assert!(!favorites.contains("1"));
}

#[tokio::test]
async fn test_load_after_logout_leaves_cache_empty() {
    let mock_server = MockServer::start().await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();
    favorites.load().await.unwrap();
    assert_eq!(favorites.len(), 1);

    context.session().clear();

    assert_eq!(favorites.load().await, Err(ClientError::Unauthenticated));
    assert!(favorites.is_empty());
    assert_eq!(favorites.last_error(), Some(ClientError::Unauthenticated));
}

#[tokio::test]
async fn test_list_arriving_after_logout_is_discarded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/favorites/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&mock_server)
        .await;

    let context = signed_in(&mock_server);
    let favorites = context.favorites();

    let (loaded, _) = tokio::join!(favorites.load(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        context.session().clear();
    });

    assert!(loaded.is_ok());
    assert!(favorites.is_empty());
    assert!(!favorites.is_loading());
}

#[tokio::test]
async fn test_corrupt_session_file_starts_anonymous() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.api.base_url = format!("{}/api", mock_server.uri());
    config.storage.data_dir = dir.path().to_path_buf();
    std::fs::write(config.storage.durable_path(), "{ not json").unwrap();

    let context = WhisperContext::new(&config).unwrap();
    assert_eq!(context.restore().await, SessionState::Anonymous);
    assert!(context.favorites().is_empty());
    assert!(dir.path().join("session.json.corrupt").exists());
}

#[tokio::test]
async fn test_restore_fetches_profile_when_user_missing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header("Authorization", "bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_user()))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_list(
        &mock_server,
        serde_json::json!([remote_favorite(1, "Hangzhou", "Zhejiang")]),
    )
    .await;

    let storage = TieredStorage::in_memory();
    storage.set(Tier::Durable, keys::ACCESS_TOKEN, "T1").unwrap();
    storage.set(Tier::Durable, keys::REFRESH_TOKEN, "R1").unwrap();

    let context = context_with(&mock_server, storage);
    assert_eq!(context.restore().await, SessionState::Authenticated);
    assert_eq!(context.favorites().len(), 1);
}

#[tokio::test]
async fn test_restore_trusts_cached_user() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_user()))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_list(&mock_server, serde_json::json!([])).await;

    let storage = TieredStorage::in_memory();
    storage.set(Tier::Durable, keys::ACCESS_TOKEN, "T1").unwrap();
    storage.set(Tier::Durable, keys::REFRESH_TOKEN, "R1").unwrap();
    storage
        .set(Tier::Durable, keys::USER, &test_user().to_string())
        .unwrap();

    let context = context_with(&mock_server, storage);
    assert_eq!(context.restore().await, SessionState::Authenticated);
}

#[tokio::test]
async fn test_restore_clears_rejected_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "detail": "Could not validate credentials"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = TieredStorage::in_memory();
    storage.set(Tier::Session, keys::ACCESS_TOKEN, "stale").unwrap();
    storage.set(Tier::Session, keys::REFRESH_TOKEN, "stale").unwrap();

    let context = context_with(&mock_server, storage.clone());
    assert_eq!(context.restore().await, SessionState::Anonymous);
    assert!(!context.session().has_credentials());
    assert_eq!(storage.get(Tier::Session, keys::ACCESS_TOKEN).unwrap(), None);
}
