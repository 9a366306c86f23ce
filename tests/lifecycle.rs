mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use offline_cache::cache::{
    CacheNamespace, CacheStrategyConfig, ClickAction, LifecycleStage, MigrationContext,
    MigrationRegistry, RouteTable, Strategy,
};
use offline_cache::runtime::{CacheStorage, CacheStore, ClientInfo, RuntimeError, SyncHandler};

use support::{Harness, bearer, config, request, response};

fn client(id: &str, url: &str) -> ClientInfo {
    ClientInfo {
        id: id.to_string(),
        url: url.to_string(),
        focused: false,
    }
}

fn precached_config() -> offline_cache::cache::EngineConfig {
    let mut config = config();
    config.offline_fallback = Some("/offline.html".to_string());
    config.precache.main = vec!["/".to_string(), "/offline.html".to_string()];
    config.precache.static_assets = vec!["/app.js".to_string(), "/missing.css".to_string()];
    config
}

async fn seed(harness: &Harness, cache_name: &str, path: &str, body: &str) {
    let cache = harness.storage.open(cache_name).await.unwrap();
    cache
        .put(&request(path).cache_key(), response(200, "text/plain", body))
        .await
        .unwrap();
}

#[tokio::test]
async fn install_prewarms_and_skips_waiting() {
    let harness = Harness::new(precached_config());
    harness.network.respond("/", response(200, "text/html", "home"));
    harness
        .network
        .respond("/offline.html", response(200, "text/html", "offline"));
    harness
        .network
        .respond("/app.js", response(200, "text/javascript", "app"));

    let report = harness.engine.on_install().await.unwrap();

    assert_eq!(report.cached, 3);
    assert_eq!(report.failed, 1, "404 for /missing.css is tolerated");
    assert_eq!(harness.engine.stage(), LifecycleStage::Waiting);
    assert_eq!(harness.registration.skip_waiting_calls(), 1);
    assert!(harness.stored("shop-main-v1", "/offline.html").await.is_some());
    assert!(harness.stored("shop-static-v1", "/app.js").await.is_some());
    assert!(harness.stored("shop-static-v1", "/missing.css").await.is_none());
}

#[tokio::test]
async fn install_survives_offline_network() {
    let harness = Harness::new(precached_config());
    harness.network.set_offline(true);

    let report = harness.engine.on_install().await.unwrap();
    assert_eq!(report.cached, 0);
    assert_eq!(report.failed, 4);
    assert_eq!(harness.engine.stage(), LifecycleStage::Waiting);
}

#[tokio::test]
async fn activate_migrates_then_sweeps_previous_versions() {
    let migrations = MigrationRegistry::new().register("0", "1", |ctx: MigrationContext| async move {
        let previous = ctx.runtime.open_cache(&ctx.previous_cache("main")).await?;
        let current = ctx.runtime.open_cache(&ctx.names.main()).await?;
        for key in previous.keys().await? {
            if let Some(entry) = previous.lookup(&key).await? {
                current.put(&key, entry).await?;
            }
        }
        Ok::<(), RuntimeError>(())
    });
    let harness = Harness::build(config(), Vec::new(), |builder| builder.migrations(migrations));

    seed(&harness, "shop-main-v0", "/drafts", "kept by migration").await;
    seed(&harness, "shop-api-v0-abcdef0123456789", "/api/me", "old").await;
    seed(&harness, "other-main-v1", "/", "not ours").await;

    harness.engine.on_install().await.unwrap();
    let report = harness.engine.on_activate().await.unwrap();

    assert_eq!(report.previous_versions, vec!["0"]);
    assert_eq!(report.migrated, vec!["0"]);
    let mut deleted = report.deleted_caches.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["shop-api-v0-abcdef0123456789", "shop-main-v0"]);

    assert_eq!(
        harness.cache_names().await,
        vec!["other-main-v1", "shop-main-v1"]
    );
    let migrated = harness.stored("shop-main-v1", "/drafts").await.unwrap();
    assert_eq!(migrated.body, "kept by migration");
    assert_eq!(harness.clients.claim_count(), 1);
    assert_eq!(harness.engine.stage(), LifecycleStage::Active);
}

#[tokio::test]
async fn lifecycle_order_is_enforced() {
    let harness = Harness::new(config());
    assert!(harness.engine.on_activate().await.is_err());
    assert_eq!(harness.engine.stage(), LifecycleStage::Installing);

    harness.engine.on_install().await.unwrap();
    assert!(harness.engine.on_install().await.is_err());
    harness.engine.on_activate().await.unwrap();
    harness.engine.on_terminate().unwrap();
    assert_eq!(harness.engine.stage(), LifecycleStage::Terminated);
    assert!(harness.engine.on_terminate().is_err());
}

#[tokio::test]
async fn decommission_is_idempotent() {
    let harness = Harness::build(
        config(),
        vec![
            client("tab-1", "https://shop.test/"),
            client("tab-2", "https://shop.test/orders"),
        ],
        |builder| builder,
    );
    harness
        .network
        .respond("/app.js", response(200, "text/javascript", "app"));
    harness.get("/app.js").await;
    seed(&harness, "shop-main-v0", "/", "old").await;
    seed(&harness, "other-main-v1", "/", "not ours").await;

    let first = harness.engine.on_decommission().await;
    assert!(!first.already_decommissioned);
    assert!(first.unregistered);
    assert_eq!(first.reloaded_clients, 2);
    let mut deleted = first.deleted_caches.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["shop-main-v0", "shop-static-v1"]);
    assert_eq!(harness.cache_names().await, vec!["other-main-v1"]);
    assert_eq!(
        harness.clients.navigations(),
        vec![
            ("tab-1".to_string(), "https://shop.test/".to_string()),
            ("tab-2".to_string(), "https://shop.test/orders".to_string()),
        ]
    );

    let second = harness.engine.on_decommission().await;
    assert!(second.already_decommissioned);
    assert!(second.deleted_caches.is_empty());
    assert_eq!(harness.registration.unregister_calls(), 1);
    assert_eq!(harness.clients.navigations().len(), 2);
    assert_eq!(harness.engine.stage(), LifecycleStage::Decommissioned);
}

/// Routes everything, API paths included, through the fixed `main` cache.
fn main_only_config() -> offline_cache::cache::EngineConfig {
    let mut config = config();
    config.routes = RouteTable::new(
        Vec::new(),
        CacheStrategyConfig::new(
            Strategy::NetworkFirst,
            CacheNamespace::Fixed("shop-main-v1".to_string()),
        ),
    );
    config
}

async fn serve_private_profile(harness: &Harness) -> String {
    let mut profile = response(200, "application/json", r#"{"name":"alice"}"#);
    profile.headers.insert("cache-control", "private");
    harness.network.respond("/api/profile", profile);
    harness.send(bearer("/api/profile", "alice")).await;

    harness
        .cache_names()
        .await
        .into_iter()
        .find(|name| name.starts_with("shop-main-v1-"))
        .expect("per-principal cache under the fixed route")
}

#[tokio::test]
async fn decommission_sweeps_principal_caches_of_fixed_routes() {
    let harness = Harness::new(main_only_config());
    let private_cache = serve_private_profile(&harness).await;

    let report = harness.engine.on_decommission().await;

    assert_eq!(report.deleted_caches, vec![private_cache]);
    assert!(harness.cache_names().await.is_empty());
}

#[tokio::test]
async fn activate_sweeps_principal_caches_of_previous_fixed_routes() {
    let harness = Harness::new(main_only_config());
    seed(&harness, "shop-main-v0-0123456789abcdef", "/api/profile", "old").await;
    seed(&harness, "shop-gallery-v0", "/gallery/1.png", "old").await;
    let current = serve_private_profile(&harness).await;

    harness.engine.on_install().await.unwrap();
    let report = harness.engine.on_activate().await.unwrap();

    assert_eq!(report.previous_versions, vec!["0"]);
    let mut deleted = report.deleted_caches.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["shop-gallery-v0", "shop-main-v0-0123456789abcdef"]);
    assert_eq!(harness.cache_names().await, vec![current]);
}

#[tokio::test]
async fn retired_worker_passes_requests_through() {
    let harness = Harness::new(config());
    harness
        .network
        .respond("/app.js", response(200, "text/javascript", "app"));
    harness.get("/app.js").await;

    harness.engine.on_decommission().await;
    assert!(harness.engine.intercept(&request("/app.js")).await.is_none());
    assert!(harness.cache_names().await.is_empty());
    assert_eq!(harness.network.calls(), 1);
}

#[tokio::test]
async fn terminated_worker_passes_requests_through() {
    let harness = Harness::new(config());
    harness.engine.on_install().await.unwrap();
    harness.engine.on_activate().await.unwrap();
    harness.engine.on_terminate().unwrap();

    assert!(harness.engine.intercept(&request("/app.js")).await.is_none());
    assert!(harness.cache_names().await.is_empty());
}

#[tokio::test]
async fn decommission_waits_for_background_refreshes() {
    let harness = Harness::new(config());
    harness
        .network
        .respond("/about", response(200, "text/html", "about"));
    harness.get("/about").await;
    harness
        .network
        .set_delay(Some(std::time::Duration::from_millis(50)));
    harness.get("/about").await;

    harness.engine.on_decommission().await;
    assert!(harness.cache_names().await.is_empty());
    assert!(!harness.registration.is_registered());
}

#[tokio::test]
async fn push_shows_notification() {
    let harness = Harness::new(config());

    let shown = harness
        .engine
        .on_push(r##"{"title":"Order shipped","body":"#1042 is on its way","url":"/orders/1042"}"##)
        .await
        .unwrap();
    assert_eq!(shown.title, "Order shipped");

    harness.engine.on_push("").await.unwrap();

    let notifications = harness.registration.notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].url, "/orders/1042");
    assert_eq!(notifications[1].title, "New notification");
}

#[tokio::test]
async fn notification_click_focuses_or_opens() {
    let harness = Harness::build(
        config(),
        vec![client("tab-1", "https://shop.test/orders/1042")],
        |builder| builder,
    );

    let focused = harness
        .engine
        .on_notification_click("/orders/1042")
        .await
        .unwrap();
    assert_eq!(
        focused,
        ClickAction::Focused {
            client_id: "tab-1".to_string()
        }
    );
    assert_eq!(harness.clients.focused(), vec!["tab-1"]);

    let opened = harness.engine.on_notification_click("/cart").await.unwrap();
    assert_eq!(
        opened,
        ClickAction::Opened {
            url: "https://shop.test/cart".to_string()
        }
    );
    assert_eq!(harness.clients.opened_windows(), vec!["https://shop.test/cart"]);
}

#[derive(Default)]
struct OutboxReplay {
    runs: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl SyncHandler for OutboxReplay {
    async fn sync(&self, tag: &str) -> Result<(), RuntimeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RuntimeError::Client(format!("{tag}: outbox unavailable")));
        }
        Ok(())
    }
}

#[tokio::test]
async fn background_sync_dispatches_by_tag() {
    let outbox = Arc::new(OutboxReplay::default());
    let broken = Arc::new(OutboxReplay {
        fail: true,
        ..OutboxReplay::default()
    });
    let harness = Harness::build(config(), Vec::new(), |builder| {
        builder
            .sync_handler("outbox", outbox.clone())
            .sync_handler("uploads", broken.clone())
    });

    assert!(harness.engine.on_background_sync("outbox").await.unwrap());
    assert_eq!(outbox.runs.load(Ordering::SeqCst), 1);

    assert!(!harness.engine.on_background_sync("unknown").await.unwrap());

    let err = harness
        .engine
        .on_background_sync("uploads")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Sync { ref tag, .. } if tag == "uploads"));
    assert_eq!(broken.runs.load(Ordering::SeqCst), 1);
}
