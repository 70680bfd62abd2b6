use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheLayer, NoopStorage, ResponseStorage, SqliteResponseStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{EventHandler, SyncEvent};
use crate::kv::KvStore;
use crate::net::{ApiClient, HttpRequest, Transport};
use crate::notify::{self, Level, LogNotifier, NoopNotifier, Notification, Notifier};
use crate::queue::{
  select_backend, ActionQueue, ActionStore, BackendChoice, KvActionStore, SqliteActionStore,
};
use crate::sync::{DrainReport, SyncExecutor};

/// Response cache with the backend picked at startup
pub type ResponseCache = CacheLayer<Box<dyn ResponseStorage>>;

/// All services, wired in dependency order.
///
/// `new` only opens storage. Trigger sources start in `init` and stop in
/// `shutdown`.
pub struct App {
  config: Config,
  queue: ActionQueue,
  cache: ResponseCache,
  transport: Arc<dyn Transport>,
  notifier: Arc<dyn Notifier>,
  executor: SyncExecutor,
  events: EventHandler,
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
      Arc::new(LogNotifier)
    } else {
      Arc::new(NoopNotifier)
    };
    Self::with_notifier(config, notifier)
  }

  pub fn with_notifier(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let events = EventHandler::new();

    // Storage
    let db_path = data_dir.join("state.db");
    let db = match Database::open(&db_path) {
      Ok(db) => Some(Arc::new(db)),
      Err(e) => {
        tracing::warn!(error = %e, "state database unavailable");
        None
      }
    };

    let selection = select_backend(&config.storage, || {
      db.clone()
        .map(|db| Arc::new(SqliteActionStore::new(db)) as Arc<dyn ActionStore>)
        .ok_or_else(|| eyre!("database unavailable at {}", db_path.display()))
    });
    let kv = Arc::new(KvStore::open(&data_dir.join("offline-actions.json"))?);
    let queue = ActionQueue::new(selection, Arc::new(KvActionStore::new(kv)))
      .with_trigger(events.sender());

    let storage: Box<dyn ResponseStorage> = match (&db, config.cache.enabled) {
      (Some(db), true) => Box::new(SqliteResponseStorage::new(Arc::clone(db))),
      (None, true) => {
        tracing::warn!("response caching disabled: no database");
        Box::new(NoopStorage)
      }
      (_, false) => Box::new(NoopStorage),
    };
    let cache = CacheLayer::new(storage, &config.cache);

    // Network and sync
    let transport: Arc<dyn Transport> = Arc::new(ApiClient::new(&config.server)?);
    let executor = SyncExecutor::new(queue.clone(), Arc::clone(&transport), Arc::clone(&notifier));

    Ok(Self {
      config,
      queue,
      cache,
      transport,
      notifier,
      executor,
      events,
      should_quit: false,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn queue(&self) -> &ActionQueue {
    &self.queue
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub fn transport(&self) -> &dyn Transport {
    self.transport.as_ref()
  }

  pub fn notifier(&self) -> &dyn Notifier {
    self.notifier.as_ref()
  }

  pub fn backend(&self) -> &BackendChoice {
    self.queue.backend()
  }

  /// Install and activate the current cache generation, start the trigger
  /// sources, then drain whatever is already queued.
  pub async fn init(&mut self) -> Result<()> {
    if self.config.cache.enabled {
      if !self.cache.is_installed()? {
        self
          .cache
          .install(self.transport.as_ref(), &self.config.cache.static_assets)
          .await;
      }
      let deleted = self.cache.activate()?;
      if !deleted.is_empty() {
        tracing::info!(deleted = ?deleted, "old cache generations purged");
      }
    }

    let sync = &self.config.sync;
    self
      .events
      .start_periodic(Duration::from_secs(sync.periodic_interval_secs));
    self.events.start_connectivity_monitor(
      Arc::clone(&self.transport),
      HttpRequest::get(&sync.health_path),
      Duration::from_secs(sync.probe_interval_secs),
    );
    self
      .events
      .start_queue_watch(self.queue.clone(), Duration::from_millis(sync.queue_poll_millis));

    match self.backend() {
      BackendChoice::Primary { name } => tracing::info!(backend = *name, "sync service started"),
      BackendChoice::FallbackOnly { reason } => {
        tracing::info!(backend = "kv", reason = %reason, "sync service started")
      }
    }

    if !self.queue.list_all().is_empty() {
      self.executor.drain().await;
    }

    Ok(())
  }

  /// Process trigger events until Ctrl-C or shutdown.
  pub async fn run(&mut self) -> Result<()> {
    while !self.should_quit {
      let event = tokio::select! {
        event = self.events.next() => event,
        _ = tokio::signal::ctrl_c() => {
          tracing::info!("interrupt received");
          None
        }
      };

      match event {
        Some(event) => {
          self.handle_event(event).await;
        }
        None => self.should_quit = true,
      }
    }
    Ok(())
  }

  pub async fn handle_event(&mut self, event: SyncEvent) -> Option<DrainReport> {
    tracing::debug!(event = ?event, "sync event");
    match event {
      SyncEvent::ActionQueued | SyncEvent::Manual => Some(self.executor.drain().await),
      SyncEvent::PeriodicTick => {
        let report = self.executor.drain().await;
        if self.config.cache.enabled {
          let refreshed = self
            .cache
            .refresh(self.transport.as_ref(), &self.config.sync.refresh_urls)
            .await;
          tracing::info!(refreshed, "periodic data sync finished");
        }
        Some(report)
      }
      SyncEvent::ConnectivityRestored => {
        notify::report(
          self.notifier.as_ref(),
          Notification::new(Level::Success, "Online", "Connection restored").with_tag("connectivity"),
        );
        Some(self.executor.drain().await)
      }
      SyncEvent::ConnectivityLost => {
        notify::report(
          self.notifier.as_ref(),
          Notification::new(
            Level::Warning,
            "Offline",
            "Connection lost. Working offline; changes will sync later.",
          )
          .with_tag("connectivity"),
        );
        None
      }
    }
  }

  /// Drain once, outside the event loop.
  pub async fn drain(&self) -> DrainReport {
    self.executor.drain().await
  }

  pub fn shutdown(&mut self) {
    self.should_quit = true;
    self.events.shutdown();
    tracing::info!("sync service stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{CacheConfig, ServerConfig, StorageConfig, SyncConfig};
  use crate::notify::testing::RecordingNotifier;
  use crate::queue::NewAction;
  use serde_json::json;
  use std::path::Path;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn config(server: &str, data_dir: &Path) -> Config {
    Config {
      server: ServerConfig {
        url: server.to_string(),
        timeout_secs: 2,
      },
      cache: CacheConfig {
        static_assets: vec!["/offline".to_string()],
        ..CacheConfig::default()
      },
      sync: SyncConfig {
        periodic_interval_secs: 0,
        ..SyncConfig::default()
      },
      storage: StorageConfig {
        data_dir: Some(data_dir.to_path_buf()),
        force_fallback: false,
      },
      notifications: Default::default(),
    }
  }

  #[tokio::test]
  async fn borrow_queued_offline_syncs_when_connectivity_returns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/transactions/borrow"))
      .and(body_json(json!({"isbn": "123", "school_no": "42"})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut app = App::with_notifier(config(&server.uri(), dir.path()), notifier.clone()).unwrap();
    assert_eq!(app.backend(), &BackendChoice::Primary { name: "sqlite" });

    let action = app
      .queue()
      .enqueue(NewAction::json(
        "borrow",
        "POST",
        "/api/transactions/borrow",
        json!({"isbn": "123", "school_no": "42"}),
      ))
      .unwrap();
    assert_eq!(app.queue().list_all(), vec![action]);

    let report = app
      .handle_event(SyncEvent::ConnectivityRestored)
      .await
      .unwrap();

    assert_eq!(report.replayed, 1);
    assert!(app.queue().list_all().is_empty());
    let synced: Vec<_> = notifier
      .seen()
      .into_iter()
      .filter(|n| n.tag.as_deref() == Some("sync-success"))
      .collect();
    assert_eq!(synced.len(), 1);
    assert!(synced[0].body.contains("borrow"));
  }

  #[tokio::test]
  async fn enqueue_event_drives_a_drain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/transactions/return"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = App::new(config(&server.uri(), dir.path())).unwrap();
    app
      .queue()
      .enqueue(NewAction::json("return", "POST", "/api/transactions/return", json!({})))
      .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), app.events.next())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event, SyncEvent::ActionQueued);

    let report = app.handle_event(event).await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(app.queue().list_all().is_empty());
  }

  #[tokio::test]
  async fn serve_notices_actions_queued_by_another_process() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/transactions/borrow"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
      .expect(1)
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&server.uri(), dir.path());
    let mut serve = App::new(cfg.clone()).unwrap();
    serve
      .events
      .start_queue_watch(serve.queue.clone(), Duration::from_millis(10));

    // A one-shot CLI invocation: its own App, its own event channel
    let cli = App::new(cfg).unwrap();
    cli
      .queue()
      .enqueue(NewAction::json("borrow", "POST", "/api/transactions/borrow", json!({})))
      .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), serve.events.next())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event, SyncEvent::ActionQueued);

    let report = serve.handle_event(event).await.unwrap();
    assert_eq!(report.replayed, 1);
    assert!(cli.queue().list_all().is_empty());
    serve.shutdown();
  }

  #[tokio::test]
  async fn queued_actions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on port 9
    let cfg = config("http://127.0.0.1:9", dir.path());

    let id = {
      let app = App::new(cfg.clone()).unwrap();
      let action = app
        .queue()
        .enqueue(NewAction::json("return", "POST", "/api/transactions/return", json!({})))
        .unwrap();
      assert_eq!(app.drain().await.failed, 1);
      action.id
    };

    let app = App::new(cfg).unwrap();
    let ids: Vec<String> = app.queue().list_all().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![id]);
  }

  #[tokio::test]
  async fn init_installs_and_activates_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/offline"))
      .respond_with(ResponseTemplate::new(200).set_body_string("offline page"))
      .mount(&server)
      .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = App::new(config(&server.uri(), dir.path())).unwrap();
    app
      .cache()
      .storage()
      .put("cal-library-v0.9.0", "/", &crate::net::HttpResponse::new(200, "stale"))
      .unwrap();

    app.init().await.unwrap();
    app.shutdown();

    assert!(app.cache().is_installed().unwrap());
    assert_eq!(
      app.cache().storage().cache_names().unwrap(),
      vec!["cal-library-v1.1.0".to_string()]
    );
  }

  #[tokio::test]
  async fn connectivity_lost_only_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let mut app =
      App::with_notifier(config("http://127.0.0.1:9", dir.path()), notifier.clone()).unwrap();

    assert!(app.handle_event(SyncEvent::ConnectivityLost).await.is_none());
    assert_eq!(notifier.seen()[0].level, Level::Warning);
  }

  #[tokio::test]
  async fn forced_fallback_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config("http://127.0.0.1:9", dir.path());
    cfg.storage.force_fallback = true;

    let app = App::new(cfg).unwrap();
    assert!(matches!(app.backend(), BackendChoice::FallbackOnly { .. }));

    app
      .queue()
      .enqueue(NewAction::json("borrow", "POST", "/api/transactions/borrow", json!({})))
      .unwrap();
    assert!(dir.path().join("offline-actions.json").exists());
  }
}
