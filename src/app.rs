use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use fieldops::backend::{CachedBackend, Entity, ListQuery, RestClient};
use fieldops::cache::{
  CacheResult, CacheSource, DurableStore, Janitor, MemoryStore, SqliteStore, TieredCache,
};
use fieldops::clock::{Clock, SystemClock};
use fieldops::config::Config;
use fieldops::executor::RetryExecutor;
use fieldops::probe::ConnectionProbe;
use fieldops::query::{CachedQuery, CachedQueryOptions, QueryClient};
use fieldops::session::{AuthProvider, RestAuthProvider, SessionGuard};

use crate::event::{Event, EventHandler};

/// The wired-up console: one instance of every service, shared by all
/// commands.
pub struct App {
  clock: Arc<dyn Clock>,
  auth: Arc<RestAuthProvider>,
  backend: CachedBackend,
  probe: ConnectionProbe,
  _janitor: Janitor,
}

impl App {
  pub fn new(config: Config, no_cache: bool) -> Result<Self> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let base_url =
      Url::parse(&config.backend.url).map_err(|e| eyre!("Invalid backend URL: {}", e))?;
    let anon_key = config.anon_key()?;
    let http = reqwest::Client::builder()
      .user_agent(concat!("fieldops/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // The session always persists; cached query results only when enabled
    let disk: Arc<dyn DurableStore> = match &config.cache.path {
      Some(path) => Arc::new(SqliteStore::open_at(path)?),
      None => Arc::new(SqliteStore::open()?),
    };
    let cache_store: Arc<dyn DurableStore> = if no_cache || !config.cache.persist {
      Arc::new(MemoryStore::new())
    } else {
      disk.clone()
    };

    let auth = Arc::new(RestAuthProvider::new(
      http.clone(),
      base_url.clone(),
      anon_key.clone(),
      disk,
      clock.clone(),
    ));
    let guard = SessionGuard::new(auth.clone(), clock.clone()).with_refresh_threshold(
      ChronoDuration::seconds(config.session.refresh_threshold_secs),
    );
    let executor = RetryExecutor::new(guard, config.query.policy());

    let cache = Arc::new(
      TieredCache::new(cache_store, clock.clone())
        .with_default_ttl(ChronoDuration::seconds(config.cache.default_ttl_secs))
        .with_prefix(config.cache.key_prefix.clone()),
    );
    let janitor = Janitor::spawn(
      cache.clone(),
      Duration::from_secs(config.cache.janitor_interval_secs),
    );

    let client = RestClient::new(http, base_url, anon_key, auth.clone());
    let queries = QueryClient::new(cache, executor);
    let probe = ConnectionProbe::for_backend(
      queries.executor().clone(),
      client.clone(),
      Duration::from_millis(config.probe.timeout_ms),
    );
    let backend = CachedBackend::new(client, queries);

    Ok(Self {
      clock,
      auth,
      backend,
      probe,
      _janitor: janitor,
    })
  }

  pub async fn login(&self) -> Result<()> {
    let (email, password) = Config::credentials()?;
    let session = self.auth.sign_in_with_password(&email, &password).await?;
    println!(
      "Signed in as {} (token valid until {})",
      session.email.as_deref().unwrap_or(&email),
      session.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
  }

  /// Sign out. The guard's hook clears the cache even if revocation fails.
  pub async fn logout(&self) -> Result<()> {
    self.backend.queries().executor().guard().sign_out().await?;
    println!("Signed out");
    Ok(())
  }

  pub async fn status(&self) -> Result<()> {
    match self.auth.session().await {
      Some(session) => {
        let now = self.clock.now();
        let who = session.email.as_deref().unwrap_or("unknown user");
        if session.is_expired(now) {
          println!("Session: {} (access token expired)", who);
        } else {
          println!(
            "Session: {} ({} min left)",
            who,
            session.time_to_expiry(now).num_minutes()
          );
        }
      }
      None => println!("Session: signed out"),
    }

    let reachable = self.probe.check_connection().await;
    println!("Backend: {}", if reachable { "reachable" } else { "unreachable" });
    Ok(())
  }

  pub async fn list<T: Entity>(&self, query: &ListQuery) -> Result<()> {
    let result = self.backend.list::<T>(query).await?;
    for row in &result.data {
      println!("{}", row.summary());
    }
    eprintln!("{} {} {}", result.data.len(), T::table(), describe_source(&result));
    Ok(())
  }

  pub async fn get<T: Entity>(&self, id: &str) -> Result<()> {
    let result = self.backend.get::<T>(id).await?;
    print_json(&result.data)?;
    eprintln!("{}", describe_source(&result));
    Ok(())
  }

  pub async fn create<T: Entity>(&self, json: &str) -> Result<()> {
    let row = parse_object(json)?;
    let created = self.backend.create::<T>(&row).await?;
    println!("Created {}", created.summary());
    Ok(())
  }

  pub async fn update<T: Entity>(&self, id: &str, json: &str) -> Result<()> {
    let patch = parse_object(json)?;
    let updated = self.backend.update::<T>(id, &patch).await?;
    println!("Updated {}", updated.summary());
    Ok(())
  }

  pub async fn delete<T: Entity>(&self, id: &str) -> Result<()> {
    self.backend.delete::<T>(id).await?;
    println!("Deleted {} {}", T::table(), id);
    Ok(())
  }

  /// Show a list and keep it current until Ctrl-C. Cached rows are shown
  /// immediately and revalidated in the background.
  pub async fn watch<T: Entity>(&self, query: ListQuery, every: Duration) -> Result<()> {
    let client = self.backend.client().clone();
    let key = query.cache_key(T::table());
    let options = CachedQueryOptions::default()
      .stale_while_revalidate(true)
      .on_error(|e| eprintln!("Refresh failed: {}", e));

    let mut rows = CachedQuery::new(
      self.backend.queries().clone(),
      key,
      move || {
        let client = client.clone();
        let query = query.clone();
        async move { client.select::<T>(&query).await }
      },
      options,
    );

    rows.mount();
    if rows.data().is_some() {
      render(&rows);
    }

    let mut events = EventHandler::new(Duration::from_millis(250), every);
    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          if rows.poll() {
            render(&rows);
          }
        }
        Event::Refresh => {
          if !rows.is_loading() {
            rows.refetch();
          }
        }
        Event::Quit => break,
      }
    }
    Ok(())
  }

  pub fn cache_clear(&self) -> Result<()> {
    self.backend.queries().cache().clear();
    println!("Cache cleared");
    Ok(())
  }

  pub fn cache_sweep(&self) -> Result<()> {
    let removed = self.backend.queries().cache().purge_expired();
    println!("Removed {} expired entries", removed);
    Ok(())
  }

  pub fn cache_inspect(&self, key: &str) -> Result<()> {
    let entry = self
      .backend
      .queries()
      .cache()
      .peek(key)
      .ok_or_else(|| eyre!("No cache entry for key {}", key))?;

    let now = self.clock.now();
    println!("written_at: {}", entry.written_at.to_rfc3339());
    println!("expires_at: {}", entry.expires_at().to_rfc3339());
    println!("age:        {}s", entry.age(now).num_seconds());
    println!("expired:    {}", entry.is_expired(now));
    print_json(&entry.data)
  }
}

fn render<T: Entity>(rows: &CachedQuery<Vec<T>>) {
  println!("-- {} ({}) --", T::table(), chrono::Local::now().format("%H:%M:%S"));
  match rows.data() {
    Some(data) if data.is_empty() => println!("(no rows)"),
    Some(data) => {
      for row in data {
        println!("{}", row.summary());
      }
    }
    None => {}
  }
  if let Some(error) = rows.error() {
    println!("! {}", error);
  }
}

fn describe_source<T>(result: &CacheResult<T>) -> String {
  match (result.source, result.age) {
    (CacheSource::Network, _) => "(from network)".to_string(),
    (CacheSource::Cache, Some(age)) => format!("(cached, {}s old)", age.num_seconds()),
    (CacheSource::Cache, None) => "(cached)".to_string(),
  }
}

fn parse_object(json: &str) -> Result<Value> {
  let value: Value = serde_json::from_str(json).map_err(|e| eyre!("Invalid JSON: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("Expected a JSON object"));
  }
  Ok(value)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format JSON: {}", e))?;
  println!("{}", text);
  Ok(())
}
