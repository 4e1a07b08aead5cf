//! Helpers shared by unit and integration tests: a configurable Rocket
//! builder, a disposable Postgres database, and in-memory doubles for the
//! store, the upstream source and the backoff timer.

use crate::import::fetcher::{FetchError, PostSource};
use crate::import::retry::Delay;
use crate::import::ImportService;
use crate::models::Post;
use crate::store::{PostPage, PostStore, SharedStore, StoreError};
use parking_lot::Mutex;
use rocket::config::LogLevel;
use rocket::figment::Figment;
use rocket::local::asynchronous::Client as AsyncClient;
use rocket::local::blocking::Client;
use rocket::{Build, Rocket, Route};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use database::{TestDatabase, TestDatabaseError};

/// In-memory [`PostStore`] with failure injection and call accounting.
#[derive(Default)]
pub struct InMemoryPostStore {
    rows: Mutex<BTreeMap<i64, Post>>,
    fail_bulk: bool,
    failing_ids: HashSet<i64>,
    bulk_calls: AtomicUsize,
    single_calls: Mutex<Vec<i64>>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bulk write fails.
    pub fn failing_bulk(mut self) -> Self {
        self.fail_bulk = true;
        self
    }

    /// Writes touching these ids fail, in bulk and individually.
    pub fn failing_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing_ids.extend(ids);
        self
    }

    /// Insert rows directly, bypassing call accounting.
    pub fn seed(&self, posts: impl IntoIterator<Item = Post>) {
        let mut rows = self.rows.lock();
        for post in posts {
            rows.insert(post.id, post);
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        self.rows.lock().keys().copied().collect()
    }

    pub fn get(&self, id: i64) -> Option<Post> {
        self.rows.lock().get(&id).cloned()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.lock().len()
    }

    /// Ids passed to single-row writes, in call order.
    pub fn single_call_order(&self) -> Vec<i64> {
        self.single_calls.lock().clone()
    }
}

#[rocket::async_trait]
impl PostStore for InMemoryPostStore {
    async fn save_all(&self, posts: &[Post]) -> Result<u64, StoreError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_bulk {
            return Err(StoreError::Rejected("bulk write rejected".into()));
        }
        if let Some(post) = posts.iter().find(|post| self.failing_ids.contains(&post.id)) {
            return Err(StoreError::Rejected(format!("post {} rejected", post.id)));
        }

        self.seed(posts.iter().cloned());
        Ok(posts.len() as u64)
    }

    async fn save(&self, post: &Post) -> Result<(), StoreError> {
        self.single_calls.lock().push(post.id);

        if self.failing_ids.contains(&post.id) {
            return Err(StoreError::Rejected(format!("post {} rejected", post.id)));
        }

        self.rows.lock().insert(post.id, post.clone());
        Ok(())
    }

    async fn page(&self, page: i64, size: i64) -> Result<PostPage, StoreError> {
        let rows = self.rows.lock();
        let skip = usize::try_from(page.saturating_mul(size)).unwrap_or(usize::MAX);
        let take = usize::try_from(size).unwrap_or(0);

        Ok(PostPage {
            posts: rows.values().skip(skip).take(take).cloned().collect(),
            total: rows.len() as i64,
        })
    }
}

type FailureFactory = Box<dyn Fn() -> FetchError + Send + Sync>;

/// [`PostSource`] that replays queued results, then falls back to a fixed failure.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<String, FetchError>>>,
    fallback: Option<FailureFactory>,
    attempts: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<String, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// A source whose every attempt fails with `failure()`.
    pub fn always(failure: impl Fn() -> FetchError + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(Box::new(failure)),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[rocket::async_trait]
impl PostSource for ScriptedSource {
    async fn fetch(&self) -> Result<String, FetchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(next) = self.script.lock().pop_front() {
            return next;
        }

        Err(match &self.fallback {
            Some(failure) => failure(),
            None => FetchError::HttpStatus { code: 404 },
        })
    }
}

/// [`Delay`] that records requested durations and returns without sleeping.
#[derive(Default)]
pub struct RecordingDelay {
    recorded: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn recorded(&self) -> Vec<Duration> {
        self.recorded.lock().clone()
    }
}

#[rocket::async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Capture of `log` records emitted on the current thread.
///
/// Installs a process-wide recording logger on first use. Records are tagged
/// with the emitting thread, so parallel tests only see their own events
/// (`#[tokio::test]` runs the test body on the test thread).
pub mod logs {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use parking_lot::Mutex;
    use std::sync::Once;
    use std::thread::{self, ThreadId};

    #[derive(Debug, Clone)]
    pub struct CapturedRecord {
        pub level: Level,
        pub target: String,
        pub message: String,
    }

    struct RecordingLogger {
        records: Mutex<Vec<(ThreadId, CapturedRecord)>>,
    }

    impl Log for RecordingLogger {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            let captured = CapturedRecord {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            };
            self.records.lock().push((thread::current().id(), captured));
        }

        fn flush(&self) {}
    }

    static LOGGER: RecordingLogger = RecordingLogger {
        records: parking_lot::const_mutex(Vec::new()),
    };
    static INSTALL: Once = Once::new();

    /// Records emitted on this thread after the capture started.
    pub struct LogCapture {
        thread: ThreadId,
        start: usize,
    }

    pub fn capture() -> LogCapture {
        INSTALL.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(LevelFilter::Trace);
            }
        });

        LogCapture {
            thread: thread::current().id(),
            start: LOGGER.records.lock().len(),
        }
    }

    impl LogCapture {
        pub fn records(&self) -> Vec<CapturedRecord> {
            LOGGER
                .records
                .lock()
                .iter()
                .skip(self.start)
                .filter(|(thread, _)| *thread == self.thread)
                .map(|(_, record)| record.clone())
                .collect()
        }

        /// Messages at `level` whose target starts with `target`.
        pub fn messages(&self, level: Level, target: &str) -> Vec<String> {
            self.records()
                .into_iter()
                .filter(|record| record.level == level && record.target.starts_with(target))
                .map(|record| record.message)
                .collect()
        }
    }
}

pub mod database {
    use log::LevelFilter;
    use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
    use testcontainers::ImageExt;
    use testcontainers_modules::postgres::Postgres;
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;
    use tokio::runtime::Handle;
    use uuid::Uuid;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("migration error: {0}")]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database for integration tests.
    ///
    /// Uses `TEST_DATABASE_URL` when set, otherwise starts a disposable
    /// Postgres container. Each instance gets its own freshly migrated database.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        admin_options: PgConnectOptions,
        database_name: String,
        container: Option<ContainerAsync<Postgres>>,
    }

    impl TestDatabase {
        pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
            match std::env::var("TEST_DATABASE_URL") {
                Ok(url) => Self::provision(&url, None).await,
                Err(_) => Self::new().await,
            }
        }

        /// Provision a fresh database inside a new Postgres container.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let container = Postgres::default().with_tag("16-alpine").start().await?;

            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;
            let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            Self::provision(&admin_url, Some(container)).await
        }

        async fn provision(
            admin_url: &str,
            container: Option<ContainerAsync<Postgres>>,
        ) -> Result<Self, TestDatabaseError> {
            let base_options: PgConnectOptions = admin_url.parse()?;
            let base_options = base_options.log_statements(LevelFilter::Off);

            let base_name = base_options
                .get_database()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "postgres".to_string());

            let admin_options = base_options.clone();
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options.clone())
                .await?;

            let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
            let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
            sqlx::query(&create_sql).execute(&admin_pool).await?;
            admin_pool.close().await;

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect_with(base_options.database(&new_db_name))
                .await?;

            MIGRATOR.run(&pool).await?;

            Ok(Self {
                pool: Some(pool),
                admin_options,
                database_name: new_db_name,
                container,
            })
        }

        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        /// Close pool connections and drop the ephemeral database.
        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }

            drop_database(self.admin_options.clone(), &self.database_name).await?;

            if let Some(container) = self.container.take() {
                drop(container);
            }

            Ok(())
        }
    }

    async fn drop_database(
        admin_options: PgConnectOptions,
        database_name: &str,
    ) -> Result<(), sqlx::Error> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(admin_options)
            .await?;

        let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", database_name);
        sqlx::query(&drop_sql).execute(&admin_pool).await?;
        admin_pool.close().await;
        Ok(())
    }

    impl Drop for TestDatabase {
        fn drop(&mut self) {
            if let Some(pool) = self.pool.take() {
                let admin_options = self.admin_options.clone();
                let db_name = self.database_name.clone();
                if let Ok(handle) = Handle::try_current() {
                    handle.spawn(async move {
                        pool.close().await;
                        let _ = drop_database(admin_options, &db_name).await;
                    });
                }
            }

            if let Some(container) = self.container.take() {
                drop(container);
            }
        }
    }
}

/// Builder for constructing Rocket instances tailored for integration tests.
#[derive(Default)]
pub struct TestRocketBuilder {
    figment: Figment,
    mounts: Vec<(String, Vec<Route>)>,
    store: Option<SharedStore>,
    import_service: Option<ImportService>,
}

impl TestRocketBuilder {
    /// Start a builder with sensible defaults: random port, logging disabled.
    pub fn new() -> Self {
        let figment = rocket::Config::figment()
            .merge(("port", 0))
            .merge(("log_level", LogLevel::Off))
            .merge(("cli_colors", false));

        Self {
            figment,
            ..Self::default()
        }
    }

    /// Mount routes at the root, as the server does.
    pub fn mount_routes(mut self, routes: Vec<Route>) -> Self {
        self.mounts.push(("/".to_string(), routes));
        self
    }

    pub fn manage_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manage_import_service(mut self, service: ImportService) -> Self {
        self.import_service = Some(service);
        self
    }

    pub fn build(self) -> Rocket<Build> {
        let mut rocket = rocket::custom(self.figment);

        for (base, routes) in self.mounts {
            rocket = rocket.mount(base, routes);
        }
        if let Some(store) = self.store {
            rocket = rocket.manage(store);
        }
        if let Some(service) = self.import_service {
            rocket = rocket.manage(service);
        }

        rocket
    }

    pub fn blocking_client(self) -> Client {
        Client::tracked(self.build()).expect("valid Rocket instance")
    }

    pub async fn async_client(self) -> AsyncClient {
        AsyncClient::tracked(self.build())
            .await
            .expect("valid Rocket instance")
    }
}
