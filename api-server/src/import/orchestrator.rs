use crate::config::ImportConfig;
use crate::import::decoder::decode_posts;
use crate::import::error::ImportError;
use crate::import::executor::WorkerPool;
use crate::import::fetcher::{FetchError, HttpPostSource, PostSource};
use crate::import::persister::{BatchPersister, RowFailure};
use crate::import::retry::{Delay, RetryPolicy, RetryingFetcher, TokioDelay};
use crate::models::Post;
use crate::store::SharedStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Summary of a completed import run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub fetched: usize,
    pub saved: usize,
    pub failures: Vec<RowFailure>,
    pub fetch_attempts: u32,
    pub elapsed: Duration,
}

/// Runs fetch → decode → persist as one sequential pipeline.
///
/// Each stage starts only after the previous one resolved and the first
/// failure ends the run. Overlapping runs are independent; they only share
/// the store and the worker pool.
pub struct ImportService {
    fetcher: RetryingFetcher,
    persister: BatchPersister,
    strict_row_failures: bool,
}

impl ImportService {
    pub fn new(fetcher: RetryingFetcher, persister: BatchPersister) -> Self {
        Self {
            fetcher,
            persister,
            strict_row_failures: false,
        }
    }

    /// Fail the run when any row could not be saved, instead of only logging it.
    pub fn strict_row_failures(mut self, strict: bool) -> Self {
        self.strict_row_failures = strict;
        self
    }

    /// Wire the service from explicit parts. Must be called from within a tokio runtime.
    pub fn from_parts(
        config: &ImportConfig,
        source: Arc<dyn PostSource>,
        delay: Arc<dyn Delay>,
        store: SharedStore,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_attempts, config.backoff_base);
        let pool = WorkerPool::new("db-save", config.pool.clone());

        Self::new(
            RetryingFetcher::new(source, delay, policy),
            BatchPersister::new(store, pool),
        )
        .strict_row_failures(config.strict_row_failures)
    }

    /// Production wiring: HTTP source and timer-backed backoff.
    pub fn from_config(config: &ImportConfig, store: SharedStore) -> Result<Self, FetchError> {
        let source = HttpPostSource::from_config(config)?;
        Ok(Self::from_parts(
            config,
            Arc::new(source),
            Arc::new(TokioDelay),
            store,
        ))
    }

    pub async fn run(&self) -> Result<ImportReport, ImportError> {
        let started = Instant::now();

        let fetched = self.fetcher.fetch().await?;
        let records = decode_posts(&fetched.body)?;
        let posts: Vec<Post> = records.into_iter().map(Post::from).collect();
        let fetched_count = posts.len();

        let outcome = self.persister.persist(posts).await?;

        if !outcome.saved_all() && self.strict_row_failures {
            return Err(ImportError::Persist {
                attempted: outcome.attempted,
                failures: outcome.failures,
            });
        }

        let report = ImportReport {
            fetched: fetched_count,
            saved: outcome.saved,
            failures: outcome.failures,
            fetch_attempts: fetched.attempts,
            elapsed: started.elapsed(),
        };

        log::info!(
            "import: {} fetched, {} saved, {} failed in {:.2}ms ({} fetch attempt(s))",
            report.fetched,
            report.saved,
            report.failures.len(),
            report.elapsed.as_secs_f64() * 1000.0,
            report.fetch_attempts
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryPostStore, RecordingDelay, ScriptedSource, logs};
    use log::Level;

    const ONE_POST: &str = r#"[{"id":1,"userId":1,"title":"t","body":"b"}]"#;

    struct Harness {
        source: Arc<ScriptedSource>,
        delay: Arc<RecordingDelay>,
        store: Arc<InMemoryPostStore>,
    }

    impl Harness {
        fn new(source: ScriptedSource, store: InMemoryPostStore) -> Self {
            Self {
                source: Arc::new(source),
                delay: Arc::new(RecordingDelay::default()),
                store: Arc::new(store),
            }
        }

        fn service(&self, config: &ImportConfig) -> ImportService {
            ImportService::from_parts(
                config,
                self.source.clone(),
                self.delay.clone(),
                self.store.clone(),
            )
        }
    }

    fn five_posts() -> String {
        let posts: Vec<String> = (1..=5)
            .map(|id| format!(r#"{{"id":{id},"userId":1,"title":"t{id}","body":"b{id}"}}"#))
            .collect();
        format!("[{}]", posts.join(","))
    }

    #[tokio::test]
    async fn single_post_flows_through_every_stage() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(ONE_POST.to_string())]),
            InMemoryPostStore::new(),
        );

        let report = harness.service(&ImportConfig::default()).run().await.unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.saved, 1);
        assert_eq!(report.fetch_attempts, 1);
        let stored = harness.store.get(1).expect("row written");
        assert_eq!(stored.title, "t");
        assert_eq!(stored.body, "b");
    }

    #[tokio::test]
    async fn retry_recovery_logs_exactly_one_retry_warning() {
        let harness = Harness::new(
            ScriptedSource::new(vec![
                Err(FetchError::HttpStatus { code: 502 }),
                Ok(ONE_POST.to_string()),
            ]),
            InMemoryPostStore::new(),
        );
        let logs = logs::capture();

        let report = harness.service(&ImportConfig::default()).run().await.unwrap();

        assert_eq!(report.fetch_attempts, 2);
        assert_eq!(harness.delay.recorded().len(), 1);
        assert_eq!(harness.store.ids(), vec![1]);

        let warnings = logs.messages(Level::Warn, "posts_api::import");
        assert_eq!(warnings.len(), 1, "warnings: {warnings:?}");
        assert!(warnings[0].contains("unexpected status code 502"), "{}", warnings[0]);
    }

    #[tokio::test]
    async fn decode_failure_writes_nothing_and_is_not_retried() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(r#"{"not":"an array"}"#.to_string())]),
            InMemoryPostStore::new(),
        );

        let err = harness
            .service(&ImportConfig::default())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Decode(_)));
        assert_eq!(harness.source.attempts(), 1);
        assert_eq!(harness.store.bulk_calls(), 0);
        assert_eq!(harness.store.single_calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_fetch_short_circuits_before_persisting() {
        let harness = Harness::new(
            ScriptedSource::always(|| FetchError::HttpStatus { code: 503 }),
            InMemoryPostStore::new(),
        );

        let err = harness
            .service(&ImportConfig::default())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Fetch { attempts: 3, .. }));
        assert_eq!(
            err.to_string(),
            "fetch failed after 3 attempt(s): unexpected status code 503"
        );
        assert_eq!(harness.store.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn row_failures_are_swallowed_by_default() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(five_posts())]),
            InMemoryPostStore::new().failing_bulk().failing_ids([3]),
        );

        let report = harness.service(&ImportConfig::default()).run().await.unwrap();

        assert_eq!(report.saved, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, 3);
        assert_eq!(harness.store.ids(), vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn strict_mode_turns_row_failures_into_an_error() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(five_posts())]),
            InMemoryPostStore::new().failing_bulk().failing_ids([3]),
        );
        let config = ImportConfig {
            strict_row_failures: true,
            ..ImportConfig::default()
        };

        let err = harness.service(&config).run().await.unwrap_err();

        match err {
            ImportError::Persist {
                attempted,
                failures,
            } => {
                assert_eq!(attempted, 5);
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(harness.store.ids(), vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn importing_twice_keeps_one_row_per_id() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(five_posts()), Ok(five_posts())]),
            InMemoryPostStore::new(),
        );
        let service = harness.service(&ImportConfig::default());

        service.run().await.unwrap();
        service.run().await.unwrap();

        assert_eq!(harness.store.ids(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn overlapping_runs_are_independent() {
        let harness = Harness::new(
            ScriptedSource::new(vec![Ok(five_posts()), Ok(ONE_POST.to_string())]),
            InMemoryPostStore::new(),
        );
        let service = harness.service(&ImportConfig::default());

        let (first, second) = tokio::join!(service.run(), service.run());

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(harness.store.ids(), vec![1, 2, 3, 4, 5]);
    }
}
