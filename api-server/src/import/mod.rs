//! Posts import pipeline.
//!
//! Pulls the upstream posts collection over HTTP and upserts it into the
//! `posts` table:
//!
//! 1. **Fetch** (`fetcher`, `retry`) - one GET per attempt, retried with
//!    exponential backoff on transport errors and non-2xx statuses
//! 2. **Decode** (`decoder`) - the body must be a JSON array of posts; any
//!    malformed element fails the run, nothing is retried
//! 3. **Persist** (`persister`, `executor`) - one bulk upsert on the bounded
//!    worker pool; if it fails every post is re-saved on its own and the
//!    failures are collected
//! 4. **Orchestration** (`orchestrator`) - sequences the stages and reports a
//!    single success or error
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use crate::config::ImportConfig;
//! use crate::import::ImportService;
//! use crate::store::PgPostStore;
//!
//! let config = ImportConfig::from_env();
//! let service = ImportService::from_config(&config, PgPostStore::shared(pool))?;
//! let report = service.run().await?;
//! println!("saved {} posts", report.saved);
//! ```

pub mod decoder;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod orchestrator;
pub mod persister;
pub mod retry;

pub use error::ImportError;
pub use executor::{PoolError, WorkerPool};
pub use fetcher::{FetchError, HttpPostSource, PostSource};
pub use orchestrator::{ImportReport, ImportService};
pub use persister::{BatchPersister, PersistOutcome, RowFailure};
pub use retry::{Delay, RetryPolicy, RetryingFetcher, TokioDelay};
