//! Batched persistence with per-row fallback.
//!
//! The bulk write is treated as atomic-or-unknown: when it fails, every row is
//! re-written on its own, in order, and the rows that still fail are collected
//! instead of aborting the run.

use crate::import::error::ImportError;
use crate::import::executor::WorkerPool;
use crate::models::Post;
use crate::store::SharedStore;
use serde::Serialize;
use std::sync::Arc;

/// A row that could not be written, even on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub id: i64,
    pub cause: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub attempted: usize,
    pub saved: usize,
    /// True when the bulk write failed and rows were written one at a time.
    pub fell_back: bool,
    pub failures: Vec<RowFailure>,
}

impl PersistOutcome {
    pub fn saved_all(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct BatchPersister {
    store: SharedStore,
    pool: WorkerPool,
}

impl BatchPersister {
    pub fn new(store: SharedStore, pool: WorkerPool) -> Self {
        Self { store, pool }
    }

    /// Write `posts` on the worker pool and wait for the outcome.
    pub async fn persist(&self, posts: Vec<Post>) -> Result<PersistOutcome, ImportError> {
        let store = Arc::clone(&self.store);
        let outcome = self.pool.run(save_with_fallback(store, posts)).await?;
        Ok(outcome)
    }
}

async fn save_with_fallback(store: SharedStore, posts: Vec<Post>) -> PersistOutcome {
    let attempted = posts.len();
    if posts.is_empty() {
        return PersistOutcome::default();
    }

    let bulk_error = match store.save_all(&posts).await {
        Ok(_) => {
            log::info!("saved {} posts", attempted);
            return PersistOutcome {
                attempted,
                saved: attempted,
                fell_back: false,
                failures: Vec::new(),
            };
        }
        Err(err) => err,
    };

    log::warn!(
        "batch save failed, falling back to per-post save: {}",
        bulk_error
    );

    let mut failures = Vec::new();
    for post in &posts {
        if let Err(err) = store.save(post).await {
            log::error!("failed saving post id={}: {}", post.id, err);
            failures.push(RowFailure {
                id: post.id,
                cause: err.to_string(),
            });
        }
    }

    let saved = attempted - failures.len();
    log::info!(
        "per-post fallback saved {} of {} posts ({} failed)",
        saved,
        attempted,
        failures.len()
    );

    PersistOutcome {
        attempted,
        saved,
        fell_back: true,
        failures,
    }
}
