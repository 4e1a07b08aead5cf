use crate::import::executor::PoolError;
use crate::import::fetcher::FetchError;
use crate::import::persister::RowFailure;
use thiserror::Error;

/// Terminal failure of one import run.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("fetch failed after {attempts} attempt(s): {source}")]
    Fetch { attempts: u32, source: FetchError },
    #[error("failed to parse JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{} of {attempted} post(s) could not be saved", failures.len())]
    Persist {
        attempted: usize,
        failures: Vec<RowFailure>,
    },
    #[error("persistence worker pool: {0}")]
    Pool(#[from] PoolError),
}
