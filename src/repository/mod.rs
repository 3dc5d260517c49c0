//! Aggregation repositories: stack dedup, counters, and cached derived sets.

mod errors;
mod stacks;

pub use errors::ErrorRepository;
pub use stacks::StackRepository;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Required argument missing or empty; reported before any effect.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
