//! Error occurrence persistence.
//!
//! Occurrences are immutable once stored except for the two flags
//! denormalized from the owning stack, which are rewritten in bulk when the
//! stack's fixed/hidden state changes.

use super::RepositoryError;
use crate::store::ErrorStore;
use crate::types::Error;
use std::sync::Arc;
use tracing::debug;

pub struct ErrorRepository {
    store: Arc<dyn ErrorStore>,
}

impl ErrorRepository {
    pub fn new(store: Arc<dyn ErrorStore>) -> Self {
        Self { store }
    }

    pub fn add(&self, error: Error) -> Result<Error, RepositoryError> {
        if error.id.is_empty() {
            return Err(RepositoryError::Precondition("error id is empty".into()));
        }
        if error.project_id.is_empty() {
            return Err(RepositoryError::Precondition(
                "error project id is empty".into(),
            ));
        }

        self.store.insert(error.clone())?;
        Ok(error)
    }

    pub fn get(&self, id: &str) -> Result<Option<Error>, RepositoryError> {
        Ok(self.store.get(id)?)
    }

    /// Rewrite the denormalized fixed flag on every occurrence of a stack.
    pub fn update_fixed_by_stack_id(
        &self,
        stack_id: &str,
        is_fixed: bool,
    ) -> Result<u64, RepositoryError> {
        let affected = self.store.update_fixed_by_stack_id(stack_id, is_fixed)?;
        debug!(stack_id, is_fixed, affected, "propagated fixed flag to errors");
        Ok(affected)
    }

    /// Rewrite the denormalized hidden flag on every occurrence of a stack.
    pub fn update_hidden_by_stack_id(
        &self,
        stack_id: &str,
        is_hidden: bool,
    ) -> Result<u64, RepositoryError> {
        let affected = self.store.update_hidden_by_stack_id(stack_id, is_hidden)?;
        debug!(stack_id, is_hidden, affected, "propagated hidden flag to errors");
        Ok(affected)
    }

    pub fn remove_all_by_project(&self, project_id: &str) -> Result<u64, RepositoryError> {
        Ok(self.store.remove_by_project(project_id)?)
    }
}
