//! Pipeline engine: runs the ordered action registry over incoming errors.

use super::{EventContext, PipelineAction, PipelineError};
use crate::stats::{stat_names, StatsClient};
use crate::types::Error;
use std::sync::Arc;
use tracing::{debug, error};

/// Runs errors through the registered actions, one error at a time.
///
/// The registry is an explicit list built at startup and sorted by priority;
/// batches are strictly sequential with no cross-error cancellation. Callers
/// wanting parallelism invoke concurrently themselves and rely on
/// repository-level atomicity.
pub struct ErrorPipeline {
    actions: Vec<Arc<dyn PipelineAction>>,
    stats: Arc<dyn StatsClient>,
}

impl ErrorPipeline {
    pub fn new(mut actions: Vec<Arc<dyn PipelineAction>>, stats: Arc<dyn StatsClient>) -> Self {
        actions.sort_by_key(|a| a.priority());
        debug!(
            actions = ?actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "pipeline registry built"
        );
        Self { actions, stats }
    }

    /// Process one error. A cancelled run skips the remaining actions and
    /// bumps the processing-cancelled counter; an action fault is fatal for
    /// this error and propagates.
    pub fn run(&self, error: Error) -> Result<EventContext, PipelineError> {
        let mut ctx = EventContext::new(error);

        for action in &self.actions {
            if ctx.is_cancelled() {
                break;
            }

            if let Err(e) = action.process(&mut ctx) {
                error!(
                    action = action.name(),
                    error_id = %ctx.error.id,
                    error = %e,
                    "pipeline action faulted"
                );
                return Err(e);
            }
        }

        if ctx.is_cancelled() {
            self.stats.counter(stat_names::ERRORS_PROCESSING_CANCELLED);
        }

        Ok(ctx)
    }

    /// Process a batch sequentially, one result per error. A fault in one
    /// error does not affect the others.
    pub fn run_many(&self, errors: Vec<Error>) -> Vec<Result<EventContext, PipelineError>> {
        errors.into_iter().map(|error| self.run(error)).collect()
    }
}
