//! Error processing pipeline.
//!
//! An ordered registry of independent actions runs over each incoming error:
//! signature assignment, stack assignment (create-or-update with counters),
//! then real-time notification. Any action may cancel the run; remaining
//! actions are skipped while completed side effects stand. A cancelled run
//! is an observability counter, not an error.

mod actions;
mod context;
mod engine;

pub use actions::{AssignSignatureAction, AssignToStackAction, NotifyRealTimeAction};
pub use context::EventContext;
pub use engine::ErrorPipeline;

use crate::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An action faulted without recovering; fatal for the one error being
    /// processed, with no effect on other errors in a batch.
    #[error("pipeline action {action} failed: {reason}")]
    Action { action: &'static str, reason: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// An independent, side-effecting processing step.
///
/// Actions are registered at startup and ordered by [`priority`]; the engine
/// knows nothing about them individually.
///
/// [`priority`]: PipelineAction::priority
pub trait PipelineAction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relative ordering; lower runs first.
    fn priority(&self) -> i32;

    fn process(&self, ctx: &mut EventContext) -> Result<(), PipelineError>;
}
