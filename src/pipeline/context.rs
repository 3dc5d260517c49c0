//! Per-run mutable context handed through the pipeline actions.

use crate::types::{Error, SignatureInfo, StackInfo};

/// Wraps one error for a single pipeline run.
///
/// Cancellation is cooperative: the engine checks the flag between actions,
/// never interrupting an action in progress, and already-executed actions
/// keep their side effects.
#[derive(Debug)]
pub struct EventContext {
    pub error: Error,
    /// Signature metadata produced by the fingerprinting action.
    pub signature_info: SignatureInfo,
    /// The owning stack, once assigned.
    pub stack_info: Option<StackInfo>,
    /// Whether this occurrence created its stack.
    pub is_new_stack: bool,
    cancelled: bool,
}

impl EventContext {
    pub fn new(error: Error) -> Self {
        Self {
            error,
            signature_info: SignatureInfo::default(),
            stack_info: None,
            is_new_stack: false,
            cancelled: false,
        }
    }

    /// Short-circuit the rest of this run.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
