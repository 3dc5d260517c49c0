//! Built-in pipeline actions: fingerprinting, stack assignment, notification.

use super::{EventContext, PipelineAction, PipelineError};
use crate::bus::{MessageBus, NOTIFICATION_CHANNEL};
use crate::notify::BusMessage;
use crate::repository::{ErrorRepository, StackRepository};
use crate::types::ErrorStack;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Data-blob fields that classify an error for fingerprinting, in hash order.
const SIGNATURE_FIELDS: [&str; 3] = ["type", "module", "stack_trace"];

/// Computes the signature hash from the error's classifying attributes.
///
/// A report carrying only a `path` is treated as a not-found (404) report:
/// the path becomes both the fingerprint source and the not-found marker on
/// the signature metadata. A report with no classifying attributes at all
/// cancels the run; there is nothing to aggregate it under.
pub struct AssignSignatureAction;

impl PipelineAction for AssignSignatureAction {
    fn name(&self) -> &'static str {
        "assign_signature"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn process(&self, ctx: &mut EventContext) -> Result<(), PipelineError> {
        let mut source = String::new();
        for field in SIGNATURE_FIELDS {
            if let Some(value) = ctx.error.data.get(field).and_then(|v| v.as_str()) {
                source.push_str(field);
                source.push('=');
                source.push_str(value);
                source.push('\n');
                ctx.signature_info.insert(field, value);
            }
        }

        if source.is_empty() {
            if let Some(path) = ctx.error.data.get("path").and_then(|v| v.as_str()) {
                source.push_str("path=");
                source.push_str(path);
                ctx.signature_info.insert("path", path);
            }
        }

        if source.is_empty() {
            debug!(error_id = %ctx.error.id, "no classifying attributes, cancelling run");
            ctx.cancel();
            return Ok(());
        }

        ctx.error.signature_hash = Some(format!("{:x}", md5::compute(source.as_bytes())));
        Ok(())
    }
}

/// Deduplicates the error into its stack and records the occurrence.
///
/// Creates the stack on the first occurrence of a signature within the
/// project (warming the point caches), reopens a fixed stack when a newer
/// occurrence arrives (regression), denormalizes the stack's fixed/hidden
/// flags onto the error, persists the occurrence, and increments the stack
/// counters.
pub struct AssignToStackAction {
    stacks: Arc<StackRepository>,
    errors: Arc<ErrorRepository>,
}

impl AssignToStackAction {
    pub fn new(stacks: Arc<StackRepository>, errors: Arc<ErrorRepository>) -> Self {
        Self { stacks, errors }
    }
}

impl PipelineAction for AssignToStackAction {
    fn name(&self) -> &'static str {
        "assign_to_stack"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn process(&self, ctx: &mut EventContext) -> Result<(), PipelineError> {
        let signature_hash =
            ctx.error
                .signature_hash
                .clone()
                .ok_or_else(|| PipelineError::Action {
                    action: self.name(),
                    reason: "signature hash not assigned".to_string(),
                })?;

        let existing = self
            .stacks
            .stack_info_by_signature(&ctx.error.project_id, &signature_hash)?;

        let mut info = match existing {
            Some(info) => info,
            None => {
                let mut stack = ErrorStack::new(
                    &ctx.error.organization_id,
                    &ctx.error.project_id,
                    &signature_hash,
                    ctx.error.occurrence_date,
                );
                stack.signature_info = ctx.signature_info.clone();
                stack.title = ctx
                    .error
                    .data
                    .get("message")
                    .or_else(|| ctx.error.data.get("type"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown error")
                    .to_string();

                let stack = self.stacks.add(stack, true)?;
                ctx.is_new_stack = true;
                info!(
                    stack_id = %stack.id,
                    project_id = %stack.project_id,
                    "created stack for new signature"
                );

                crate::types::StackInfo {
                    id: stack.id,
                    date_fixed: None,
                    occurrences_are_critical: false,
                    is_hidden: false,
                    signature_hash,
                }
            }
        };

        // A fixed stack seeing a newer occurrence has regressed: reopen it.
        if let Some(date_fixed) = info.date_fixed {
            if ctx.error.occurrence_date > date_fixed {
                if let Some(mut stack) = self.stacks.get_by_id_cached(&info.id)? {
                    stack.date_fixed = None;
                    stack.is_regressed = true;
                    self.stacks.update(stack, true)?;
                    info.date_fixed = None;
                    info!(stack_id = %info.id, "stack regressed, reopened");
                }
            }
        }

        ctx.error.stack_id = Some(info.id.clone());
        ctx.error.is_fixed = info.is_fixed();
        ctx.error.is_hidden = info.is_hidden;
        self.errors.add(ctx.error.clone())?;

        self.stacks
            .increment_stats(&info.id, ctx.error.occurrence_date)?;

        ctx.stack_info = Some(info);
        Ok(())
    }
}

/// Publishes the stack event on the notification channel.
///
/// Delivery is best effort: a publish fault is logged and swallowed so the
/// ingestion path never fails on the notification leg. Stacks with
/// notifications disabled are skipped.
pub struct NotifyRealTimeAction {
    stacks: Arc<StackRepository>,
    bus: Arc<dyn MessageBus>,
}

impl NotifyRealTimeAction {
    pub fn new(stacks: Arc<StackRepository>, bus: Arc<dyn MessageBus>) -> Self {
        Self { stacks, bus }
    }
}

impl PipelineAction for NotifyRealTimeAction {
    fn name(&self) -> &'static str {
        "notify_real_time"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn process(&self, ctx: &mut EventContext) -> Result<(), PipelineError> {
        let Some(info) = &ctx.stack_info else {
            return Ok(());
        };

        if let Some(stack) = self.stacks.get_by_id_cached(&info.id)? {
            if stack.disable_notifications {
                debug!(stack_id = %info.id, "notifications disabled for stack, skipping");
                return Ok(());
            }
        }

        let message = BusMessage::StackEvent {
            organization_id: ctx.error.organization_id.clone(),
            project_id: ctx.error.project_id.clone(),
            stack_id: info.id.clone(),
            is_hidden: info.is_hidden,
            is_fixed: info.is_fixed(),
            is_not_found: ctx.signature_info.has_not_found_path(),
        };

        if let Err(e) = self.bus.publish(NOTIFICATION_CHANNEL, &message.encode()) {
            warn!(error = %e, "dropping real-time notification, publish failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx_with_data(data: serde_json::Value) -> EventContext {
        EventContext::new(crate::types::Error::new("o1", "p1", Utc::now(), data))
    }

    #[test]
    fn signature_is_deterministic_over_classifying_fields() {
        let action = AssignSignatureAction;

        let mut a = ctx_with_data(serde_json::json!({
            "type": "NullReferenceException",
            "module": "billing",
            "message": "boom"
        }));
        let mut b = ctx_with_data(serde_json::json!({
            "type": "NullReferenceException",
            "module": "billing",
            "message": "a different message"
        }));
        action.process(&mut a).unwrap();
        action.process(&mut b).unwrap();

        // The message is not a classifying attribute.
        assert_eq!(a.error.signature_hash, b.error.signature_hash);
        assert!(a.error.signature_hash.is_some());
    }

    #[test]
    fn path_only_report_marks_not_found() {
        let action = AssignSignatureAction;
        let mut ctx = ctx_with_data(serde_json::json!({ "path": "/missing" }));
        action.process(&mut ctx).unwrap();

        assert!(ctx.error.signature_hash.is_some());
        assert!(ctx.signature_info.has_not_found_path());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn empty_report_cancels_the_run() {
        let action = AssignSignatureAction;
        let mut ctx = ctx_with_data(serde_json::json!({}));
        action.process(&mut ctx).unwrap();

        assert!(ctx.is_cancelled());
        assert!(ctx.error.signature_hash.is_none());
    }
}
