//! End-to-end ingestion: pipeline, stack dedup, counters, regression,
//! cache invalidation, and real-time fan-out against the in-memory backends.

use chrono::{DateTime, TimeZone, Utc};
use faultline::bus::{InMemoryBus, MessageBus};
use faultline::cache::{CacheClient, InMemoryCache};
use faultline::config::Settings;
use faultline::notify::{BroadcastSink, NotificationSender, RecordingSink};
use faultline::pipeline::{
    AssignSignatureAction, AssignToStackAction, ErrorPipeline, NotifyRealTimeAction,
    PipelineAction,
};
use faultline::repository::{ErrorRepository, StackRepository};
use faultline::stats::{stat_names, InMemoryStats, StatsClient};
use faultline::store::{
    AggregateStats, InMemoryAggregateStats, InMemoryErrorStore, InMemoryStackStore,
};
use faultline::types::Error;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    pipeline: ErrorPipeline,
    stacks: Arc<StackRepository>,
    errors: Arc<ErrorRepository>,
    stats: Arc<InMemoryStats>,
    bus: Arc<InMemoryBus>,
    cache: Arc<InMemoryCache>,
}

fn harness() -> Harness {
    let settings = Settings::default();
    let cache = Arc::new(InMemoryCache::new());
    let bus = Arc::new(InMemoryBus::new());
    let stats = Arc::new(InMemoryStats::new());
    let errors = Arc::new(ErrorRepository::new(Arc::new(InMemoryErrorStore::new())));
    let stacks = Arc::new(StackRepository::new(
        Arc::new(InMemoryStackStore::new()),
        Arc::clone(&errors),
        Arc::new(InMemoryAggregateStats::new()) as Arc<dyn AggregateStats>,
        cache.clone() as Arc<dyn CacheClient>,
        &settings,
    ));

    let actions: Vec<Arc<dyn PipelineAction>> = vec![
        Arc::new(AssignSignatureAction),
        Arc::new(AssignToStackAction::new(
            Arc::clone(&stacks),
            Arc::clone(&errors),
        )),
        Arc::new(NotifyRealTimeAction::new(
            Arc::clone(&stacks),
            bus.clone() as Arc<dyn MessageBus>,
        )),
    ];
    let pipeline = ErrorPipeline::new(actions, stats.clone() as Arc<dyn StatsClient>);

    Harness {
        pipeline,
        stacks,
        errors,
        stats,
        bus,
        cache,
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn report(occurred: DateTime<Utc>) -> Error {
    Error::new(
        "org1",
        "proj1",
        occurred,
        serde_json::json!({
            "type": "NullReferenceException",
            "module": "billing",
            "message": "Object reference not set"
        }),
    )
}

#[test]
fn first_occurrence_creates_stack_and_second_deduplicates() {
    let h = harness();
    let d1 = ts(1_000);
    let d2 = ts(2_000);

    let ctx1 = h.pipeline.run(report(d1)).unwrap();
    assert!(ctx1.is_new_stack);
    let stack_id = ctx1.stack_info.as_ref().unwrap().id.clone();

    let stack = h.stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    assert_eq!(stack.total_occurrences, 1);
    assert_eq!(stack.first_occurrence, d1);
    assert_eq!(stack.last_occurrence, d1);
    assert_eq!(stack.title, "Object reference not set");

    let ctx2 = h.pipeline.run(report(d2)).unwrap();
    assert!(!ctx2.is_new_stack);
    assert_eq!(ctx2.stack_info.as_ref().unwrap().id, stack_id);

    let stack = h.stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    assert_eq!(stack.total_occurrences, 2);
    assert_eq!(stack.first_occurrence, d1);
    assert_eq!(stack.last_occurrence, d2);

    // Both occurrences were persisted with the stack id.
    let e1 = h.errors.get(&ctx1.error.id).unwrap().unwrap();
    let e2 = h.errors.get(&ctx2.error.id).unwrap().unwrap();
    assert_eq!(e1.stack_id.as_deref(), Some(stack_id.as_str()));
    assert_eq!(e2.stack_id.as_deref(), Some(stack_id.as_str()));
}

#[test]
fn distinct_signatures_get_distinct_stacks() {
    let h = harness();

    let ctx_a = h.pipeline.run(report(ts(1_000))).unwrap();
    let mut other = report(ts(1_000));
    other.data = serde_json::json!({ "type": "TimeoutException", "module": "search" });
    let ctx_b = h.pipeline.run(other).unwrap();

    assert!(ctx_b.is_new_stack);
    assert_ne!(
        ctx_a.stack_info.as_ref().unwrap().id,
        ctx_b.stack_info.as_ref().unwrap().id
    );
}

#[test]
fn marking_fixed_flags_errors_and_regression_reopens() {
    let h = harness();
    let d1 = ts(1_000);

    let ctx = h.pipeline.run(report(d1)).unwrap();
    let stack_id = ctx.stack_info.as_ref().unwrap().id.clone();

    // Operator marks the stack fixed.
    let mut stack = h.stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    stack.date_fixed = Some(ts(5_000));
    h.stacks.update(stack, false).unwrap();

    assert!(h.errors.get(&ctx.error.id).unwrap().unwrap().is_fixed);
    assert_eq!(h.stacks.fixed_ids("proj1").unwrap(), vec![stack_id.clone()]);

    // An occurrence before the fix date does not reopen the stack.
    let ctx_old = h.pipeline.run(report(ts(4_000))).unwrap();
    assert!(ctx_old.error.is_fixed);
    let stack = h.stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    assert!(stack.is_fixed());
    assert!(!stack.is_regressed);

    // A newer occurrence is a regression: the stack reopens.
    let ctx_new = h.pipeline.run(report(ts(6_000))).unwrap();
    assert!(!ctx_new.error.is_fixed);
    let stack = h.stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    assert!(!stack.is_fixed());
    assert!(stack.is_regressed);
    assert_eq!(stack.total_occurrences, 3);
    assert_eq!(stack.last_occurrence, ts(6_000));
}

#[test]
fn path_only_report_feeds_the_not_found_set() {
    let h = harness();

    let mut nf = report(ts(1_000));
    nf.data = serde_json::json!({ "path": "/missing/page" });
    let ctx = h.pipeline.run(nf).unwrap();
    let stack_id = ctx.stack_info.as_ref().unwrap().id.clone();

    assert_eq!(h.stacks.not_found_ids("proj1").unwrap(), vec![stack_id]);
}

#[test]
fn unclassifiable_report_cancels_and_counts() {
    let h = harness();

    let mut empty = report(ts(1_000));
    empty.data = serde_json::json!({});
    let ctx = h.pipeline.run(empty).unwrap();

    assert!(ctx.is_cancelled());
    assert!(ctx.stack_info.is_none());
    assert_eq!(h.stats.get(stat_names::ERRORS_PROCESSING_CANCELLED), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_events_reach_real_time_clients() {
    let h = harness();
    let sink = Arc::new(RecordingSink::new());
    let sender = Arc::new(NotificationSender::new(
        h.bus.clone() as Arc<dyn MessageBus>,
        h.cache.clone() as Arc<dyn CacheClient>,
        Settings::default(),
    ));
    sender.attach_sink(sink.clone() as Arc<dyn BroadcastSink>);
    sender.listen();
    assert!(wait_until(|| sender.is_started()).await);
    assert!(sender.is_listening().await);

    let pipeline = h.pipeline;
    let ctx = tokio::task::spawn_blocking(move || pipeline.run(report(ts(1_000))))
        .await
        .unwrap()
        .unwrap();
    let stack_id = ctx.stack_info.as_ref().unwrap().id.clone();

    assert!(
        wait_until(|| sink.sent_count() == 1).await,
        "stack event never reached the sink"
    );

    let sent = sink.sent();
    assert_eq!(sent[0].group_id, "org1");
    assert_eq!(sent[0].event, "newError");
    assert_eq!(sent[0].payload["stack_id"], serde_json::json!(stack_id));

    sender.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_stack_notifications_are_skipped() {
    let h = harness();
    let sink = Arc::new(RecordingSink::new());
    let sender = Arc::new(NotificationSender::new(
        h.bus.clone() as Arc<dyn MessageBus>,
        h.cache.clone() as Arc<dyn CacheClient>,
        Settings::default(),
    ));
    sender.attach_sink(sink.clone() as Arc<dyn BroadcastSink>);
    sender.listen();
    assert!(wait_until(|| sender.is_started()).await);
    assert!(sender.is_listening().await);

    // First run creates the stack; disable its notifications, then report
    // again. Only the first occurrence broadcasts.
    let stacks = Arc::clone(&h.stacks);
    let pipeline = Arc::new(h.pipeline);
    let run = Arc::clone(&pipeline);
    let ctx = tokio::task::spawn_blocking(move || run.run(report(ts(1_000))))
        .await
        .unwrap()
        .unwrap();
    let stack_id = ctx.stack_info.as_ref().unwrap().id.clone();

    let mut stack = stacks.get_by_id_cached(&stack_id).unwrap().unwrap();
    stack.disable_notifications = true;
    stacks.update(stack, true).unwrap();

    let run = Arc::clone(&pipeline);
    tokio::task::spawn_blocking(move || run.run(report(ts(2_000))))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.sent_count(), 1);

    sender.stop();
}
