//! Notification sender: owns the bus subscription lifecycle and the
//! per-organization throttle markers.
//!
//! The subscription loop is an explicit long-lived task guarded by a
//! `CancellationToken`; it owns its receiver for its entire lifetime and
//! releases it when the loop exits, cleanly or via fault. Subscribe failures
//! are retried with backoff forever rather than terminating the listener.

use super::{BroadcastSink, BusMessage, LimitScope};
use crate::bus::{MessageBus, NOTIFICATION_CHANNEL};
use crate::cache::CacheClient;
use crate::config::Settings;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded wait for the liveness probe's ping echo.
const PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum interval between listener liveness checks.
const LISTENER_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Initial and maximum delay between subscribe retries.
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);

mod events {
    pub const PLAN_CHANGED: &str = "planChanged";
    pub const ORGANIZATION_UPDATED: &str = "organizationUpdated";
    pub const PROJECT_UPDATED: &str = "projectUpdated";
    pub const STACK_UPDATED: &str = "stackUpdated";
    pub const NEW_ERROR: &str = "newError";
    pub const WENT_OVER_HOURLY_LIMIT: &str = "wentOverHourlyLimit";
    pub const WENT_OVER_MONTHLY_LIMIT: &str = "wentOverMonthlyLimit";
}

/// Fan-out of stack/organization state changes to grouped real-time clients.
///
/// Every notification method is a silent no-op when real-time delivery is
/// disabled in settings or no broadcast sink is attached; the ingestion path
/// never depends on delivery succeeding.
pub struct NotificationSender {
    bus: Arc<dyn MessageBus>,
    cache: Arc<dyn CacheClient>,
    sink: RwLock<Option<Arc<dyn BroadcastSink>>>,
    settings: Settings,
    listening: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    ping_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    last_listener_check: Mutex<Option<Instant>>,
}

impl NotificationSender {
    pub fn new(bus: Arc<dyn MessageBus>, cache: Arc<dyn CacheClient>, settings: Settings) -> Self {
        Self {
            bus,
            cache,
            sink: RwLock::new(None),
            settings,
            listening: AtomicBool::new(false),
            cancel: Mutex::new(None),
            ping_waiters: Mutex::new(Vec::new()),
            last_listener_check: Mutex::new(None),
        }
    }

    /// Attach the real-time hub. Group membership is the hub's concern.
    pub fn attach_sink(&self, sink: Arc<dyn BroadcastSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    pub fn detach_sink(&self) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = None;
        }
    }

    /// Whether the subscription loop believes it is running. The liveness
    /// probe ([`Self::is_listening`]) is the authoritative check.
    pub fn is_started(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Start the background subscription loop, replacing any previous one.
    pub fn listen(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.cancel.lock() {
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let sender = Arc::clone(self);
        tokio::spawn(async move {
            sender.subscription_loop(token).await;
        });
    }

    /// Stop the subscription loop. NotListening until `listen()` is called
    /// again.
    pub fn stop(&self) {
        if let Ok(mut slot) = self.cancel.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    async fn subscription_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = RETRY_BACKOFF_INITIAL;
        info!(channel = NOTIFICATION_CHANNEL, "notification listener starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.bus.subscribe(NOTIFICATION_CHANNEL) {
                Ok(mut rx) => {
                    backoff = RETRY_BACKOFF_INITIAL;
                    self.listening.store(true, Ordering::Relaxed);

                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                self.listening.store(false, Ordering::Relaxed);
                                info!("notification listener stopped");
                                return;
                            }
                            received = rx.recv() => match received {
                                Ok(raw) => self.handle_message(&raw),
                                Err(RecvError::Lagged(skipped)) => {
                                    warn!(skipped, "notification listener lagged");
                                }
                                Err(RecvError::Closed) => break,
                            }
                        }
                    }

                    self.listening.store(false, Ordering::Relaxed);
                    warn!("notification channel closed, resubscribing");
                }
                Err(e) => {
                    warn!(error = %e, "subscribe failed, retrying");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
        }

        self.listening.store(false, Ordering::Relaxed);
    }

    fn handle_message(&self, raw: &str) {
        let Some(message) = BusMessage::parse(raw) else {
            debug!(raw, "dropping malformed bus message");
            return;
        };

        match message {
            BusMessage::Ping => {
                if let Ok(mut waiters) = self.ping_waiters.lock() {
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
            BusMessage::OverLimit {
                scope,
                organization_id,
            } => match scope {
                LimitScope::Hourly => self.went_over_hourly_limit(&organization_id),
                LimitScope::Monthly => self.went_over_monthly_limit(&organization_id),
            },
            BusMessage::StackEvent {
                organization_id,
                project_id,
                stack_id,
                is_hidden,
                is_fixed,
                is_not_found,
            } => self.new_error(
                &organization_id,
                &project_id,
                &stack_id,
                is_hidden,
                is_fixed,
                is_not_found,
            ),
        }
    }

    /// Liveness probe: publish a ping on the consumed channel and wait up to
    /// 500 ms for the loop's handler to echo it back. Proves the loop is
    /// actually receiving messages, not merely that its task is alive. Any
    /// fault reads as not listening.
    pub async fn is_listening(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        match self.ping_waiters.lock() {
            Ok(mut waiters) => waiters.push(tx),
            Err(_) => return false,
        }

        if self
            .bus
            .publish(NOTIFICATION_CHANNEL, &BusMessage::Ping.encode())
            .is_err()
        {
            return false;
        }

        matches!(tokio::time::timeout(PING_TIMEOUT, rx).await, Ok(Ok(())))
    }

    /// Self-healing check: probe the listener at most once every 10 seconds
    /// and restart it when the probe fails.
    pub async fn ensure_listening(self: &Arc<Self>) {
        {
            let Ok(mut last) = self.last_listener_check.lock() else {
                return;
            };
            if let Some(checked) = *last {
                if checked.elapsed() < LISTENER_CHECK_INTERVAL {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        if !self.is_listening().await {
            warn!("notification listener probe failed, restarting");
            self.listen();
        }
    }

    fn throttle_key(organization_id: &str) -> String {
        format!("notify.org.{organization_id}")
    }

    fn current_sink(&self) -> Option<Arc<dyn BroadcastSink>> {
        self.sink.read().ok().and_then(|slot| slot.clone())
    }

    /// Broadcast to the organization's group unless a notification was sent
    /// inside the throttle window. The marker is TTL-less and overwritten on
    /// every actual send.
    fn throttled_broadcast(&self, organization_id: &str, event: &str, payload: serde_json::Value) {
        if !self.settings.enable_realtime {
            return;
        }
        let Some(sink) = self.current_sink() else {
            return;
        };

        let window = chrono::Duration::seconds(self.settings.notification_throttle_secs as i64);
        let key = Self::throttle_key(organization_id);
        if let Some(last) = self.cache.get::<DateTime<Utc>>(&key) {
            if Utc::now().signed_duration_since(last) < window {
                debug!(organization_id, event, "notification throttled");
                return;
            }
        }

        sink.broadcast(organization_id, event, payload);
        self.cache.set(&key, &Utc::now(), None);
    }

    /// Broadcast regardless of the throttle window; limit breaches must
    /// always reach clients.
    fn unthrottled_broadcast(
        &self,
        organization_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) {
        if !self.settings.enable_realtime {
            return;
        }
        let Some(sink) = self.current_sink() else {
            return;
        };
        sink.broadcast(organization_id, event, payload);
    }

    pub fn plan_changed(&self, organization_id: &str) {
        self.throttled_broadcast(
            organization_id,
            events::PLAN_CHANGED,
            serde_json::json!({ "organization_id": organization_id }),
        );
    }

    pub fn organization_updated(&self, organization_id: &str) {
        self.throttled_broadcast(
            organization_id,
            events::ORGANIZATION_UPDATED,
            serde_json::json!({ "organization_id": organization_id }),
        );
    }

    pub fn project_updated(&self, organization_id: &str, project_id: &str) {
        self.throttled_broadcast(
            organization_id,
            events::PROJECT_UPDATED,
            serde_json::json!({ "project_id": project_id }),
        );
    }

    #[allow(clippy::fn_params_excessive_bools)]
    pub fn stack_updated(
        &self,
        organization_id: &str,
        project_id: &str,
        stack_id: &str,
        is_hidden: bool,
        is_fixed: bool,
        is_not_found: bool,
    ) {
        self.throttled_broadcast(
            organization_id,
            events::STACK_UPDATED,
            serde_json::json!({
                "project_id": project_id,
                "stack_id": stack_id,
                "is_hidden": is_hidden,
                "is_fixed": is_fixed,
                "is_not_found": is_not_found,
            }),
        );
    }

    #[allow(clippy::fn_params_excessive_bools)]
    pub fn new_error(
        &self,
        organization_id: &str,
        project_id: &str,
        stack_id: &str,
        is_hidden: bool,
        is_fixed: bool,
        is_not_found: bool,
    ) {
        self.throttled_broadcast(
            organization_id,
            events::NEW_ERROR,
            serde_json::json!({
                "project_id": project_id,
                "stack_id": stack_id,
                "is_hidden": is_hidden,
                "is_fixed": is_fixed,
                "is_not_found": is_not_found,
            }),
        );
    }

    pub fn went_over_hourly_limit(&self, organization_id: &str) {
        self.unthrottled_broadcast(
            organization_id,
            events::WENT_OVER_HOURLY_LIMIT,
            serde_json::json!({ "organization_id": organization_id }),
        );
    }

    pub fn went_over_monthly_limit(&self, organization_id: &str) {
        self.unthrottled_broadcast(
            organization_id,
            events::WENT_OVER_MONTHLY_LIMIT,
            serde_json::json!({ "organization_id": organization_id }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::cache::InMemoryCache;
    use crate::notify::RecordingSink;

    struct Fixture {
        sender: Arc<NotificationSender>,
        sink: Arc<RecordingSink>,
        cache: Arc<InMemoryCache>,
        bus: Arc<InMemoryBus>,
    }

    fn fixture(settings: Settings) -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        let cache = Arc::new(InMemoryCache::new());
        let sink = Arc::new(RecordingSink::new());
        let sender = Arc::new(NotificationSender::new(
            bus.clone() as Arc<dyn MessageBus>,
            cache.clone() as Arc<dyn CacheClient>,
            settings,
        ));
        sender.attach_sink(sink.clone() as Arc<dyn BroadcastSink>);
        Fixture {
            sender,
            sink,
            cache,
            bus,
        }
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

    #[tokio::test]
    async fn throttles_per_organization_within_window() {
        let f = fixture(Settings::default());

        f.sender.stack_updated("o1", "p1", "s1", false, false, false);
        f.sender.stack_updated("o1", "p1", "s1", false, true, false);
        assert_eq!(f.sink.sent_count(), 1);

        // Another organization has its own window.
        f.sender.stack_updated("o2", "p1", "s1", false, false, false);
        assert_eq!(f.sink.sent_count(), 2);

        // Age the marker past the window; the next call broadcasts again.
        let stale = Utc::now() - chrono::Duration::seconds(6);
        let dyn_cache: &dyn CacheClient = f.cache.as_ref();
        dyn_cache.set("notify.org.o1", &stale, None);
        f.sender.stack_updated("o1", "p1", "s1", false, false, false);
        assert_eq!(f.sink.sent_count(), 3);
    }

    #[tokio::test]
    async fn limit_breaches_are_never_throttled() {
        let f = fixture(Settings::default());

        f.sender.went_over_hourly_limit("o1");
        f.sender.went_over_hourly_limit("o1");
        f.sender.went_over_monthly_limit("o1");
        assert_eq!(f.sink.sent_count(), 3);
    }

    #[tokio::test]
    async fn disabled_realtime_is_a_silent_no_op() {
        let settings = Settings {
            enable_realtime: false,
            ..Settings::default()
        };
        let f = fixture(settings);

        f.sender.plan_changed("o1");
        f.sender.went_over_hourly_limit("o1");
        assert_eq!(f.sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn detached_sink_is_a_silent_no_op() {
        let f = fixture(Settings::default());
        f.sender.detach_sink();

        f.sender.organization_updated("o1");
        assert_eq!(f.sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn listener_relays_stack_events_from_the_bus() {
        let f = fixture(Settings::default());
        f.sender.listen();
        assert!(wait_until(|| f.sender.is_started()).await);

        f.bus
            .publish(NOTIFICATION_CHANNEL, "o1:p1:s1:false:true:false")
            .unwrap();

        assert!(wait_until(|| f.sink.sent_count() == 1).await);
        let sent = f.sink.sent();
        assert_eq!(sent[0].group_id, "o1");
        assert_eq!(sent[0].event, "newError");
        assert_eq!(sent[0].payload["is_fixed"], serde_json::json!(true));

        f.sender.stop();
    }

    #[tokio::test]
    async fn listener_drops_malformed_messages() {
        let f = fixture(Settings::default());
        f.sender.listen();
        assert!(wait_until(|| f.sender.is_started()).await);

        f.bus.publish(NOTIFICATION_CHANNEL, "garbage:msg").unwrap();
        f.bus
            .publish(NOTIFICATION_CHANNEL, "o1:p1:s1:false:false:false")
            .unwrap();

        // Only the well-formed event arrives.
        assert!(wait_until(|| f.sink.sent_count() == 1).await);
        f.sender.stop();
    }

    #[tokio::test]
    async fn liveness_probe_reflects_listener_state() {
        let f = fixture(Settings::default());
        assert!(!f.sender.is_listening().await);

        f.sender.listen();
        assert!(wait_until(|| f.sender.is_started()).await);
        assert!(f.sender.is_listening().await);

        f.sender.stop();
        assert!(wait_until(|| !f.sender.is_started()).await);
        assert!(!f.sender.is_listening().await);
    }

    #[tokio::test]
    async fn ensure_listening_restarts_a_dead_listener() {
        let f = fixture(Settings::default());

        // Never started: the first check probes and restarts.
        f.sender.ensure_listening().await;
        assert!(wait_until(|| f.sender.is_started()).await);
        assert!(f.sender.is_listening().await);
    }

    #[tokio::test]
    async fn over_limit_messages_route_to_limit_handlers() {
        let f = fixture(Settings::default());
        f.sender.listen();
        assert!(wait_until(|| f.sender.is_started()).await);

        f.bus
            .publish(NOTIFICATION_CHANNEL, "overlimit:hr:o1")
            .unwrap();
        f.bus
            .publish(NOTIFICATION_CHANNEL, "overlimit:month:o1")
            .unwrap();

        assert!(wait_until(|| f.sink.sent_count() == 2).await);
        let sent = f.sink.sent();
        assert_eq!(sent[0].event, "wentOverHourlyLimit");
        assert_eq!(sent[1].event, "wentOverMonthlyLimit");
        f.sender.stop();
    }
}
