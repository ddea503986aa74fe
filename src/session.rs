//! Session wiring and derived UI state.
//!
//! A [`Session`] owns one [`ConnectionManager`], one [`EventBus`] instance
//! (created at session start, torn down with the session, so multiple
//! sessions can coexist in one process) and one [`SessionAggregator`] that
//! subscribes to normalized events and maintains the state the dashboard
//! renders from.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::Result;
use crate::input::{ClickParams, InteractionForwarder, PointerHit, Viewport};
use crate::manager::ConnectionManager;
use crate::state::{ConnectionState, RetryPolicy};
use crate::types::{
    Decision, DecisionEntry, ProxyHealthSnapshot, ScreenshotEntry, SessionEvent, Severity,
    StatusMessage, StatusUpdate, TokenUsageTotals, TokenUsageUpdate,
};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Event names the aggregator subscribes to during session setup.
const AGGREGATED_EVENTS: [&str; 11] = [
    "connected",
    "decision",
    "screenshot",
    "token_usage",
    "proxy_stats",
    "page_info",
    "extraction",
    "streaming_info",
    "status",
    "error",
    "reconnect_exhausted",
];

/// Options for creating a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// HTTP base URL of the BrowserPilot server (socket endpoints are
    /// derived from it).
    pub base_url: String,
    /// Control-channel reconnection policy.
    pub retry: RetryPolicy,
    /// Canonical viewport for pointer coordinate mapping.
    pub canonical: Viewport,
    /// Gap between the synthesized press and release of a click.
    pub press_release_gap: Duration,
    /// How long a status banner stays up unless superseded.
    pub status_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            canonical: Viewport::default(),
            press_release_gap: crate::input::DEFAULT_PRESS_RELEASE_GAP,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }
}

impl SessionOptions {
    /// Create options with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the reconnection policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the canonical viewport.
    pub fn with_canonical(mut self, canonical: Viewport) -> Self {
        self.canonical = canonical;
        self
    }

    /// Set the press/release gap.
    pub fn with_press_release_gap(mut self, gap: Duration) -> Self {
        self.press_release_gap = gap;
        self
    }

    /// Set the status banner timeout.
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}

#[derive(Default)]
struct AggregatorState {
    token_usage: TokenUsageTotals,
    decisions: Vec<DecisionEntry>,
    screenshots: Vec<ScreenshotEntry>,
    proxy_health: ProxyHealthSnapshot,
    status: Option<StatusMessage>,
    // Bumped on every banner so a stale dismiss timer cannot clear a newer
    // message.
    status_seq: u64,
    stream_visible: bool,
    result_format: Option<String>,
}

/// Maintains derived session state from normalized events: cumulative token
/// counters, the append-only decision log, the screenshot collection, the
/// replace-on-update proxy snapshot and the self-expiring status banner.
#[derive(Clone)]
pub struct SessionAggregator {
    inner: Arc<Mutex<AggregatorState>>,
    status_timeout: Duration,
}

fn upper_or_txt(format: Option<&str>) -> String {
    format.unwrap_or("txt").to_uppercase()
}

impl SessionAggregator {
    /// Create an empty aggregator.
    pub fn new(status_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AggregatorState::default())),
            status_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one normalized event to the derived state.
    pub fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.show_status(StatusMessage::new("Connected to server", Severity::Success));
            }
            SessionEvent::Decision(decision) => {
                if let Some(usage) = &decision.token_usage {
                    self.update_token_usage(usage);
                }
                self.add_decision(decision.clone());
            }
            SessionEvent::Screenshot(payload) => self.add_screenshot(payload),
            SessionEvent::TokenUsage(update) => self.update_token_usage(update),
            SessionEvent::ProxyStats(snapshot) => self.update_proxy_stats(snapshot.clone()),
            SessionEvent::PageInfo(info) => {
                self.show_status(StatusMessage::new(
                    format!(
                        "Step {}: {} ({} elements) [{}]",
                        info.step,
                        info.url,
                        info.interactive_elements,
                        upper_or_txt(info.format.as_deref())
                    ),
                    Severity::Info,
                ));
            }
            SessionEvent::Extraction(update) => match update.status.as_str() {
                "starting" => {
                    self.show_status(StatusMessage::new(
                        format!(
                            "Starting extraction (attempt {}) in {} format...",
                            update.attempt.unwrap_or(1),
                            upper_or_txt(update.format.as_deref())
                        ),
                        Severity::Info,
                    ));
                }
                "completed" => {
                    self.show_status(StatusMessage::new(
                        format!(
                            "Extraction completed! Format: {}",
                            upper_or_txt(update.format.as_deref())
                        ),
                        Severity::Success,
                    ));
                    self.mark_result_ready(update.format.as_deref());
                }
                other => debug!(status = other, "ignoring extraction status"),
            },
            SessionEvent::StreamingInfo(info) => {
                if info.streaming.enabled {
                    // Reveal the stream viewport even if the stream socket
                    // is not open yet.
                    self.lock().stream_visible = true;
                    self.show_status(StatusMessage::new("Streaming available", Severity::Success));
                }
            }
            SessionEvent::Status(update) => self.handle_status_update(update),
            SessionEvent::ServerError(error) => {
                if let Some(stats) = &error.proxy_stats {
                    self.update_proxy_stats(stats.clone());
                }
                self.show_status(StatusMessage::new(error.text(), Severity::Error));
            }
            SessionEvent::ReconnectExhausted { attempts } => {
                self.show_status(StatusMessage::new(
                    format!("Connection lost after {attempts} reconnect attempts"),
                    Severity::Error,
                ));
            }
            _ => {}
        }
    }

    fn handle_status_update(&self, update: &StatusUpdate) {
        match update.status.as_str() {
            "started" => {
                self.show_status(StatusMessage::new(
                    format!(
                        "Status: started | Format: {}",
                        upper_or_txt(update.detected_format.as_deref())
                    ),
                    Severity::Info,
                ));
            }
            "finished" => {
                self.show_status(StatusMessage::new(
                    format!(
                        "Status: finished | Final format: {}",
                        upper_or_txt(update.final_format.as_deref())
                    ),
                    Severity::Success,
                ));
                self.mark_result_ready(update.final_format.as_deref());
            }
            other => debug!(status = other, "ignoring status update"),
        }
    }

    /// Fold a token-usage fragment into the running totals. Absent fields
    /// contribute zero; `api_calls` grows by exactly one per call.
    pub fn update_token_usage(&self, update: &TokenUsageUpdate) {
        self.lock().token_usage.apply(update);
    }

    /// Current token totals.
    pub fn token_usage(&self) -> TokenUsageTotals {
        self.lock().token_usage.clone()
    }

    /// Append a decision verbatim, preserving arrival order.
    pub fn add_decision(&self, decision: Decision) {
        self.lock().decisions.push(DecisionEntry::from(decision));
    }

    /// Reset the decision log.
    pub fn clear_decisions(&self) {
        self.lock().decisions.clear();
    }

    /// Snapshot of the decision log in arrival order.
    pub fn decisions(&self) -> Vec<DecisionEntry> {
        self.lock().decisions.clone()
    }

    /// Append a screenshot. Only string payloads are accepted; anything else
    /// is rejected with a diagnostic, never an error.
    pub fn add_screenshot(&self, payload: &serde_json::Value) {
        let Some(image) = payload.as_str() else {
            warn!("invalid screenshot payload type; expected base64 string");
            return;
        };
        let mut state = self.lock();
        let index = state.screenshots.len() + 1;
        state.screenshots.push(ScreenshotEntry {
            index,
            image: image.to_string(),
            captured_at: SystemTime::now(),
        });
    }

    /// Snapshot of the screenshot collection.
    pub fn screenshots(&self) -> Vec<ScreenshotEntry> {
        self.lock().screenshots.clone()
    }

    /// Replace the proxy-health snapshot wholesale.
    pub fn update_proxy_stats(&self, snapshot: ProxyHealthSnapshot) {
        self.lock().proxy_health = snapshot;
    }

    /// Latest proxy-health snapshot.
    pub fn proxy_health(&self) -> ProxyHealthSnapshot {
        self.lock().proxy_health.clone()
    }

    /// Display a status banner. It self-dismisses after the configured
    /// timeout unless a newer message supersedes it first.
    pub fn show_status(&self, message: StatusMessage) {
        let seq = {
            let mut state = self.lock();
            state.status_seq += 1;
            state.status = Some(message);
            state.status_seq
        };

        // Auto-dismiss requires a runtime; without one the banner stays
        // until superseded.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            let timeout = self.status_timeout;
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                let mut state = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if state.status_seq == seq {
                    state.status = None;
                }
            });
        }
    }

    /// The currently displayed status banner, if any.
    pub fn status(&self) -> Option<StatusMessage> {
        self.lock().status.clone()
    }

    /// Whether the stream viewport should be shown.
    pub fn stream_visible(&self) -> bool {
        self.lock().stream_visible
    }

    fn mark_result_ready(&self, format: Option<&str>) {
        self.lock().result_format = Some(format.unwrap_or("txt").to_string());
    }

    /// The result format once the job has produced a downloadable artifact.
    pub fn result_ready(&self) -> Option<String> {
        self.lock().result_format.clone()
    }
}

/// One live automation session: sockets, event bus, derived state and
/// pointer forwarding, wired together.
pub struct Session {
    bus: Arc<EventBus>,
    manager: Arc<ConnectionManager>,
    forwarder: InteractionForwarder,
    aggregator: SessionAggregator,
}

impl Session {
    /// Create a session. The event bus is an instance owned by this session,
    /// not process-wide state.
    pub fn new(options: SessionOptions) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(ConnectionManager::new(
            &options.base_url,
            options.retry,
            bus.clone(),
        )?);
        let aggregator = SessionAggregator::new(options.status_timeout);

        for name in AGGREGATED_EVENTS {
            let agg = aggregator.clone();
            bus.on(name, move |event| agg.handle(event));
        }

        let forwarder = InteractionForwarder::with_config(
            manager.clone(),
            options.canonical,
            options.press_release_gap,
        );

        Ok(Self {
            bus,
            manager,
            forwarder,
            aggregator,
        })
    }

    /// Open the control channel for a job.
    pub fn open(&self, job_id: &str) {
        self.manager.open(job_id);
    }

    /// Open the stream channel for a job.
    pub fn open_stream(&self, job_id: &str) {
        self.manager.open_stream(job_id);
    }

    /// Close the control channel.
    pub fn close(&self) {
        self.manager.close();
    }

    /// Close the stream channel.
    pub fn close_stream(&self) {
        self.manager.close_stream();
    }

    /// Forward a left single click against the rendered stream surface.
    pub fn click(&self, hit: PointerHit) {
        self.forwarder.click(hit);
    }

    /// Forward a click with explicit parameters.
    pub fn click_with(&self, hit: PointerHit, params: ClickParams) {
        self.forwarder.click_with(hit, params);
    }

    /// Current control-channel state.
    pub fn control_state(&self) -> ConnectionState {
        self.manager.control_state()
    }

    /// Current stream-channel state.
    pub fn stream_state(&self) -> ConnectionState {
        self.manager.stream_state()
    }

    /// The derived-state aggregator.
    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    /// The session's event bus, for additional subscriptions (e.g. stream
    /// frames).
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The underlying connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn aggregator() -> SessionAggregator {
        SessionAggregator::new(Duration::from_secs(5))
    }

    #[test]
    fn token_totals_are_the_per_field_sum_and_api_calls_the_update_count() {
        let agg = aggregator();
        agg.update_token_usage(&TokenUsageUpdate {
            prompt_tokens: 120,
            response_tokens: 30,
            total_tokens: 150,
        });
        agg.update_token_usage(&TokenUsageUpdate {
            prompt_tokens: 10,
            ..Default::default()
        });
        agg.update_token_usage(&TokenUsageUpdate::default());

        let totals = agg.token_usage();
        assert_eq!(totals.prompt_tokens, 130);
        assert_eq!(totals.response_tokens, 30);
        assert_eq!(totals.total_tokens, 150);
        assert_eq!(totals.api_calls, 3);
    }

    #[test]
    fn decision_log_appends_in_order_and_clears_exactly_once() {
        let agg = aggregator();
        for i in 0..4 {
            agg.add_decision(Decision {
                action: Some(format!("action-{i}")),
                ..Default::default()
            });
        }
        let log = agg.decisions();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0].action, "action-0");
        assert_eq!(log[3].action, "action-3");

        agg.clear_decisions();
        assert!(agg.decisions().is_empty());

        agg.add_decision(Decision::default());
        assert_eq!(agg.decisions().len(), 1);
    }

    #[test]
    fn decision_with_embedded_usage_feeds_the_accumulator() {
        let agg = aggregator();
        agg.handle(&SessionEvent::Decision(Decision {
            action: Some("click".to_string()),
            token_usage: Some(TokenUsageUpdate {
                prompt_tokens: 7,
                response_tokens: 3,
                total_tokens: 10,
            }),
            ..Default::default()
        }));

        assert_eq!(agg.decisions().len(), 1);
        let totals = agg.token_usage();
        assert_eq!(totals.total_tokens, 10);
        assert_eq!(totals.api_calls, 1);
    }

    #[test]
    fn screenshots_receive_dense_one_based_indices() {
        let agg = aggregator();
        for image in ["AA==", "BB==", "CC=="] {
            agg.add_screenshot(&json!(image));
        }
        let shots = agg.screenshots();
        assert_eq!(
            shots.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(shots[1].image, "BB==");
    }

    #[test]
    fn non_string_screenshot_payload_is_rejected_without_panicking() {
        let agg = aggregator();
        agg.add_screenshot(&json!({"unexpected": "object"}));
        agg.add_screenshot(&json!(42));
        assert!(agg.screenshots().is_empty());

        agg.add_screenshot(&json!("DD=="));
        assert_eq!(agg.screenshots()[0].index, 1);
    }

    #[test]
    fn proxy_snapshot_replaces_wholesale_with_absent_fields_zeroed() {
        let agg = aggregator();
        agg.update_proxy_stats(ProxyHealthSnapshot {
            available: 5,
            healthy: 4,
            blocked: 1,
            retry_count: 9,
        });
        // An update carrying only one field zeroes the rest.
        agg.handle(&SessionEvent::ProxyStats(ProxyHealthSnapshot {
            healthy: 2,
            ..Default::default()
        }));

        let snapshot = agg.proxy_health();
        assert_eq!(snapshot.healthy, 2);
        assert_eq!(snapshot.available, 0);
        assert_eq!(snapshot.blocked, 0);
        assert_eq!(snapshot.retry_count, 0);
    }

    #[test]
    fn error_event_produces_one_banner_and_may_update_proxy_stats() {
        let agg = aggregator();
        agg.handle(&SessionEvent::ServerError(crate::types::ServerError {
            message: Some("proxy pool exhausted".to_string()),
            error: None,
            proxy_stats: Some(ProxyHealthSnapshot {
                blocked: 3,
                ..Default::default()
            }),
        }));

        let status = agg.status().expect("banner expected");
        assert_eq!(status.severity, Severity::Error);
        assert_eq!(status.text, "proxy pool exhausted");
        assert_eq!(agg.proxy_health().blocked, 3);
    }

    #[test]
    fn streaming_info_reveals_the_viewport_before_the_stream_opens() {
        let agg = aggregator();
        assert!(!agg.stream_visible());
        agg.handle(&SessionEvent::StreamingInfo(crate::types::StreamingInfo {
            streaming: crate::types::StreamingState { enabled: true },
        }));
        assert!(agg.stream_visible());
        let status = agg.status().expect("banner expected");
        assert_eq!(status.severity, Severity::Success);
    }

    #[test]
    fn finished_status_latches_the_result_format() {
        let agg = aggregator();
        assert!(agg.result_ready().is_none());
        agg.handle(&SessionEvent::Status(StatusUpdate {
            status: "finished".to_string(),
            detected_format: None,
            final_format: Some("json".to_string()),
        }));
        assert_eq!(agg.result_ready().as_deref(), Some("json"));
        let status = agg.status().expect("banner expected");
        assert_eq!(status.severity, Severity::Success);
        assert!(status.text.contains("JSON"));
    }

    #[tokio::test(start_paused = true)]
    async fn status_banner_self_dismisses_after_the_timeout() {
        let agg = SessionAggregator::new(Duration::from_secs(5));
        agg.show_status(StatusMessage::new("working", Severity::Info));
        assert!(agg.status().is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(agg.status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_banner_supersedes_the_pending_dismissal() {
        let agg = SessionAggregator::new(Duration::from_secs(5));
        agg.show_status(StatusMessage::new("first", Severity::Info));
        tokio::time::sleep(Duration::from_secs(3)).await;
        agg.show_status(StatusMessage::new("second", Severity::Success));

        // The first banner's timer fires now but must not clear the second.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = agg.status().expect("second banner still up");
        assert_eq!(status.text, "second");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(agg.status().is_none());
    }
}
