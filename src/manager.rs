//! Socket lifecycle management for one automation session.
//!
//! A [`ConnectionManager`] owns two independent WebSocket connections keyed
//! by job identifier: the control channel (structured status/events, with a
//! bounded auto-reconnect policy) and the stream channel (inbound video
//! frames, outbound injected input, never auto-reconnected). Inbound
//! messages are normalized by [`crate::router`] and dispatched on the
//! session's [`EventBus`].

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::bus::EventBus;
use crate::error::Result;
use crate::router::{classify_control, classify_stream};
use crate::state::{ConnectionState, RetryPolicy};
use crate::types::{InputCommand, SessionEvent};

const STREAM_OUT_CAPACITY: usize = 64;

/// Rewrite an HTTP base URL to its WebSocket equivalent.
fn to_ws_base(base_url: &str) -> String {
    base_url
        .replace("https://", "wss://")
        .replace("http://", "ws://")
        .trim_end_matches('/')
        .to_string()
}

fn lock_state(state: &Mutex<ConnectionState>) -> std::sync::MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the control and stream sockets for one session.
///
/// The two channels share nothing but the enclosing manager: each has its
/// own lifecycle state, and only the control channel reconnects. Reopening
/// a channel invalidates the previous socket task along with any pending
/// reconnect timer, so two sockets can never race for the same session slot.
pub struct ConnectionManager {
    ws_base: String,
    retry: RetryPolicy,
    bus: Arc<EventBus>,
    control_state: Arc<Mutex<ConnectionState>>,
    stream_state: Arc<Mutex<ConnectionState>>,
    // Generation counters fence stale tasks out of state and bus access.
    control_gen: Arc<AtomicU64>,
    stream_gen: Arc<AtomicU64>,
    // Dropping a cancel sender stops the task it belongs to.
    control_cancel: Mutex<Option<mpsc::Sender<()>>>,
    stream_cancel: Mutex<Option<mpsc::Sender<()>>>,
    stream_out: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
}

impl ConnectionManager {
    /// Create a manager for the given HTTP base URL (rewritten to `ws://`).
    pub fn new(base_url: &str, retry: RetryPolicy, bus: Arc<EventBus>) -> Result<Self> {
        let ws_base = to_ws_base(base_url);
        Url::parse(&ws_base)?;
        Ok(Self {
            ws_base,
            retry,
            bus,
            control_state: Arc::new(Mutex::new(ConnectionState::Idle)),
            stream_state: Arc::new(Mutex::new(ConnectionState::Idle)),
            control_gen: Arc::new(AtomicU64::new(0)),
            stream_gen: Arc::new(AtomicU64::new(0)),
            control_cancel: Mutex::new(None),
            stream_cancel: Mutex::new(None),
            stream_out: Arc::new(Mutex::new(None)),
        })
    }

    /// Current control-channel state.
    pub fn control_state(&self) -> ConnectionState {
        lock_state(&self.control_state).clone()
    }

    /// Current stream-channel state.
    pub fn stream_state(&self) -> ConnectionState {
        lock_state(&self.stream_state).clone()
    }

    /// Whether the control channel is established.
    pub fn is_connected(&self) -> bool {
        self.control_state().is_open()
    }

    /// Whether the stream channel is established.
    pub fn is_stream_connected(&self) -> bool {
        self.stream_state().is_open()
    }

    /// Open the control channel for a job. Any existing control socket is
    /// closed first and its handlers fire no more events; a pending
    /// reconnect timer from a previous open is invalidated.
    pub fn open(&self, job_id: &str) {
        let url = format!("{}/ws/{}", self.ws_base, job_id);
        debug!(%url, "opening control channel");

        let my_gen = self.control_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        {
            let mut slot = self
                .control_cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Dropping the previous sender stops the previous task.
            *slot = Some(cancel_tx);
        }
        *lock_state(&self.control_state) = ConnectionState::Connecting;

        let bus = self.bus.clone();
        let state = self.control_state.clone();
        let gen = self.control_gen.clone();
        let retry = self.retry;

        tokio::spawn(async move {
            let current = |g: &AtomicU64| g.load(Ordering::SeqCst) == my_gen;
            let set_state = |s: ConnectionState| {
                if current(&gen) {
                    *lock_state(&state) = s;
                }
            };
            // An explicit close parks the channel in Closing; the superseded
            // task confirms Idle on its way out.
            let finish_close = || {
                let mut s = lock_state(&state);
                if *s == ConnectionState::Closing {
                    *s = ConnectionState::Idle;
                }
            };

            let mut failures = 0u32;
            loop {
                let connected = tokio::select! {
                    biased;
                    _ = cancel_rx.recv() => {
                        finish_close();
                        return;
                    }
                    result = connect_async(&url) => result,
                };

                match connected {
                    Ok((ws_stream, _)) => {
                        if !current(&gen) {
                            finish_close();
                            return;
                        }
                        failures = 0;
                        set_state(ConnectionState::Open);
                        bus.emit(&SessionEvent::Connected);

                        let (mut write, mut read) = ws_stream.split();
                        loop {
                            tokio::select! {
                                biased;
                                _ = cancel_rx.recv() => {
                                    let _ = write.send(Message::Close(None)).await;
                                    finish_close();
                                    return;
                                }
                                msg = read.next() => match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match serde_json::from_str::<serde_json::Value>(&text) {
                                            Ok(envelope) => {
                                                if !current(&gen) {
                                                    finish_close();
                                                    return;
                                                }
                                                bus.emit(&classify_control(envelope));
                                            }
                                            Err(err) => {
                                                // Malformed envelopes never tear
                                                // down the socket.
                                                warn!(%err, "dropped malformed control message");
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        debug!("control socket closed");
                                        break;
                                    }
                                    Some(Err(err)) => {
                                        warn!(%err, "control socket error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%err, "control connect failed");
                    }
                }

                if !current(&gen) {
                    finish_close();
                    return;
                }

                match retry.on_failure(failures) {
                    ConnectionState::Retrying { attempt, delay } => {
                        failures = attempt;
                        debug!(attempt, ?delay, "scheduling control reconnect");
                        set_state(ConnectionState::Retrying { attempt, delay });
                        tokio::select! {
                            biased;
                            _ = cancel_rx.recv() => {
                                finish_close();
                                return;
                            }
                            _ = sleep(delay) => {}
                        }
                        if !current(&gen) {
                            finish_close();
                            return;
                        }
                        set_state(ConnectionState::Connecting);
                    }
                    _ => {
                        set_state(ConnectionState::GaveUp);
                        if current(&gen) {
                            bus.emit(&SessionEvent::ReconnectExhausted {
                                attempts: retry.max_attempts,
                            });
                        }
                        finish_close();
                        return;
                    }
                }
            }
        });
    }

    /// Close the control channel. Idempotent; no reconnect is scheduled. A
    /// live channel drains through `Closing` and reaches `Idle` once the
    /// socket task has torn down.
    pub fn close(&self) {
        self.control_gen.fetch_add(1, Ordering::SeqCst);
        {
            // Set Closing before dropping the cancel sender so the task's
            // teardown always observes it.
            let mut state = lock_state(&self.control_state);
            *state = match *state {
                ConnectionState::Idle | ConnectionState::GaveUp => ConnectionState::Idle,
                _ => ConnectionState::Closing,
            };
        }
        let mut slot = self
            .control_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    /// Open the stream channel for a job. Shares no lifecycle state with the
    /// control channel and never auto-reconnects: a close or error only
    /// emits the corresponding event, and resumption requires calling this
    /// again.
    pub fn open_stream(&self, job_id: &str) {
        let url = format!("{}/stream/{}", self.ws_base, job_id);
        debug!(%url, "opening stream channel");

        let my_gen = self.stream_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(STREAM_OUT_CAPACITY);
        {
            let mut slot = self
                .stream_cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(cancel_tx);
        }
        {
            let mut slot = self
                .stream_out
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(out_tx);
        }
        *lock_state(&self.stream_state) = ConnectionState::Connecting;

        let bus = self.bus.clone();
        let state = self.stream_state.clone();
        let gen = self.stream_gen.clone();
        let out_slot = self.stream_out.clone();

        tokio::spawn(async move {
            let current = |g: &AtomicU64| g.load(Ordering::SeqCst) == my_gen;
            let set_state = |s: ConnectionState| {
                if current(&gen) {
                    *lock_state(&state) = s;
                }
            };
            let finish_close = || {
                let mut s = lock_state(&state);
                if *s == ConnectionState::Closing {
                    *s = ConnectionState::Idle;
                }
            };

            let connected = tokio::select! {
                biased;
                _ = cancel_rx.recv() => {
                    finish_close();
                    return;
                }
                result = connect_async(&url) => result,
            };

            let ws_stream = match connected {
                Ok((ws_stream, _)) => ws_stream,
                Err(err) => {
                    warn!(%err, "stream connect failed");
                    set_state(ConnectionState::Idle);
                    if current(&gen) {
                        bus.emit(&SessionEvent::StreamError(err.to_string()));
                        bus.emit(&SessionEvent::StreamDisconnected);
                    }
                    finish_close();
                    return;
                }
            };

            if !current(&gen) {
                finish_close();
                return;
            }
            set_state(ConnectionState::Open);
            bus.emit(&SessionEvent::StreamConnected);

            let (mut write, mut read) = ws_stream.split();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.recv() => {
                        let _ = write.send(Message::Close(None)).await;
                        finish_close();
                        return;
                    }
                    outbound = out_rx.recv() => match outbound {
                        Some(msg) => {
                            if let Err(err) = write.send(msg).await {
                                warn!(%err, "stream send failed");
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            finish_close();
                            return;
                        }
                    },
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<serde_json::Value>(&text) {
                                Ok(envelope) => {
                                    if !current(&gen) {
                                        finish_close();
                                        return;
                                    }
                                    bus.emit(&classify_stream(envelope));
                                }
                                Err(err) => {
                                    warn!(%err, "dropped malformed stream message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("stream socket closed");
                            break;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "stream socket error");
                            if current(&gen) {
                                bus.emit(&SessionEvent::StreamError(err.to_string()));
                            }
                            break;
                        }
                        _ => {}
                    }
                }
            }

            set_state(ConnectionState::Idle);
            if current(&gen) {
                let mut slot = out_slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *slot = None;
                bus.emit(&SessionEvent::StreamDisconnected);
            }
            finish_close();
        });
    }

    /// Close the stream channel. Idempotent. A live channel drains through
    /// `Closing` and reaches `Idle` once the socket task has torn down.
    pub fn close_stream(&self) {
        self.stream_gen.fetch_add(1, Ordering::SeqCst);
        let was_open;
        {
            let mut state = lock_state(&self.stream_state);
            was_open = state.is_open();
            *state = match *state {
                ConnectionState::Idle | ConnectionState::GaveUp => ConnectionState::Idle,
                _ => ConnectionState::Closing,
            };
        }
        {
            let mut slot = self
                .stream_cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = None;
        }
        {
            let mut slot = self
                .stream_out
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = None;
        }
        if was_open {
            self.bus.emit(&SessionEvent::StreamDisconnected);
        }
    }

    /// Send an input-injection command over the stream channel. Transmits
    /// only while the stream socket is open; otherwise the command is
    /// silently dropped (pointer relay is best-effort, not transactional).
    pub fn send(&self, command: &InputCommand) {
        if !self.is_stream_connected() {
            warn!("stream channel not open; dropping input command");
            return;
        }
        let payload = match serde_json::to_string(command) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "failed to encode input command");
                return;
            }
        };
        let slot = self
            .stream_out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = slot.as_ref() {
            if tx.try_send(Message::Text(payload)).is_err() {
                warn!("stream outbound queue unavailable; dropping input command");
            }
        }
    }

    /// The event bus this manager dispatches on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MouseButton, MouseEventType};

    #[test]
    fn base_url_rewrites_to_websocket_scheme() {
        assert_eq!(to_ws_base("http://localhost:8000/"), "ws://localhost:8000");
        assert_eq!(
            to_ws_base("https://pilot.example.com"),
            "wss://pilot.example.com"
        );
        assert_eq!(to_ws_base("ws://127.0.0.1:9001"), "ws://127.0.0.1:9001");
    }

    #[tokio::test]
    async fn send_on_closed_stream_neither_panics_nor_queues() {
        let bus = Arc::new(EventBus::new());
        let manager =
            ConnectionManager::new("http://127.0.0.1:1", RetryPolicy::default(), bus).unwrap();

        assert_eq!(manager.stream_state(), ConnectionState::Idle);
        manager.send(&InputCommand::Mouse {
            event_type: MouseEventType::Pressed,
            x: 10,
            y: 10,
            button: MouseButton::Left,
            click_count: Some(1),
        });
        // Still idle, nothing transmitted, no error raised.
        assert_eq!(manager.stream_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let manager =
            ConnectionManager::new("http://127.0.0.1:1", RetryPolicy::default(), bus).unwrap();
        manager.close();
        manager.close();
        manager.close_stream();
        manager.close_stream();
        assert_eq!(manager.control_state(), ConnectionState::Idle);
        assert_eq!(manager.stream_state(), ConnectionState::Idle);
    }
}
