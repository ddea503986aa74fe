//! Type definitions for the BrowserPilot SDK.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

// === Job management (HTTP surface) ===

/// Output format for an extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Txt,
    Md,
    Json,
    Html,
    Csv,
    Pdf,
}

impl OutputFormat {
    /// The wire/file representation (`txt`, `md`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Json => "json",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Txt
    }
}

/// Request body for submitting an automation job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    /// Natural-language task description.
    pub prompt: String,
    /// Requested output format.
    pub format: OutputFormat,
    /// Run the remote browser headless.
    pub headless: bool,
    /// Ask the worker to set up a pixel stream for this job.
    pub enable_streaming: bool,
}

impl JobRequest {
    /// Create a job request with the default options (txt, headed, streaming on).
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: OutputFormat::Txt,
            headless: false,
            enable_streaming: true,
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set headless mode.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Enable or disable streaming.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.enable_streaming = streaming;
        self
    }
}

/// Response from submitting a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    /// Opaque identifier for the new job. Keys both socket endpoints.
    pub job_id: String,
    /// Format the server accepted (may differ if the request was invalid).
    #[serde(default)]
    pub format: Option<String>,
    /// Whether the server set up a pixel stream.
    #[serde(default)]
    pub streaming_enabled: bool,
    /// Stream endpoint advertised by the server, when streaming is enabled.
    #[serde(default)]
    pub stream_url: Option<String>,
    /// Proxy pool snapshot at submission time.
    #[serde(default)]
    pub proxy_stats: Option<ProxyHealthSnapshot>,
}

/// Job metadata, fetched by identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInfo {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub file_exists: bool,
    #[serde(default)]
    pub proxy_stats: Option<ProxyHealthSnapshot>,
}

/// Response from creating a streaming session for a job.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSession {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
}

// === Control-channel payloads ===

/// One token-usage fragment as reported by the worker. Absent fields
/// contribute zero when accumulated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageUpdate {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub response_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Running token totals maintained by the session aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsageTotals {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub total_tokens: u64,
    /// Number of updates applied, incremented once per update regardless of
    /// which fields were present.
    pub api_calls: u64,
}

impl TokenUsageTotals {
    /// Fold one fragment into the running totals.
    pub fn apply(&mut self, update: &TokenUsageUpdate) {
        self.prompt_tokens += update.prompt_tokens;
        self.response_tokens += update.response_tokens;
        self.total_tokens += update.total_tokens;
        self.api_calls += 1;
    }
}

/// A decision made by the automation worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Interactive-element index the action targeted, if any.
    #[serde(default)]
    pub index: Option<i64>,
    /// Text typed or extracted by the action, if any.
    #[serde(default)]
    pub text: Option<String>,
    /// Some workers attach the usage for the call that produced the decision.
    #[serde(default)]
    pub token_usage: Option<TokenUsageUpdate>,
}

/// One entry in the append-only decision log.
#[derive(Debug, Clone)]
pub struct DecisionEntry {
    pub action: String,
    pub reason: String,
    pub element_index: Option<i64>,
    pub text: Option<String>,
    pub received_at: SystemTime,
}

impl From<Decision> for DecisionEntry {
    fn from(decision: Decision) -> Self {
        Self {
            action: decision.action.unwrap_or_else(|| "unknown".to_string()),
            reason: decision
                .reason
                .unwrap_or_else(|| "No reason provided".to_string()),
            element_index: decision.index,
            text: decision.text,
            received_at: SystemTime::now(),
        }
    }
}

/// One captured screenshot, indexed densely from 1 in arrival order.
#[derive(Debug, Clone)]
pub struct ScreenshotEntry {
    pub index: usize,
    /// Base64-encoded image bytes, exactly as received.
    pub image: String,
    pub captured_at: SystemTime,
}

/// Proxy pool health, replaced wholesale on each update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHealthSnapshot {
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub healthy: u64,
    #[serde(default)]
    pub blocked: u64,
    #[serde(default)]
    pub retry_count: u64,
}

/// Page progress report from the worker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub step: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub interactive_elements: u64,
    #[serde(default)]
    pub format: Option<String>,
}

/// Extraction phase update (`starting` or `completed`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionUpdate {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub attempt: Option<u64>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Streaming availability announcement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamingInfo {
    #[serde(default)]
    pub streaming: StreamingState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamingState {
    #[serde(default)]
    pub enabled: bool,
}

/// Generic job status update (`started` / `finished`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub detected_format: Option<String>,
    #[serde(default)]
    pub final_format: Option<String>,
}

/// Business failure reported by the server over the control channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub proxy_stats: Option<ProxyHealthSnapshot>,
}

impl ServerError {
    /// Human-readable failure text, whichever field the server used.
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("Unknown error")
    }
}

// === Normalized session events ===

/// A control- or stream-channel message after router normalization, one
/// tagged variant per event type. Consumers never see the loose wrapped/bare
/// envelope shapes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Control socket opened (fires on every successful open, including
    /// reconnects).
    Connected,
    Decision(Decision),
    /// Raw screenshot payload. The aggregator enforces the string-only
    /// contract so a malformed payload is a diagnostic, not a crash.
    Screenshot(serde_json::Value),
    TokenUsage(TokenUsageUpdate),
    ProxyStats(ProxyHealthSnapshot),
    PageInfo(PageInfo),
    Extraction(ExtractionUpdate),
    StreamingInfo(StreamingInfo),
    Status(StatusUpdate),
    ServerError(ServerError),
    /// The control channel gave up after exhausting its retry budget.
    ReconnectExhausted { attempts: u32 },
    /// Unrecognized control message, republished under its literal
    /// discriminator.
    Other {
        event: String,
        payload: serde_json::Value,
    },
    StreamConnected,
    StreamDisconnected,
    StreamError(String),
    /// One encoded video frame (base64).
    StreamFrame(String),
    /// Stream message with an unrecognized subtype, republished under the
    /// `stream_` prefix so control and stream names can never collide.
    Stream {
        subtype: String,
        payload: serde_json::Value,
    },
}

impl SessionEvent {
    /// The event name this event is dispatched under.
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Connected => Cow::Borrowed("connected"),
            Self::Decision(_) => Cow::Borrowed("decision"),
            Self::Screenshot(_) => Cow::Borrowed("screenshot"),
            Self::TokenUsage(_) => Cow::Borrowed("token_usage"),
            Self::ProxyStats(_) => Cow::Borrowed("proxy_stats"),
            Self::PageInfo(_) => Cow::Borrowed("page_info"),
            Self::Extraction(_) => Cow::Borrowed("extraction"),
            Self::StreamingInfo(_) => Cow::Borrowed("streaming_info"),
            Self::Status(_) => Cow::Borrowed("status"),
            Self::ServerError(_) => Cow::Borrowed("error"),
            Self::ReconnectExhausted { .. } => Cow::Borrowed("reconnect_exhausted"),
            Self::Other { event, .. } => Cow::Borrowed(event),
            Self::StreamConnected => Cow::Borrowed("stream_connected"),
            Self::StreamDisconnected => Cow::Borrowed("stream_disconnected"),
            Self::StreamError(_) => Cow::Borrowed("stream_error"),
            Self::StreamFrame(_) => Cow::Borrowed("stream_frame"),
            Self::Stream { subtype, .. } => Cow::Owned(format!("stream_{subtype}")),
        }
    }
}

// === Outbound stream commands ===

/// Mouse event kind understood by the remote input injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MouseEventType {
    #[serde(rename = "mousePressed")]
    Pressed,
    #[serde(rename = "mouseReleased")]
    Released,
}

/// Mouse button for injected input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// An input-injection command sent over the stream channel. Coordinates are
/// in canonical viewport space.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InputCommand {
    #[serde(rename = "mouse")]
    Mouse {
        #[serde(rename = "eventType")]
        event_type: MouseEventType,
        x: i64,
        y: i64,
        button: MouseButton,
        #[serde(rename = "clickCount", skip_serializing_if = "Option::is_none")]
        click_count: Option<u32>,
    },
    #[serde(rename = "keyboard")]
    Keyboard {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

// === Status banner ===

/// Classification of a status banner message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// A user-facing status message. Each one self-dismisses after a fixed
/// timeout unless superseded earlier by a newer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}
