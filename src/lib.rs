//! # BrowserPilot Rust SDK
//!
//! Client-side coordination layer for BrowserPilot, a browser-automation
//! service. Keeps a local session synchronized with a remote automation
//! worker over two independent WebSocket connections: a control channel for
//! structured status/events and a stream channel for live visual frames plus
//! injected pointer input.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use browserpilot::{JobClient, JobRequest, OutputFormat, Session, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Submit a job over the HTTP surface
//!     let jobs = JobClient::new(None)?;
//!     let created = jobs
//!         .submit_job(
//!             &JobRequest::new("go to the jobs page and save the postings")
//!                 .with_format(OutputFormat::Json),
//!         )
//!         .await?;
//!
//!     // Open the control channel for live events
//!     let session = Session::new(SessionOptions::default())?;
//!     session.open(&created.job_id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Live events
//!
//! Inbound messages are normalized once, at the router boundary, into one
//! [`SessionEvent`] variant per event type; the session's aggregator keeps
//! the derived state a dashboard renders from (token totals, decision log,
//! screenshots, proxy health, status banner):
//!
//! ```rust,no_run
//! use browserpilot::{Session, SessionOptions, SessionEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(SessionOptions::default())?;
//!
//! // Extra subscribers can be attached before opening the channels.
//! session.bus().on("stream_frame", |event| {
//!     if let SessionEvent::StreamFrame(frame) = event {
//!         println!("frame: {} bytes of base64", frame.len());
//!     }
//! });
//!
//! session.open("job-42");
//! session.open_stream("job-42");
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod http;
pub mod input;
pub mod jobs;
pub mod manager;
pub mod router;
pub mod session;
pub mod state;
pub mod types;

// Re-export main types
pub use bus::EventBus;
pub use error::{PilotError, Result};
pub use http::HttpClient;
pub use input::{
    ClickParams, InteractionForwarder, PointerHit, Viewport, CANONICAL_HEIGHT, CANONICAL_WIDTH,
};
pub use jobs::{detect_format, JobClient};
pub use manager::ConnectionManager;
pub use session::{Session, SessionAggregator, SessionOptions};
pub use state::{ConnectionState, RetryPolicy};

// Re-export commonly used types
pub use types::{
    Decision,
    DecisionEntry,
    ExtractionUpdate,
    InputCommand,
    JobCreated,
    JobInfo,
    JobRequest,
    MouseButton,
    MouseEventType,
    OutputFormat,
    PageInfo,
    ProxyHealthSnapshot,
    ScreenshotEntry,
    ServerError,
    SessionEvent,
    Severity,
    StatusMessage,
    StatusUpdate,
    StreamSession,
    StreamingInfo,
    StreamingState,
    TokenUsageTotals,
    TokenUsageUpdate,
};

/// SDK version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
