//! Basic example demonstrating BrowserPilot SDK usage.
//!
//! Run with:
//! ```sh
//! BROWSERPILOT_URL=http://localhost:8000 cargo run --example basic
//! ```

use browserpilot::{
    detect_format, JobClient, JobRequest, OutputFormat, Session, SessionEvent, SessionOptions,
};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Get the server URL from the environment
    let base_url =
        env::var("BROWSERPILOT_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let prompt = "go to news.ycombinator.com and save the top 5 stories as JSON";

    // A format named in the prompt wins over the dropdown default
    let format = detect_format(prompt).unwrap_or(OutputFormat::Txt);
    println!("Submitting job ({} format)...", format);

    // Submit the job over the HTTP surface
    let jobs = JobClient::new(Some(base_url.clone()))?;
    let created = jobs
        .submit_job(&JobRequest::new(prompt).with_format(format))
        .await?;
    println!("Job created: {}", created.job_id);

    // Wire up a session for live events
    let session = Session::new(SessionOptions::new(&base_url))?;

    // Subscribe to a few events before opening the channels
    session.bus().on("decision", |event| {
        if let SessionEvent::Decision(decision) = event {
            println!(
                "🤖 Decision: {} ({})",
                decision.action.as_deref().unwrap_or("unknown"),
                decision.reason.as_deref().unwrap_or("no reason")
            );
        }
    });
    session.bus().on("stream_frame", |event| {
        if let SessionEvent::StreamFrame(frame) = event {
            println!("🎞  Frame: {} bytes of base64", frame.len());
        }
    });

    println!("Opening control channel...");
    session.open(&created.job_id);

    if created.streaming_enabled {
        println!("Opening stream channel...");
        session.open_stream(&created.job_id);
    }

    // Poll the derived state until the job produces a result
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;

        if let Some(banner) = session.aggregator().status() {
            println!("📋 {}", banner.text);
        }

        let totals = session.aggregator().token_usage();
        if totals.api_calls > 0 {
            println!(
                "🪙 Tokens: {} total over {} calls",
                totals.total_tokens, totals.api_calls
            );
        }

        if let Some(result_format) = session.aggregator().result_ready() {
            println!("Result ready in {} format, downloading...", result_format);
            let bytes = jobs.fetch_result(&created.job_id).await?;
            println!("Downloaded {} bytes", bytes.len());
            break;
        }
    }

    // Disconnect
    session.close_stream();
    session.close();
    println!("Disconnected. Done!");

    Ok(())
}
