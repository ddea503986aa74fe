//! Job-management HTTP surface.
//!
//! The SDK consumes but does not own this surface: submit a job, fetch its
//! metadata and result artifact, and manage streaming sessions. The job
//! identifier returned here keys both socket endpoints.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::http::HttpClient;
use crate::types::{JobCreated, JobInfo, JobRequest, OutputFormat, StreamSession};

/// Client for the job-management endpoints.
#[derive(Debug, Clone)]
pub struct JobClient {
    http: HttpClient,
}

impl JobClient {
    /// Create a job client for the given base URL.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(base_url)?,
        })
    }

    /// Get a reference to the underlying HTTP client.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Submit an automation job; the returned identifier keys the control
    /// and stream sockets.
    pub async fn submit_job(&self, request: &JobRequest) -> Result<JobCreated> {
        self.http.post("/job", Some(request)).await
    }

    /// Fetch job metadata (format, extension, artifact availability).
    pub async fn job_info(&self, job_id: &str) -> Result<JobInfo> {
        self.http.get(&format!("/job/{job_id}/info")).await
    }

    /// Fetch the result artifact for a finished job.
    pub async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>> {
        self.http.get_bytes(&format!("/download/{job_id}")).await
    }

    /// Create a streaming session for a job.
    pub async fn create_stream_session(&self, job_id: &str) -> Result<StreamSession> {
        self.http
            .post(&format!("/streaming/create/{job_id}"), None::<()>)
            .await
    }

    /// Get streaming availability for a job.
    pub async fn stream_session_info(&self, job_id: &str) -> Result<StreamSession> {
        self.http.get(&format!("/streaming/{job_id}")).await
    }

    /// Tear down a job's streaming session.
    pub async fn delete_stream_session(&self, job_id: &str) -> Result<()> {
        self.http.delete(&format!("/streaming/{job_id}")).await
    }
}

fn format_patterns() -> &'static [(OutputFormat, Vec<Regex>)] {
    static PATTERNS: OnceLock<Vec<(OutputFormat, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect::<Vec<_>>()
        };
        vec![
            (
                OutputFormat::Pdf,
                compile(&[r"\bpdf\b", r"pdf format", r"save.*pdf", r"as pdf", r"to pdf"]),
            ),
            (
                OutputFormat::Csv,
                compile(&[r"\bcsv\b", r"csv format", r"save.*csv", r"as csv", r"to csv"]),
            ),
            (
                OutputFormat::Json,
                compile(&[
                    r"\bjson\b",
                    r"json format",
                    r"save.*json",
                    r"as json",
                    r"to json",
                ]),
            ),
            (
                OutputFormat::Html,
                compile(&[
                    r"\bhtml\b",
                    r"html format",
                    r"save.*html",
                    r"as html",
                    r"to html",
                ]),
            ),
            (
                OutputFormat::Md,
                compile(&[
                    r"\bmarkdown\b",
                    r"md format",
                    r"save.*markdown",
                    r"as markdown",
                    r"to md",
                ]),
            ),
            (
                OutputFormat::Txt,
                compile(&[
                    r"\btext\b",
                    r"txt format",
                    r"save.*text",
                    r"as text",
                    r"to txt",
                    r"plain text",
                ]),
            ),
        ]
    })
}

/// Detect an output format mentioned in a task prompt. A format named in
/// the prompt overrides whatever the caller selected elsewhere.
pub fn detect_format(prompt: &str) -> Option<OutputFormat> {
    let prompt = prompt.to_lowercase();
    for (format, patterns) in format_patterns() {
        if patterns.iter().any(|p| p.is_match(&prompt)) {
            return Some(*format);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_named_in_prompts() {
        assert_eq!(
            detect_format("save the pricing page to PDF format"),
            Some(OutputFormat::Pdf)
        );
        assert_eq!(
            detect_format("export results as CSV"),
            Some(OutputFormat::Csv)
        );
        assert_eq!(
            detect_format("save top stories as JSON"),
            Some(OutputFormat::Json)
        );
        assert_eq!(
            detect_format("save the 5 job postings in txt format"),
            Some(OutputFormat::Txt)
        );
    }

    #[test]
    fn prompt_without_a_format_detects_nothing() {
        assert_eq!(detect_format("go to the jobs page and read it"), None);
    }

    #[test]
    fn earlier_formats_win_when_several_match() {
        // Mirrors the dashboard's pattern ordering: pdf beats txt.
        assert_eq!(
            detect_format("save as plain text or pdf"),
            Some(OutputFormat::Pdf)
        );
    }
}
