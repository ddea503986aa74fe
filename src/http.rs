//! HTTP client plumbing for the BrowserPilot API.

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::{PilotError, Result};

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const RETRY_BACKOFFS_MS: [u64; 3] = [200, 400, 800];

/// HTTP client for the job-management surface.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a client for the given base URL (defaults to
    /// `http://localhost:8000`).
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a request to the API, retrying 5xx responses on a bounded
    /// backoff ladder.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<impl Serialize>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("X-SDK-Version", SDK_VERSION);

            if let Some(ref b) = body {
                request = request.json(b);
            }

            let response = request.send().await?;
            let status = response.status();

            // Retry on 5xx errors until the backoff ladder is spent
            if status.is_server_error() && attempt < RETRY_BACKOFFS_MS.len() {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFFS_MS[attempt])).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                return Err(error_from_response(status, response).await);
            }

            return Ok(response.json::<T>().await?);
        }
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<T>(Method::GET, path, None::<()>).await
    }

    /// Make a POST request.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<impl Serialize>,
    ) -> Result<T> {
        self.request(Method::POST, path, body).await
    }

    /// Make a DELETE request, ignoring the response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .delete(&url)
            .header("X-SDK-Version", SDK_VERSION)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }
        Ok(())
    }

    /// Fetch a raw artifact (e.g. a job's result file).
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("X-SDK-Version", SDK_VERSION)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn error_from_response(status: StatusCode, response: reqwest::Response) -> PilotError {
    let message = response.text().await.unwrap_or_default();
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        message
    };
    PilotError::api(message, status.as_u16())
}
