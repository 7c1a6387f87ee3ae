//! HTTP scrape of the metrics exporter.

use hostlink_core::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Maximum accepted exposition body. Exporters typically return 50-200 KiB.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Prometheus-format exporter.
///
/// Keep-alives are disabled so every scrape's failure accounting maps to
/// one connection attempt.
pub struct ExporterClient {
    http: reqwest::Client,
}

impl ExporterClient {
    pub fn new(version: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(0)
            .user_agent(format!("hostlink-agent/{version}"))
            .build()
            .map_err(|e| Error::Scrape(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Fetch the exposition body, enforcing the status and size limits.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "Executing exporter request");

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Scrape(format!("failed to fetch metrics: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Scrape(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Scrape(format!("failed to read metrics body: {e}")))?
        {
            if body.len() + chunk.len() > MAX_BODY_BYTES {
                return Err(Error::Scrape(format!(
                    "response body exceeds {} bytes",
                    MAX_BODY_BYTES
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), "Received exporter response");

        String::from_utf8(body).map_err(|e| Error::Scrape(format!("response is not UTF-8: {e}")))
    }
}
