//! Client for the telemetry backend's HTTP API.
//!
//! Two endpoints are used:
//!
//! - `GET /api/data/latest`: the newest reading, or `null` when there is none
//! - `GET /api/devices`: the device list used to seed the roster
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sensorwatch::ApiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::builder()
//!         .endpoint("http://127.0.0.1:5000")
//!         .timeout(Duration::from_secs(5))
//!         .build()?;
//!
//!     for device in client.devices().await? {
//!         println!("{} ({})", device.name, device.id);
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use super::payload::{DeviceRecord, ReadingPayload};
use super::LatestReading;
use crate::error::SourceError;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the poll and bootstrap endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: String,
    description: String,
}

impl ApiClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the newest reading. `Ok(None)` when the backend has none.
    pub async fn latest(&self) -> Result<Option<ReadingPayload>, SourceError> {
        self.get_json(&self.url("/api/data/latest")).await
    }

    /// Fetch the device list.
    pub async fn devices(&self) -> Result<Vec<DeviceRecord>, SourceError> {
        self.get_json(&self.url("/api/devices")).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.client.get(url).send().await?;
        let response = check_status(response)?;
        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }
}

fn check_status(response: Response) -> Result<Response, SourceError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(SourceError::Http(format!(
            "API returned status {}",
            response.status()
        )))
    }
}

#[async_trait]
impl LatestReading for ApiClient {
    async fn fetch_latest(&self) -> Result<Option<ReadingPayload>, SourceError> {
        self.latest().await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Builder for ApiClient.
#[derive(Debug, Default)]
pub struct ApiClientBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
}

impl ApiClientBuilder {
    /// Set the API base URL (e.g., "http://localhost:5000").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ApiClient, SourceError> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(ApiClient {
            client,
            description: format!("http: {}", endpoint),
            endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = ApiClient::builder().build().unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:5000");
        assert_eq!(client.description(), "http: http://127.0.0.1:5000");
    }

    #[test]
    fn test_builder_custom() {
        let client = ApiClient::builder()
            .endpoint("http://sensors.local:8080/")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(client.endpoint(), "http://sensors.local:8080");
        assert_eq!(client.url("/api/devices"), "http://sensors.local:8080/api/devices");
    }

    #[tokio::test]
    #[ignore = "needs a closed local port"]
    async fn test_unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let client = ApiClient::builder()
            .endpoint("http://127.0.0.1:9")
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let err = client.latest().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Connection(_) | SourceError::Timeout | SourceError::Http(_)
        ));
    }
}
