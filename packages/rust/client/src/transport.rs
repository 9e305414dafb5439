//! Client transports: how the controller and the importer reach a server.

use async_trait::async_trait;
use prospector_core::{FrameDecoder, StreamEvent};
use prospector_registry::Resolution;
use prospector_shared::{Cnpj, FilterSet, ProspectorError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// User-Agent string for client requests.
const USER_AGENT: &str = concat!("Prospector/", env!("CARGO_PKG_VERSION"));

/// Opens a discovery run and delivers its events in order.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    /// Start a run and call `on_event` for every event as it arrives.
    ///
    /// Returns once the stream ends. A stream that ends cleanly but without
    /// a terminal event is still `Ok`; the caller decides what that means.
    async fn run(
        &self,
        filters: &FilterSet,
        on_event: &(dyn Fn(StreamEvent) + Send + Sync),
    ) -> Result<()>;
}

/// Single-identifier lookups.
#[async_trait]
pub trait LookupTransport: Send + Sync {
    /// `Ok(None)` when neither registry provider knows the identifier.
    async fn lookup(&self, cnpj: &Cnpj) -> Result<Option<Resolution>>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Transport over a Prospector server's HTTP API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct DiscoverBody<'a> {
    #[serde(flatten)]
    filters: &'a FilterSet,
    stream: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProspectorError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Turn an error response into a `ProspectorError`, keeping the server's
    /// message when there is one.
    async fn error_from(response: reqwest::Response) -> ProspectorError {
        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        if status == StatusCode::BAD_REQUEST {
            ProspectorError::validation(message)
        } else {
            ProspectorError::Transport(message)
        }
    }
}

#[async_trait]
impl DiscoveryTransport for HttpTransport {
    #[instrument(skip_all, fields(segment = %filters.segment, region = %filters.region))]
    async fn run(
        &self,
        filters: &FilterSet,
        on_event: &(dyn Fn(StreamEvent) + Send + Sync),
    ) -> Result<()> {
        let url = format!("{}/api/v1/discover", self.base_url);
        let mut response = self
            .client
            .post(&url)
            .json(&DiscoverBody {
                filters,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mut decoder = FrameDecoder::new();
        let mut frames = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProspectorError::Transport(format!("stream interrupted: {e}")))?
        {
            for event in decoder.push(&chunk)? {
                frames += 1;
                on_event(event);
            }
        }
        if let Some(event) = decoder.finish()? {
            frames += 1;
            on_event(event);
        }

        debug!(frames, "stream closed");
        Ok(())
    }
}

#[async_trait]
impl LookupTransport for HttpTransport {
    async fn lookup(&self, cnpj: &Cnpj) -> Result<Option<Resolution>> {
        let url = format!("{}/api/v1/lookup/{}", self.base_url, cnpj.as_str());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| ProspectorError::parse(format!("lookup response: {e}"))),
            _ => Err(Self::error_from(response).await),
        }
    }
}
