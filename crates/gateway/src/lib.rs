//! HTTP messaging gateway transport.
//!
//! Talks to a gateway service that owns the actual messaging-network session:
//!
//! - `POST /session/connect` opens the session or hands back a pairing code
//! - `GET  /session/status` reports whether the session is usable
//! - `GET  /contacts/{id}/exists` resolves a recipient to a network address
//! - `POST /messages` delivers a text message

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};

use relay_common::config::AppConfig;
use relay_common::error::AppError;
use relay_engine::transport::{ConnectionState, Transport, TransportError};

/// [`Transport`] backed by the messaging gateway's HTTP API.
pub struct GatewayTransport {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl GatewayTransport {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid gateway URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "gateway URL {} cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            &config.gateway_url,
            config.gateway_token.clone(),
            Duration::from_millis(config.gateway_timeout_ms),
        )
    }

    /// Base URL extended with `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    state: String,
    #[serde(default)]
    pairing_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
}

/// Map a connect response body to a connection state.
fn connection_state(body: ConnectResponse) -> Result<ConnectionState, TransportError> {
    match body.state.as_str() {
        "connected" => Ok(ConnectionState::Connected),
        "pairing" => body
            .pairing_code
            .filter(|code| !code.is_empty())
            .map(|code| ConnectionState::AwaitingPairing { code })
            .ok_or_else(|| TransportError::Connect("pairing requested without a code".to_string())),
        other => Err(TransportError::Connect(format!(
            "unexpected session state {:?}",
            other
        ))),
    }
}

/// Map an existence response to the address to send to. Without an explicit
/// address the identifier itself is used.
fn resolved_address(identifier: &str, body: ExistsResponse) -> Option<String> {
    if !body.exists {
        return None;
    }
    Some(
        body.address
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| identifier.to_string()),
    )
}

/// Turn a non-2xx response into an error message carrying status and body.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        format!("gateway returned {}", status)
    } else {
        format!("gateway returned {}: {}", status, body)
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&self) -> Result<ConnectionState, TransportError> {
        let response = self
            .authorize(self.client.post(self.endpoint(&["session", "connect"])))
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Connect(error_message(response).await));
        }

        let body: ConnectResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        connection_state(body)
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        let response = self
            .authorize(self.client.get(self.endpoint(&["session", "status"])))
            .send()
            .await
            .map_err(|e| TransportError::Query(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Query(error_message(response).await));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Query(e.to_string()))?;
        Ok(body.connected)
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<String>, TransportError> {
        let response = self
            .authorize(
                self.client
                    .get(self.endpoint(&["contacts", identifier, "exists"])),
            )
            .send()
            .await
            .map_err(|e| TransportError::Query(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Query(error_message(response).await));
        }

        let body: ExistsResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Query(e.to_string()))?;
        Ok(resolved_address(identifier, body))
    }

    async fn send(&self, address: &str, text: &str) -> Result<(), TransportError> {
        let response = self
            .authorize(self.client.post(self.endpoint(&["messages"])))
            .json(&SendRequest { to: address, text })
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            tracing::debug!(address, error = %message, "Gateway rejected message");
            return Err(TransportError::Send(message));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gateway"
    }
}
