//! HTTP microservice transport.
//!
//! Each platform runs behind a small HTTP service with a fixed contract,
//! regardless of provider:
//!
//! - `POST /initialize` (provider-specific payload) → `{session_id}`
//! - `GET /tools/{session_id}` → `{tools: [{name, description}]}`
//! - `POST /tool/{session_id}/{tool_name}` → `{success, content|error}`
//! - `DELETE /session/{session_id}`

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use adlink_models::{Platform, PlatformCredentials};

use crate::error::{ConnectError, Result};
use crate::transport::ToolDescriptor;

const CALL_TIMEOUT: Duration = Duration::from_secs(60);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// One open session against a platform's HTTP microservice.
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    platform: Platform,
    server: String,
    base_url: String,
    session_id: String,
    http: Client,
}

impl HttpSessionClient {
    /// Open a session by posting the platform's initialize payload.
    pub async fn initialize(
        http: Client,
        platform: Platform,
        base_url: &str,
        credentials: &PlatformCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let payload = initialize_payload(credentials)?;

        let response = http
            .post(format!("{base_url}/initialize"))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = truncated_body(response).await;
            return Err(ConnectError::Transport(format!(
                "{platform} initialize returned HTTP {status}: {body}"
            )));
        }

        let init: InitializeResponse = response.json().await?;
        Ok(Self {
            platform,
            server: format!("{}_http", platform.as_str()),
            base_url,
            session_id: init.session_id,
            http,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Transport/server identifier carried into validation results.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let response = self
            .http
            .get(format!("{}/tools/{}", self.base_url, self.session_id))
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = truncated_body(response).await;
            return Err(ConnectError::Transport(format!(
                "{} list tools returned HTTP {status}: {body}",
                self.platform
            )));
        }

        let listing: ListToolsResponse = response.json().await?;
        Ok(listing.tools)
    }

    /// Call a tool; an upstream `{success: false, error}` becomes
    /// `ConnectError::Tool`.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!(
                "{}/tool/{}/{}",
                self.base_url, self.session_id, tool_name
            ))
            .timeout(CALL_TIMEOUT)
            .json(&serde_json::json!({
                "tool_name": tool_name,
                "arguments": arguments,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = truncated_body(response).await;
            return Err(ConnectError::Transport(format!(
                "Tool call {tool_name} returned HTTP {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ConnectError::Tool(error.to_string()));
        }

        Ok(body.get("content").cloned().unwrap_or(body))
    }

    /// Release the server-side session. Errors are reported, not raised;
    /// cleanup runs on every exit path.
    pub async fn close(&self) {
        let result = self
            .http
            .delete(format!("{}/session/{}", self.base_url, self.session_id))
            .timeout(CLOSE_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(platform = %self.platform, error = %e, "Failed to close HTTP session");
        }
    }
}

/// Provider-specific initialize payload field mapping.
fn initialize_payload(credentials: &PlatformCredentials) -> Result<Value> {
    let payload = match credentials {
        PlatformCredentials::GoogleAnalytics {
            refresh_token,
            property_id,
            client_id,
            client_secret,
            ..
        } => serde_json::json!({
            "refresh_token": refresh_token,
            "property_id": property_id,
            "client_id": client_id,
            "client_secret": client_secret,
        }),
        PlatformCredentials::GoogleAds {
            refresh_token,
            customer_id,
            developer_token,
            client_id,
            client_secret,
            ..
        } => serde_json::json!({
            "refresh_token": refresh_token,
            "customer_id": customer_id,
            "developer_token": developer_token,
            "client_id": client_id,
            "client_secret": client_secret,
        }),
        PlatformCredentials::FacebookAds {
            access_token,
            account_id,
        } => serde_json::json!({
            "access_token": access_token,
            "account_id": account_id,
        }),
    };
    Ok(payload)
}

async fn truncated_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        format!("{}... [truncated]", &body[..MAX_ERROR_BODY])
    } else {
        body
    }
}
