use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ServiceError;

/// Turns a command into reply text.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, command: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    user_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    response: Option<String>,
    error: Option<String>,
}

/// Longest slice of an error body kept in a `ServiceError::Status`
const ERROR_BODY_LIMIT: usize = 200;

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// HTTP client for the agent service.
pub struct AgentClient {
    client: reqwest::Client,
    url: String,
}

impl AgentClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Processor for AgentClient {
    async fn process(&self, command: &str) -> Result<String, ServiceError> {
        debug!("Sending to agent API {}: {:?}", self.url, command);

        let response = self
            .client
            .post(&self.url)
            .json(&AgentRequest {
                user_message: command,
            })
            .send()
            .await?;

        let status = response.status();
        debug!("Agent API response status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status,
                body: truncate(body.trim(), ERROR_BODY_LIMIT),
            });
        }

        let body = response.text().await?;
        let parsed: AgentResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Malformed(e.to_string()))?;

        // A blank reply counts as no reply
        match parsed {
            AgentResponse {
                response: Some(reply),
                ..
            } if !reply.trim().is_empty() => {
                debug!("Agent responded: {:?}", truncate(&reply, 100));
                Ok(reply)
            }
            AgentResponse {
                error: Some(error), ..
            } if !error.trim().is_empty() => Err(ServiceError::Reported(error)),
            _ => Err(ServiceError::Reported(
                "no response from agent".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/agent", addr)
    }

    fn client(url: &str) -> AgentClient {
        AgentClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_reply_is_returned() {
        let url = serve(Router::new().route(
            "/api/agent",
            post(|Json(body): Json<Value>| async move {
                let msg = body["userMessage"].as_str().unwrap_or_default().to_string();
                Json(json!({ "response": format!("echo: {msg}") }))
            }),
        ))
        .await;

        let reply = client(&url).process("ping").await.unwrap();
        assert_eq!(reply, "echo: ping");
    }

    #[tokio::test]
    async fn test_server_error_is_status() {
        let url = serve(Router::new().route(
            "/api/agent",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "kaboom") }),
        ))
        .await;

        let err = client(&url).process("ping").await.unwrap_err();
        match err {
            ServiceError::Status { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "kaboom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_field_is_reported() {
        let url = serve(Router::new().route(
            "/api/agent",
            post(|| async { Json(json!({ "error": "wallet locked" })) }),
        ))
        .await;

        let err = client(&url).process("pay").await.unwrap_err();
        assert!(matches!(err, ServiceError::Reported(ref e) if e == "wallet locked"));
    }

    #[tokio::test]
    async fn test_non_json_is_malformed() {
        let url = serve(Router::new().route("/api/agent", post(|| async { "<html>" })))
            .await;

        let err = client(&url).process("ping").await.unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_empty_object_is_reported() {
        let url = serve(Router::new().route("/api/agent", post(|| async { Json(json!({})) })))
            .await;

        let err = client(&url).process("ping").await.unwrap_err();
        assert!(matches!(err, ServiceError::Reported(_)));
    }

    #[tokio::test]
    async fn test_blank_response_is_reported() {
        let url = serve(Router::new().route(
            "/api/agent",
            post(|| async { Json(json!({ "response": "  " })) }),
        ))
        .await;

        let err = client(&url).process("ping").await.unwrap_err();
        assert!(matches!(err, ServiceError::Reported(ref e) if e == "no response from agent"));
    }

    #[tokio::test]
    async fn test_blank_response_falls_back_to_error_field() {
        let url = serve(Router::new().route(
            "/api/agent",
            post(|| async { Json(json!({ "response": "", "error": "quota exceeded" })) }),
        ))
        .await;

        let err = client(&url).process("ping").await.unwrap_err();
        assert!(matches!(err, ServiceError::Reported(ref e) if e == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport() {
        // Bind and drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}/api/agent"))
            .process("ping")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
