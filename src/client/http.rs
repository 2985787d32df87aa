//! HTTP client for the response router
//!
//! POSTs `{role, prompt}` and expects `{response}` back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::{ChatRequest, ChatService, ServiceError};
use crate::keystore::KeyStore;

/// Cap on how much of an error body ends up in a message
const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct RouterRequest<'a> {
    role: &'a str,
    prompt: String,
}

#[derive(Deserialize)]
struct RouterResponse {
    response: Option<String>,
}

#[derive(Clone)]
pub struct HttpChatClient {
    http: Client,
    url: String,
    timeout: Duration,
    keys: Arc<dyn KeyStore>,
}

impl HttpChatClient {
    pub fn new(url: &str, timeout: Duration, keys: Arc<dyn KeyStore>) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            url: url.to_string(),
            timeout,
            keys,
        }
    }

    fn map_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else if e.is_connect() {
            ServiceError::Connection(e.to_string())
        } else {
            ServiceError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl ChatService for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let body = RouterRequest {
            role: request.instruction(),
            prompt: request.prompt_text(),
        };
        debug!(url = %self.url, prompt_len = body.prompt.len(), "Sending completion request");

        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(key) = self.keys.load() {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            error!(status = %status, "Response router error");
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(ServiceError::Status { status: status.as_u16(), body });
        }

        parse_router_response(&text)
    }
}

fn parse_router_response(text: &str) -> Result<String, ServiceError> {
    let parsed: RouterResponse =
        serde_json::from_str(text).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    match parsed.response {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(ServiceError::Malformed("missing `response` field".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::StaticKeyStore;

    #[test]
    fn test_parse_router_response() {
        assert_eq!(
            parse_router_response(r#"{"response": "<h2>Groups</h2>"}"#).unwrap(),
            "<h2>Groups</h2>"
        );
        assert!(matches!(
            parse_router_response(r#"{"response": ""}"#),
            Err(ServiceError::Malformed(_))
        ));
        assert!(matches!(
            parse_router_response(r#"{"other": 1}"#),
            Err(ServiceError::Malformed(_))
        ));
        assert!(matches!(
            parse_router_response("<html>"),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_router_is_connection_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = HttpChatClient::new(
            "http://127.0.0.1:9/response_router",
            Duration::from_secs(2),
            Arc::new(StaticKeyStore::default()),
        );
        let err = client
            .complete(&ChatRequest::single("sys", "hi"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
