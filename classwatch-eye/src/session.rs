//! Session API client: check and toggle a class's monitoring session

use classwatch_core::config::join_url;
use classwatch_core::{ApiConfig, Error, Result, TokenStore};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const ACTIVE_MESSAGE: &str = "Session is already active.";

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// What the Session API reported for a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub message: String,
    pub session_id: Option<String>,
    /// `None` when the message does not say either way
    pub active: Option<bool>,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(false)
    }
}

/// Client for `/session/create/{class_id}`
#[derive(Clone)]
pub struct SessionClient {
    client: Client,
    base_url: String,
    tokens: TokenStore,
}

impl SessionClient {
    pub fn new(api: &ApiConfig, tokens: TokenStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(api.request_timeout())
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            tokens,
        })
    }

    fn endpoint(&self, class_id: &str) -> String {
        join_url(&self.base_url, &format!("session/create/{}", class_id))
    }

    /// `GET`: is a session running for this class?
    pub async fn status(&self, class_id: &str) -> Result<SessionStatus> {
        let body = self.call(Method::GET, class_id, "Error checking session status").await?;
        let message = body.message.unwrap_or_default();
        let active = message == ACTIVE_MESSAGE;
        debug!("Session status for class {}: {}", class_id, message);

        Ok(SessionStatus {
            session_id: body.session_id.and_then(id_string),
            active: Some(active),
            message,
        })
    }

    /// `POST`: start a session if none is running, otherwise end it
    pub async fn toggle(&self, class_id: &str) -> Result<SessionStatus> {
        let body = self.call(Method::POST, class_id, "Failed to manage session").await?;
        let message = body.message.unwrap_or_default();

        let active = if message.contains("deactivated") {
            Some(false)
        } else if message.contains("created successfully") {
            Some(true)
        } else {
            None
        };
        info!("Session toggle for class {}: {}", class_id, message);

        Ok(SessionStatus {
            session_id: body.session_id.and_then(id_string),
            active,
            message,
        })
    }

    async fn call(&self, method: Method, class_id: &str, fallback: &str) -> Result<SessionBody> {
        let mut request = self.client.request(method.clone(), self.endpoint(class_id));
        if let Some(bearer) = self.tokens.bearer() {
            request = request.header(reqwest::header::AUTHORIZATION, bearer);
        }
        if method == Method::POST {
            request = request.json(&serde_json::json!({}));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(format!("{}: {}", fallback, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Request(format!("{}: {}", fallback, e)))?;
        let body: Option<SessionBody> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = body
                .and_then(|b| b.error)
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| fallback.to_string());
            return Err(Error::Request(message));
        }

        body.ok_or_else(|| Error::Deserialization(format!("{}: unreadable response", fallback)))
    }
}

fn id_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(Value::from(12)), Some("12".to_string()));
        assert_eq!(id_string(Value::from("abc")), Some("abc".to_string()));
        assert_eq!(id_string(Value::from("")), None);
        assert_eq!(id_string(Value::Null), None);
    }

    #[test]
    fn test_unknown_state_is_inactive() {
        let status = SessionStatus {
            message: "Something else".to_string(),
            session_id: None,
            active: None,
        };
        assert!(!status.is_active());
    }

    #[test]
    fn test_endpoint() {
        let client = SessionClient::new(&ApiConfig::default(), TokenStore::new()).unwrap();
        assert_eq!(client.endpoint("9"), "http://127.0.0.1:7000/session/create/9");
    }
}
