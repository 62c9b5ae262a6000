use crate::sync::errors::HandshakeError;
use crate::sync::subscription::HUB_SPEC;
use serde_json::Value;

/// Result of a successful negotiation handshake: everything the
/// streaming connect needs.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub token: String,
    pub cookie: String,
}

/// Performs the HTTP handshake that precedes the streaming connection.
pub struct Negotiator {
    base_url: String,
    testing: bool,
    client: reqwest::Client,
}

impl Negotiator {
    pub fn new(base_url: impl Into<String>, testing: bool) -> Self {
        Self {
            base_url: base_url.into(),
            testing,
            client: reqwest::Client::new(),
        }
    }

    /// One GET to the negotiation endpoint. Returns the connection token
    /// from the JSON body and the session cookie from the response
    /// headers.
    pub async fn negotiate(&self) -> Result<NegotiatedSession, HandshakeError> {
        // Canned session so the rest of the pipeline can be exercised
        // without touching the network.
        if self.testing {
            return Ok(NegotiatedSession {
                token: "test-token".to_string(),
                cookie: String::new(),
            });
        }

        let url = format!("{}/negotiate", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("connectionData", HUB_SPEC), ("clientProtocol", "1.5")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::Status(status.as_u16()));
        }

        // HeaderMap lookups are case-insensitive, so this covers both the
        // canonical and lowercase Set-Cookie spellings.
        let cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body: Value = serde_json::from_slice(&response.bytes().await?)?;
        let token = body
            .get("ConnectionToken")
            .and_then(Value::as_str)
            .ok_or(HandshakeError::MissingToken)?
            .to_string();

        Ok(NegotiatedSession { token, cookie })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn testing_mode_returns_a_canned_session_without_network() {
        // An unroutable base URL proves no request is attempted.
        let negotiator = Negotiator::new("http://127.0.0.1:1", true);

        let session = negotiator.negotiate().await.unwrap();
        assert_eq!(session.token, "test-token");
        assert!(session.cookie.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_handshake_error() {
        let negotiator = Negotiator::new("http://127.0.0.1:1", false);

        match negotiator.negotiate().await {
            Err(HandshakeError::Http(_)) => {}
            other => panic!("expected HandshakeError::Http, got {:?}", other),
        }
    }
}
