//! Credential verification against the foreign service's HTTP login
//! endpoint.

use async_trait::async_trait;
use jid::BareJid;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use xhaunt_xmpp::{AuthError, AuthVerifier};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    address: String,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// [`AuthVerifier`] that POSTs the credentials as JSON and reads a session
/// token back.
///
/// 2xx with `{"token": ..}` is a success, 401 and 403 are rejected
/// credentials, and every other outcome is a provider failure.
pub struct HttpAuthVerifier {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAuthVerifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("xhaunt/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthVerifier {
    #[instrument(skip(self, password), fields(endpoint = %self.endpoint))]
    async fn verify(
        &self,
        address: &BareJid,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let body = LoginRequest {
            address: address.to_string(),
            username,
            password,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Auth endpoint unreachable");
                AuthError::Provider(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(%status, "Credentials rejected");
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            warn!(%status, "Auth endpoint returned an error");
            return Err(AuthError::Provider(format!("unexpected status {status}")));
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Malformed auth response");
            AuthError::Provider(e.to_string())
        })?;

        debug!("Credentials accepted");
        Ok(login.token)
    }
}
