//! Credential providers for the spreadsheet API.
//!
//! The remote client asks a [`CredentialProvider`] for a bearer token before
//! every call. Providers refresh tokens on their own before they expire, so
//! callers never see an expired token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

/// OAuth scope for reading and writing spreadsheets.
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh this long before the token actually expires.
const REFRESH_SKEW_SECS: i64 = 60;
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Credential failures. Never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("failed to load credentials: {0}")]
    Credentials(String),

    #[error("failed to sign token request: {0}")]
    Signing(String),

    #[error("token request failed: {0}")]
    Exchange(String),

    #[error("token endpoint refused the grant: {0}")]
    Refused(String),
}

/// A bearer token and, if known, when it stops working.
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// A token that never expires as far as the engine knows.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// True if the token expires within `window` from now.
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + window >= expires_at)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies bearer tokens for the remote store.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<AccessToken, AuthError>;
}

/// A fixed token, e.g. one minted by `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: AccessToken,
}

impl StaticToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(value),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

/// The fields of a service-account JSON key the token grant needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::Credentials(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Credentials(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// OAuth 2.0 JWT-bearer grant for a service account.
///
/// Caches the access token and fetches a new one once the cached token is
/// within a minute of expiry. Concurrent callers wait on the same refresh.
pub struct ServiceAccount {
    key: ServiceAccountKey,
    scopes: Vec<String>,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl ServiceAccount {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            scopes: vec![SPREADSHEETS_SCOPE.to_string()],
            http,
            cached: Mutex::new(None),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Build and sign the JWT assertion sent to the token endpoint.
    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let assertion = self.sign_assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Refused(format!("{status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;
        Ok(AccessToken::expiring_at(
            token.access_token,
            now + Duration::seconds(token.expires_in),
        ))
    }
}

#[async_trait]
impl CredentialProvider for ServiceAccount {
    async fn token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(Duration::seconds(REFRESH_SKEW_SECS)) {
                return Ok(token.clone());
            }
        }

        tracing::debug!(account = %self.key.client_email, "Refreshing access token");
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("key", &self.key)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_JSON: &str = r#"{
        "type": "service_account",
        "client_email": "bot@project.iam.gserviceaccount.com",
        "private_key": "not a pem",
        "project_id": "project"
    }"#;

    #[tokio::test]
    async fn static_token() {
        let provider = StaticToken::new("abc");
        let token = provider.token().await.unwrap();
        assert_eq!(token.value, "abc");
        assert!(!token.expires_within(Duration::days(365)));
    }

    #[test]
    fn token_expiry_window() {
        let token = AccessToken::expiring_at("t", Utc::now() + Duration::seconds(30));
        assert!(token.expires_within(Duration::seconds(60)));
        assert!(!token.expires_within(Duration::seconds(5)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let token = AccessToken::new("secret-value");
        assert!(!format!("{token:?}").contains("secret-value"));

        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();
        assert!(!format!("{key:?}").contains("not a pem"));
    }

    #[test]
    fn key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();
        assert_eq!(key.client_email, "bot@project.iam.gserviceaccount.com");
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn malformed_key_file() {
        let result = ServiceAccountKey::from_json("{}");
        assert!(matches!(result, Err(AuthError::Credentials(_))));

        let result = ServiceAccountKey::from_file("/nonexistent/key.json");
        assert!(matches!(result, Err(AuthError::Credentials(_))));
    }

    #[tokio::test]
    async fn invalid_private_key_fails_before_any_request() {
        let key = ServiceAccountKey::from_json(KEY_JSON).unwrap();
        let account = ServiceAccount::new(key, reqwest::Client::new());

        let result = account.token().await;
        assert!(matches!(result, Err(AuthError::Signing(_))));
    }
}
