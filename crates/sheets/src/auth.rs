use async_trait::async_trait;
use jwt_simple::algorithms::{RS256KeyPair, RSAKeyPairLike};
use jwt_simple::claims::Claims;
use jwt_simple::prelude::Duration as ClaimsDuration;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::SheetsError;

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_MINS: u64 = 60;

/// Short-lived OAuth bearer token.
#[derive(Clone, Debug)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn bearer(&self) -> &str {
        self.0.expose_secret()
    }
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, http: &Client) -> Result<AccessToken, SheetsError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ScopeClaims {
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Google service-account JWT bearer flow. A fresh token is requested for
/// every call; nothing is cached between saves.
pub struct ServiceAccountTokenSource {
    client_email: String,
    key_pair: RS256KeyPair,
    token_url: String,
}

impl ServiceAccountTokenSource {
    pub fn new(
        client_email: impl Into<String>,
        private_key_pem: &SecretString,
        token_url: impl Into<String>,
    ) -> Result<Self, SheetsError> {
        let key_pair = RS256KeyPair::from_pem(private_key_pem.expose_secret())
            .map_err(|error| SheetsError::InvalidKey(error.to_string()))?;

        Ok(Self { client_email: client_email.into(), key_pair, token_url: token_url.into() })
    }

    pub(crate) fn assertion(&self) -> Result<String, SheetsError> {
        let claims = Claims::with_custom_claims(
            ScopeClaims { scope: SPREADSHEETS_SCOPE.to_owned() },
            ClaimsDuration::from_mins(ASSERTION_LIFETIME_MINS),
        )
        .with_issuer(&self.client_email)
        .with_audience(&self.token_url);

        self.key_pair.sign(claims).map_err(|error| SheetsError::Assertion(error.to_string()))
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self, http: &Client) -> Result<AccessToken, SheetsError> {
        let assertion = self.assertion()?;
        let response = http
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = crate::client::ensure_success(response).await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| SheetsError::Decode(format!("token response: {error}")))?;
        if token.access_token.trim().is_empty() {
            return Err(SheetsError::Decode(
                "token response carried an empty access_token".to_owned(),
            ));
        }

        Ok(AccessToken::new(token.access_token))
    }
}

/// Fixed token, for deployments that mint tokens out of band and for tests.
pub struct StaticTokenSource(pub AccessToken);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self, _http: &Client) -> Result<AccessToken, SheetsError> {
        Ok(self.0.clone())
    }
}
