use crate::ebay::config::EbayConfig;
use crate::http::MARKET_TIMEOUT;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, header};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const APP_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
    #[error("oauth rejected with HTTP {0}")]
    Rejected(u16),
    #[error("oauth response invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Application token shared by every search made through one client.
/// Filled on first use and kept for the life of the process; two requests
/// racing on an empty cache both exchange and the last write wins.
#[derive(Clone, Default)]
pub struct TokenCache {
    slot: Arc<RwLock<Option<String>>>,
}

impl TokenCache {
    pub async fn get(&self) -> Option<String> {
        self.slot.read().await.clone()
    }

    pub async fn store(&self, token: String) {
        *self.slot.write().await = Some(token);
    }
}

#[derive(Clone)]
pub struct AppTokenProvider {
    http: Client,
    config: Arc<EbayConfig>,
    cache: TokenCache,
}

impl AppTokenProvider {
    pub fn new(http: Client, config: Arc<EbayConfig>, cache: TokenCache) -> Self {
        Self {
            http,
            config,
            cache,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.app_token.is_some() || self.config.client_credentials().is_some()
    }

    /// A pre-issued token short-circuits the client-credentials exchange.
    pub async fn access_token(&self) -> Result<String, EbayAuthError> {
        if let Some(token) = &self.config.app_token {
            return Ok(token.clone());
        }
        if let Some(token) = self.cache.get().await {
            return Ok(token);
        }
        let (app_id, cert_id) = self
            .config
            .client_credentials()
            .ok_or(EbayAuthError::MissingCredentials)?;
        let token = self.exchange(app_id, cert_id).await?;
        self.cache.store(token.clone()).await;
        debug!(target = "appraisal.ebay", "app_token_cached");
        Ok(token)
    }

    async fn exchange(&self, app_id: &str, cert_id: &str) -> Result<String, EbayAuthError> {
        let params = [("grant_type", "client_credentials"), ("scope", APP_SCOPE)];
        let response = self
            .http
            .post(self.config.oauth_token_url())
            .timeout(MARKET_TIMEOUT)
            .header(header::AUTHORIZATION, basic_auth_header(app_id, cert_id))
            .form(&params)
            .send()
            .await
            .map_err(|err| EbayAuthError::Request(err.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(EbayAuthError::Rejected(response.status().as_u16()));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| EbayAuthError::InvalidResponse(err.to_string()))?;
        Ok(payload.access_token)
    }
}

fn basic_auth_header(app_id: &str, cert_id: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{app_id}:{cert_id}")))
}
