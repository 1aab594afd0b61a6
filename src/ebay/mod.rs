pub mod auth;
pub mod browse;
pub mod config;
pub mod finding;

pub use auth::{AppTokenProvider, TokenCache};
pub use browse::BrowseClient;
pub use config::{EbayConfig, SearchApi};
pub use finding::FindingClient;

use crate::market::{MarketError, MarketSearch};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

const ERROR_BODY_LIMIT: usize = 300;

/// Build the configured search backend. Both share one HTTP client; the
/// Browse backend also owns the app-token cache.
pub fn market_from_config(http: Client, config: EbayConfig) -> Arc<dyn MarketSearch> {
    let config = Arc::new(config);
    match config.search_api {
        SearchApi::Browse => {
            let auth = AppTokenProvider::new(http.clone(), config.clone(), TokenCache::default());
            Arc::new(BrowseClient::new(http, config, auth))
        }
        SearchApi::Finding => Arc::new(FindingClient::new(http, config)),
    }
}

/// Transport failures, timeouts included, mean the source is unavailable.
/// The URL is stripped because Finding requests carry the app id.
pub(crate) fn map_send_error(err: reqwest::Error) -> MarketError {
    let kind = if err.is_timeout() { "timeout" } else { "request" };
    MarketError::SourceUnavailable(format!("{kind}: {}", err.without_url()))
}

pub(crate) async fn read_error_body(response: reqwest::Response) -> String {
    let raw = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&raw)
        .ok()
        .and_then(|body| {
            body.pointer("/errors/0/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(raw);
    message.chars().take(ERROR_BODY_LIMIT).collect()
}
