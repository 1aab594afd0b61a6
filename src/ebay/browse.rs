use crate::ebay::auth::{AppTokenProvider, EbayAuthError};
use crate::ebay::config::EbayConfig;
use crate::ebay::{map_send_error, read_error_body};
use crate::http::MARKET_TIMEOUT;
use crate::market::{
    ComparableSale, DEFAULT_CURRENCY, MarketError, MarketSearch, MarketSnapshot, UNKNOWN_CONDITION,
    positive_amount,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Browse caps a page at 50 summaries.
const MAX_PAGE: usize = 50;
const LISTING_FILTER: &str =
    "buyingOptions:{FIXED_PRICE|AUCTION},conditions:{USED|GOOD|VERY_GOOD|EXCELLENT}";

/// Browse API search with app-token auth.
#[derive(Clone)]
pub struct BrowseClient {
    http: Client,
    config: Arc<EbayConfig>,
    auth: AppTokenProvider,
}

impl BrowseClient {
    pub fn new(http: Client, config: Arc<EbayConfig>, auth: AppTokenProvider) -> Self {
        Self { http, config, auth }
    }
}

#[async_trait]
impl MarketSearch for BrowseClient {
    fn source_label(&self) -> &'static str {
        "eBay Completed Sales"
    }

    fn is_configured(&self) -> bool {
        self.auth.is_configured()
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        sold_only: bool,
    ) -> Result<MarketSnapshot, MarketError> {
        let token = self.auth.access_token().await.map_err(auth_error)?;
        if !sold_only {
            debug!(target = "appraisal.ebay", "browse_ignores_sold_only");
        }
        let page = limit.clamp(1, MAX_PAGE).to_string();
        let response = self
            .http
            .get(self.config.browse_search_url())
            .timeout(MARKET_TIMEOUT)
            .bearer_auth(token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
            .query(&[
                ("q", query),
                ("limit", page.as_str()),
                ("filter", LISTING_FILTER),
                ("sort", "endDate"),
            ])
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MarketError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(MarketError::Status {
                status: status.as_u16(),
                message: read_error_body(response).await,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| MarketError::Malformed(err.to_string()))?;
        parse_browse_response(query, &body, limit)
    }
}

fn auth_error(err: EbayAuthError) -> MarketError {
    match err {
        EbayAuthError::MissingCredentials => MarketError::NotConfigured,
        EbayAuthError::Request(message) => MarketError::SourceUnavailable(message),
        other => MarketError::Auth(other.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    price: Option<Amount>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    item_end_date: Option<String>,
    #[serde(default)]
    image: Option<Image>,
    #[serde(default)]
    item_web_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Amount {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    #[serde(default)]
    image_url: Option<String>,
}

/// Summaries that fail to deserialize or lack a positive price are dropped
/// one by one; only a body that is not an object fails the search.
pub fn parse_browse_response(
    query: &str,
    body: &Value,
    limit: usize,
) -> Result<MarketSnapshot, MarketError> {
    let object = body
        .as_object()
        .ok_or_else(|| MarketError::Malformed("search body is not an object".into()))?;
    let total_found = object.get("total").and_then(Value::as_u64).unwrap_or(0);
    let items = object
        .get("itemSummaries")
        .and_then(Value::as_array)
        .map(|summaries| summaries.iter().filter_map(comparable_from_summary).collect())
        .unwrap_or_default();
    Ok(MarketSnapshot::new(query, total_found, items, limit))
}

fn comparable_from_summary(raw: &Value) -> Option<ComparableSale> {
    let summary: ItemSummary = serde_json::from_value(raw.clone()).ok()?;
    let amount = summary.price.unwrap_or_default();
    let price = positive_amount(amount.value.as_ref())?;
    Some(ComparableSale {
        title: summary.title.unwrap_or_default(),
        price,
        currency: amount.currency.unwrap_or_else(|| DEFAULT_CURRENCY.into()),
        condition: summary
            .condition
            .unwrap_or_else(|| UNKNOWN_CONDITION.into()),
        sold_date: summary.item_end_date,
        image_url: summary.image.and_then(|image| image.image_url),
        item_url: summary.item_web_url.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::auth::TokenCache;
    use crate::http::build_client;
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode as FakeStatus, header::AUTHORIZATION},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process stand-in for the identity and Browse endpoints.
    #[derive(Clone, Default)]
    struct FakeEbay {
        token_requests: Arc<Mutex<Vec<(String, String)>>>,
        searches: Arc<Mutex<Vec<(HeaderMap, HashMap<String, String>)>>>,
    }

    async fn mint_token(
        State(fake): State<FakeEbay>,
        headers: HeaderMap,
        body: String,
    ) -> Json<Value> {
        let basic = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        fake.token_requests.lock().unwrap().push((basic, body));
        Json(json!({
            "access_token": "minted-app-token",
            "expires_in": 7200,
            "token_type": "Application Access Token"
        }))
    }

    async fn item_summaries(
        State(fake): State<FakeEbay>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let query = params.get("q").cloned().unwrap_or_default();
        fake.searches.lock().unwrap().push((headers, params));
        match query.as_str() {
            "expired token" => FakeStatus::UNAUTHORIZED.into_response(),
            "upstream outage" => (
                FakeStatus::INTERNAL_SERVER_ERROR,
                Json(json!({"errors": [{"errorId": 10001, "message": "System error"}]})),
            )
                .into_response(),
            _ => Json(json!({
                "total": 42,
                "itemSummaries": [
                    {"title": "Pyrex Butterfly Gold bowl", "price": {"value": "18.00", "currency": "USD"}},
                    {"title": "Pyrex Butterfly Gold casserole", "price": {"value": "26.00", "currency": "USD"}}
                ]
            }))
            .into_response(),
        }
    }

    async fn spawn_fake() -> (String, FakeEbay) {
        let fake = FakeEbay::default();
        let app = Router::new()
            .route("/identity/v1/oauth2/token", post(mint_token))
            .route("/buy/browse/v1/item_summary/search", get(item_summaries))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake");
        let addr = listener.local_addr().expect("fake addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}"), fake)
    }

    fn client_for(root: &str) -> BrowseClient {
        let mut config = EbayConfig::default().with_root(root);
        config.app_id = Some("app".into());
        config.cert_id = Some("cert".into());
        config.marketplace_id = "EBAY_GB".into();
        let config = Arc::new(config);
        let http = Client::builder().no_proxy().build().expect("http client");
        let auth = AppTokenProvider::new(http.clone(), config.clone(), TokenCache::default());
        BrowseClient::new(http, config, auth)
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn parses_summaries_and_drops_unpriced_records() {
        let body = json!({
            "total": 27,
            "itemSummaries": [
                {
                    "title": "Vintage Pyrex Butterfly Gold Casserole",
                    "price": {"value": "24.99", "currency": "USD"},
                    "condition": "Used",
                    "itemEndDate": "2024-03-02T18:00:00.000Z",
                    "image": {"imageUrl": "https://i.ebayimg.com/1.jpg"},
                    "itemWebUrl": "https://www.ebay.com/itm/1"
                },
                {"title": "no price at all", "itemWebUrl": "https://www.ebay.com/itm/2"},
                {"title": "zero", "price": {"value": "0.00"}},
                {"title": "bad", "price": {"value": "call for price"}},
                {"title": 42, "price": {"value": "10.00"}},
                {"title": "Pyrex lid only", "price": {"value": 15.01}}
            ]
        });
        let snapshot = parse_browse_response("pyrex butterfly", &body, 15).expect("parse");
        assert_eq!(snapshot.total_found, 27);
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].sold_date.as_deref(), Some("2024-03-02T18:00:00.000Z"));
        assert_eq!(snapshot.items[1].condition, UNKNOWN_CONDITION);
        assert_eq!(snapshot.items[1].currency, DEFAULT_CURRENCY);
        assert_eq!(snapshot.items[1].item_url, "");
        assert_eq!(snapshot.min_price, 15.01);
        assert_eq!(snapshot.max_price, 24.99);
        assert_eq!(snapshot.avg_price, 20.0);
    }

    #[test]
    fn missing_summaries_mean_empty_snapshot() {
        let snapshot = parse_browse_response("q", &json!({"total": 0}), 10).expect("parse");
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.median_price, 0.0);
    }

    #[test]
    fn non_object_body_is_malformed() {
        let err = parse_browse_response("q", &json!([1, 2]), 10).expect_err("array body");
        assert!(matches!(err, MarketError::Malformed(_)));
    }

    #[tokio::test]
    async fn app_token_is_minted_once_and_sent_with_each_search() {
        let (root, fake) = spawn_fake().await;
        let client = client_for(&root);

        let first = client.search("pyrex butterfly gold", 80, true).await.expect("first search");
        let second = client.search("pyrex butterfly gold", 5, true).await.expect("second search");
        assert_eq!(first.total_found, 42);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.avg_price, 22.0);
        assert_eq!(second.items.len(), 2);

        let token_requests = fake.token_requests.lock().unwrap().clone();
        assert_eq!(token_requests.len(), 1);
        let (basic, form) = &token_requests[0];
        assert_eq!(basic, "Basic YXBwOmNlcnQ=");
        assert!(form.contains("grant_type=client_credentials"));
        assert!(form.contains("scope=https%3A%2F%2Fapi.ebay.com%2Foauth%2Fapi_scope"));

        let searches = fake.searches.lock().unwrap();
        assert_eq!(searches.len(), 2);
        for (headers, _) in searches.iter() {
            assert_eq!(header(headers, "authorization"), "Bearer minted-app-token");
            assert_eq!(header(headers, "x-ebay-c-marketplace-id"), "EBAY_GB");
        }
        let (_, params) = &searches[0];
        assert_eq!(params["q"], "pyrex butterfly gold");
        assert_eq!(params["limit"], "50");
        assert_eq!(params["sort"], "endDate");
        assert_eq!(params["filter"], LISTING_FILTER);
        assert_eq!(searches[1].1["limit"], "5");
    }

    #[tokio::test]
    async fn unauthorized_search_is_an_auth_error() {
        let (root, _fake) = spawn_fake().await;
        let err = client_for(&root)
            .search("expired token", 10, true)
            .await
            .expect_err("401");
        assert!(matches!(err, MarketError::Auth(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_message() {
        let (root, _fake) = spawn_fake().await;
        let err = client_for(&root)
            .search("upstream outage", 10, true)
            .await
            .expect_err("500");
        match err {
            MarketError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "System error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_client_reports_not_configured() {
        let config = Arc::new(EbayConfig::default());
        let auth = AppTokenProvider::new(build_client(), config.clone(), TokenCache::default());
        let client = BrowseClient::new(build_client(), config, auth);
        assert!(!client.is_configured());
        let err = client.search("lamp", 10, true).await.expect_err("no creds");
        assert!(matches!(err, MarketError::NotConfigured));
    }
}
