use crate::ebay::config::EbayConfig;
use crate::ebay::{map_send_error, read_error_body};
use crate::http::MARKET_TIMEOUT;
use crate::market::{
    ComparableSale, DEFAULT_CURRENCY, MarketError, MarketSearch, MarketSnapshot, UNKNOWN_CONDITION,
    positive_amount,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

const MAX_PAGE: usize = 100;
const SOLD_STATE: &str = "EndedWithSales";
/// Finding error ids for a bad, blocked or missing application id.
const AUTH_ERROR_IDS: [&str; 4] = ["10001", "11002", "11003", "11004"];

/// Legacy completed-items search. Authenticates with the app id alone.
#[derive(Clone)]
pub struct FindingClient {
    http: Client,
    config: Arc<EbayConfig>,
}

impl FindingClient {
    pub fn new(http: Client, config: Arc<EbayConfig>) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl MarketSearch for FindingClient {
    fn source_label(&self) -> &'static str {
        "eBay Completed Sales"
    }

    fn is_configured(&self) -> bool {
        self.config.app_id.is_some()
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        sold_only: bool,
    ) -> Result<MarketSnapshot, MarketError> {
        let app_id = self
            .config
            .app_id
            .as_deref()
            .ok_or(MarketError::NotConfigured)?;
        let page = limit.clamp(1, MAX_PAGE).to_string();
        let sold_flag = if sold_only { "true" } else { "false" };
        let response = self
            .http
            .get(self.config.finding_url())
            .timeout(MARKET_TIMEOUT)
            .query(&[
                ("OPERATION-NAME", "findCompletedItems"),
                ("SERVICE-VERSION", "1.13.0"),
                ("SECURITY-APPNAME", app_id),
                ("RESPONSE-DATA-FORMAT", "JSON"),
                ("REST-PAYLOAD", ""),
                ("keywords", query),
                ("paginationInput.entriesPerPage", page.as_str()),
                ("sortOrder", "EndTimeSoonest"),
                ("itemFilter(0).name", "SoldItemsOnly"),
                ("itemFilter(0).value", sold_flag),
                ("itemFilter(1).name", "MinPrice"),
                ("itemFilter(1).value", "1"),
            ])
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
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
        parse_finding_response(query, &body, limit, sold_only)
    }
}

/// Every Finding field is wrapped in a one-element array; unwrap it.
fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value.get(key)? {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    field(value, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub fn parse_finding_response(
    query: &str,
    body: &Value,
    limit: usize,
    sold_only: bool,
) -> Result<MarketSnapshot, MarketError> {
    let result = field(body, "findCompletedItemsResponse")
        .ok_or_else(|| MarketError::Malformed("missing findCompletedItemsResponse".into()))?;
    if let Some(ack) = text(result, "ack")
        && ack.eq_ignore_ascii_case("Failure")
    {
        let error = field(result, "errorMessage").and_then(|m| field(m, "error"));
        let message = error
            .and_then(|e| text(e, "message"))
            .unwrap_or_else(|| "request failed".into());
        if error.is_some_and(is_auth_failure) {
            return Err(MarketError::Auth(message));
        }
        return Err(MarketError::Status {
            status: 500,
            message,
        });
    }

    let total_found = field(result, "paginationOutput")
        .and_then(|p| field(p, "totalEntries"))
        .and_then(|t| match t {
            Value::String(s) => s.parse().ok(),
            other => other.as_u64(),
        })
        .unwrap_or(0);

    let items = field(result, "searchResult")
        .and_then(|s| s.get("item"))
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(|item| comparable_from_item(item, sold_only))
                .collect()
        })
        .unwrap_or_default();

    Ok(MarketSnapshot::new(query, total_found, items, limit))
}

/// Credential failures come back as `ack: Failure` with a Security domain
/// or one of the application error ids.
fn is_auth_failure(error: &Value) -> bool {
    let in_security_domain = text(error, "domain")
        .is_some_and(|domain| domain.eq_ignore_ascii_case("Security"));
    let auth_id = text(error, "errorId").is_some_and(|id| AUTH_ERROR_IDS.contains(&id.as_str()));
    in_security_domain || auth_id
}

fn comparable_from_item(item: &Value, sold_only: bool) -> Option<ComparableSale> {
    let selling = field(item, "sellingStatus")?;
    if sold_only && text(selling, "sellingState").as_deref() != Some(SOLD_STATE) {
        return None;
    }
    let current = field(selling, "currentPrice")?;
    let price = positive_amount(current.get("__value__"))?;
    let condition = field(item, "condition")
        .and_then(|c| text(c, "conditionDisplayName"))
        .unwrap_or_else(|| UNKNOWN_CONDITION.into());
    Some(ComparableSale {
        title: text(item, "title").unwrap_or_default(),
        price,
        currency: current
            .get("@currencyId")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CURRENCY)
            .to_string(),
        condition,
        sold_date: field(item, "listingInfo").and_then(|l| text(l, "endTime")),
        image_url: text(item, "galleryURL"),
        item_url: text(item, "viewItemURL").unwrap_or_default(),
    })
}
