use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const UNKNOWN_CONDITION: &str = "Unknown";

/// One sold listing used as pricing evidence.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableSale {
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub condition: String,
    pub sold_date: Option<String>,
    pub image_url: Option<String>,
    pub item_url: String,
}

/// Aggregate of a single marketplace search. Statistics cover `items` only,
/// never `total_found`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub query: String,
    pub total_found: u64,
    pub items: Vec<ComparableSale>,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub median_price: f64,
}

impl MarketSnapshot {
    pub fn new(query: &str, total_found: u64, mut items: Vec<ComparableSale>, limit: usize) -> Self {
        items.truncate(limit);
        let prices: Vec<f64> = items.iter().map(|item| item.price).collect();
        let stats = PriceStats::from_prices(&prices);
        Self {
            query: query.to_string(),
            total_found,
            items,
            avg_price: stats.avg,
            min_price: stats.min,
            max_price: stats.max,
            median_price: stats.median,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl PriceStats {
    /// Mean, extremes and median rounded to cents; all zero for no prices.
    pub fn from_prices(prices: &[f64]) -> Self {
        if prices.is_empty() {
            return Self::default();
        }
        let mut sorted = prices.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mid = count / 2;
        let median = if count % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        };
        let avg = sorted.iter().sum::<f64>() / count as f64;
        Self {
            avg: round_two(avg),
            min: round_two(sorted[0]),
            max: round_two(sorted[count - 1]),
            median: round_two(median),
        }
    }
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("marketplace credentials not configured")]
    NotConfigured,
    #[error("marketplace authentication failed: {0}")]
    Auth(String),
    #[error("marketplace unavailable: {0}")]
    SourceUnavailable(String),
    #[error("marketplace returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("marketplace response malformed: {0}")]
    Malformed(String),
}

/// A sold-listings search backend.
#[async_trait]
pub trait MarketSearch: Send + Sync {
    /// Label shown to users next to market data.
    fn source_label(&self) -> &'static str;

    /// Whether credentials are present. Never touches the network.
    fn is_configured(&self) -> bool;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        sold_only: bool,
    ) -> Result<MarketSnapshot, MarketError>;
}

/// Marketplaces and models send amounts both as numbers and as strings.
pub fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    }?;
    amount.is_finite().then_some(amount)
}

/// Positive amount or nothing.
pub fn positive_amount(value: Option<&Value>) -> Option<f64> {
    value.and_then(parse_amount).filter(|amount| *amount > 0.0)
}

pub fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
