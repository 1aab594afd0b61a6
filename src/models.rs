use crate::market::{MarketSnapshot, parse_amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const COMPARABLES_SHOWN: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentifyRequest {
    /// Base64 payload, `data:` URL or remote URL.
    pub image: String,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Furniture,
    Art,
    Vases,
    Figurines,
    KnickKnacks,
    Jewelry,
    Pottery,
    Glassware,
    Textiles,
    Books,
    Collectibles,
    VintageDecor,
    Kitchenware,
    Lighting,
    Mirrors,
    Clocks,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 17] = [
        Self::Furniture,
        Self::Art,
        Self::Vases,
        Self::Figurines,
        Self::KnickKnacks,
        Self::Jewelry,
        Self::Pottery,
        Self::Glassware,
        Self::Textiles,
        Self::Books,
        Self::Collectibles,
        Self::VintageDecor,
        Self::Kitchenware,
        Self::Lighting,
        Self::Mirrors,
        Self::Clocks,
        Self::Other,
    ];

    pub fn from_raw(value: &str) -> Self {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        serde_json::from_value(Value::String(normalized)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn from_raw(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

pub const UNIDENTIFIED_ITEM: &str = "Unidentified item";

/// Identification plus the price fields refinement may overwrite.
/// `item_name` stays empty when the model gave none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationEstimate {
    pub item_name: String,
    pub description: String,
    pub category: Category,
    pub era_period: String,
    pub estimated_value_low: f64,
    pub estimated_value_high: f64,
    pub suggested_price: f64,
    pub condition_notes: String,
    pub selling_tips: String,
    pub keywords: Vec<String>,
    pub confidence: Confidence,
}

/// Model output before defaults are filled in. Fields of the wrong type
/// read as absent rather than failing the whole payload.
#[derive(Debug, Default, Deserialize)]
pub struct IdentificationPayload {
    #[serde(default, deserialize_with = "lenient_text")]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub era_period: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_value_low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_value_high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub suggested_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub condition_notes: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub selling_tips: Option<String>,
    #[serde(default, deserialize_with = "lenient_keywords")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub confidence: Option<String>,
}

impl IdentificationPayload {
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("identification payload is not a json object".into());
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }

    pub fn into_estimate(self) -> IdentificationEstimate {
        IdentificationEstimate {
            item_name: self.item_name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            category: self
                .category
                .as_deref()
                .map(Category::from_raw)
                .unwrap_or_default(),
            era_period: self.era_period.unwrap_or_else(|| "Unknown".to_string()),
            estimated_value_low: self.estimated_value_low.unwrap_or(0.0),
            estimated_value_high: self.estimated_value_high.unwrap_or(0.0),
            suggested_price: self.suggested_price.unwrap_or(0.0),
            condition_notes: self.condition_notes.unwrap_or_default(),
            selling_tips: self.selling_tips.unwrap_or_default(),
            keywords: self.keywords,
            confidence: self
                .confidence
                .as_deref()
                .and_then(Confidence::from_raw)
                .unwrap_or_default(),
        }
    }
}

impl IdentificationEstimate {
    /// Fill the display name once searching and refinement are done.
    pub fn with_display_defaults(mut self) -> Self {
        if self.item_name.trim().is_empty() {
            self.item_name = UNIDENTIFIED_ITEM.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparable {
    pub title: String,
    pub price: f64,
    pub condition: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketDataResponse {
    pub source: String,
    pub query: String,
    pub total_found: u64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub median_price: f64,
    pub comparables: Vec<Comparable>,
}

impl MarketDataResponse {
    pub fn from_snapshot(source: &str, snapshot: &MarketSnapshot) -> Self {
        Self {
            source: source.to_string(),
            query: snapshot.query.clone(),
            total_found: snapshot.total_found,
            avg_price: snapshot.avg_price,
            min_price: snapshot.min_price,
            max_price: snapshot.max_price,
            median_price: snapshot.median_price,
            comparables: snapshot
                .items
                .iter()
                .take(COMPARABLES_SHOWN)
                .map(|item| Comparable {
                    title: item.title.clone(),
                    price: item.price,
                    condition: item.condition.clone(),
                    url: item.item_url.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyResponse {
    #[serde(flatten)]
    pub estimate: IdentificationEstimate,
    pub market_data: Option<MarketDataResponse>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickValueResponse {
    pub item_name: String,
    pub estimated_value_low: f64,
    pub estimated_value_high: f64,
    pub suggested_price: f64,
    pub category: Category,
    pub market_data: Option<MarketDataResponse>,
}

impl From<IdentifyResponse> for QuickValueResponse {
    fn from(value: IdentifyResponse) -> Self {
        Self {
            item_name: value.estimate.item_name,
            estimated_value_low: value.estimate.estimated_value_low,
            estimated_value_high: value.estimate.estimated_value_high,
            suggested_price: value.estimate.suggested_price,
            category: value.estimate.category,
            market_data: value.market_data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

pub(crate) fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_amount))
}

/// Accepts a list of strings or a single comma-separated string.
pub(crate) fn lenient_keywords<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect(),
        Some(Value::String(text)) => text.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .map(|keyword| keyword.trim().to_string())
        .filter(|keyword| !keyword.is_empty())
        .collect())
}
