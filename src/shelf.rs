//! Batch scan of a shelf photo: each candidate is priced on its own and a
//! failure on one never touches the others.

use crate::extract::extract_json_array;
use crate::http::SHELF_SCAN_TIMEOUT;
use crate::llm::{ChatRequest, LlmError, ModelTier, Reasoner};
use crate::market::{MarketSearch, MarketSnapshot, round_one};
use crate::models::{Category, Confidence, lenient_amount, lenient_text};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITEMS: usize = 10;
pub const MIN_SHELF_PRICE: f64 = 5.0;
const SEARCH_LIMIT: usize = 10;

const LOW_MULTIPLE: f64 = 2.0;
const HIGH_MULTIPLE: f64 = 8.0;
const AVG_MULTIPLE: f64 = 4.0;

const SHELF_SYSTEM_PROMPT: &str = "You are an experienced antique dealer scouting thrift and \
antique store shelves for items worth reselling. Look at the shelf photo and pick out up to 10 \
items with the best resale potential, most valuable first. Favour collectible kitchenware and \
glassware, named pottery, mid-century pieces, vintage toys and cameras. Skip generic modern goods \
and visibly damaged items.\n\n\
Reply with a JSON array only. Each element must have: item_name (brand, pattern and era when \
known), description, category (one of furniture, art, vases, figurines, knick_knacks, jewelry, \
pottery, glassware, textiles, books, collectibles, vintage_decor, kitchenware, lighting, mirrors, \
clocks, other; toys and cameras count as collectibles), estimated_shelf_price (a realistic thrift \
store tag as a number), search_query (the eBay search most likely to find sold copies) and confidence (high, medium or \
low). Reply with [] when nothing is worth picking up.";

const SHELF_USER_PROMPT: &str = "Scan this shelf and list the most valuable items for resale.";

#[derive(Debug, Clone, Deserialize)]
pub struct ShelfScanRequest {
    pub image: String,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DealRating {
    #[serde(rename = "🔥 Hot Deal")]
    HotDeal,
    #[serde(rename = "✅ Good Find")]
    GoodFind,
    #[serde(rename = "⚠️ Maybe")]
    Maybe,
    #[serde(rename = "❌ Skip")]
    Skip,
    #[serde(rename = "⚠️ Check Manually")]
    CheckManually,
}

impl DealRating {
    /// Thresholds are inclusive.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 5.0 {
            Self::HotDeal
        } else if ratio >= 3.0 {
            Self::GoodFind
        } else if ratio >= 1.5 {
            Self::Maybe
        } else {
            Self::Skip
        }
    }
}

/// One shelf entry as the model described it.
#[derive(Debug, Default, Deserialize)]
pub struct ShelfCandidate {
    #[serde(default, deserialize_with = "lenient_text")]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_shelf_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub search_query: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub confidence: Option<String>,
}

impl ShelfCandidate {
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("shelf candidate is not a json object".into());
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }

    /// Absent or non-positive prices floor to the minimum.
    pub fn shelf_price(&self) -> f64 {
        self.estimated_shelf_price
            .filter(|price| *price > 0.0)
            .unwrap_or(MIN_SHELF_PRICE)
    }

    /// The suggested query, else the item name.
    pub fn query(&self) -> Option<&str> {
        self.search_query
            .as_deref()
            .or(self.item_name.as_deref())
            .filter(|query| !query.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelfItem {
    pub item_name: String,
    pub description: String,
    pub category: Category,
    pub estimated_shelf_price: f64,
    pub ebay_low: f64,
    pub ebay_high: f64,
    pub ebay_avg: f64,
    pub profit_potential: f64,
    pub deal_rating: DealRating,
    pub search_query: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelfScanResponse {
    pub total_items_found: usize,
    pub deals: Vec<ShelfItem>,
    pub scan_summary: String,
}

/// How a candidate's market figures were obtained.
#[derive(Debug)]
pub enum Enrichment {
    Market(MarketSnapshot),
    Heuristic,
    Unavailable(String),
}

/// Ask the vision model for candidates. Transport and status failures
/// propagate; an unusable payload is an empty shelf.
pub async fn identify_candidates(
    llm: &dyn Reasoner,
    image_url: &str,
    max_items: usize,
) -> Result<Vec<Value>, LlmError> {
    let request = ChatRequest::text(ModelTier::Vision, SHELF_SYSTEM_PROMPT, SHELF_USER_PROMPT)
        .with_image(image_url)
        .max_tokens(2000)
        .temperature(0.3)
        .timeout(SHELF_SCAN_TIMEOUT);
    let text = llm.complete(request).await?;
    let mut candidates = extract_json_array(&text);
    if candidates.is_empty() {
        debug!(target = "appraisal.shelf", "shelf_payload_empty");
    }
    candidates.truncate(max_items);
    Ok(candidates)
}

/// Price every candidate concurrently. Output order matches input order.
pub async fn enrich_all(market: &dyn MarketSearch, candidates: Vec<Value>) -> Vec<ShelfItem> {
    join_all(
        candidates
            .into_iter()
            .map(|raw| enrich_candidate(market, raw)),
    )
    .await
}

pub async fn enrich_candidate(market: &dyn MarketSearch, raw: Value) -> ShelfItem {
    let (candidate, enrichment) = match ShelfCandidate::from_value(raw) {
        Ok(candidate) => {
            let enrichment = lookup(market, &candidate).await;
            (candidate, enrichment)
        }
        Err(err) => (ShelfCandidate::default(), Enrichment::Unavailable(err)),
    };
    if let Enrichment::Unavailable(reason) = &enrichment {
        warn!(
            target = "appraisal.shelf",
            item = candidate.item_name.as_deref().unwrap_or("unknown"),
            error = %reason,
            "shelf_item_enrichment_failed"
        );
        crate::metrics::degraded("scan_shelf", "item_enrichment");
    }
    price_candidate(candidate, enrichment)
}

async fn lookup(market: &dyn MarketSearch, candidate: &ShelfCandidate) -> Enrichment {
    if !market.is_configured() {
        return Enrichment::Heuristic;
    }
    let Some(query) = candidate.query() else {
        return Enrichment::Unavailable("no search query".into());
    };
    match market.search(query, SEARCH_LIMIT, true).await {
        Ok(snapshot) => Enrichment::Market(snapshot),
        Err(err) => Enrichment::Unavailable(err.to_string()),
    }
}

pub fn price_candidate(candidate: ShelfCandidate, enrichment: Enrichment) -> ShelfItem {
    let shelf_price = candidate.shelf_price();
    let search_query = candidate.query().unwrap_or_default().to_string();
    let confidence = candidate.confidence.as_deref().and_then(Confidence::from_raw);

    let (low, high, avg, confidence) = match &enrichment {
        Enrichment::Market(snapshot) => (
            snapshot.min_price,
            snapshot.max_price,
            snapshot.avg_price,
            confidence.unwrap_or_default(),
        ),
        Enrichment::Heuristic => (
            shelf_price * LOW_MULTIPLE,
            shelf_price * HIGH_MULTIPLE,
            shelf_price * AVG_MULTIPLE,
            confidence.unwrap_or_default(),
        ),
        Enrichment::Unavailable(_) => (0.0, 0.0, 0.0, confidence.unwrap_or(Confidence::Low)),
    };

    let (profit_potential, deal_rating) = match enrichment {
        Enrichment::Unavailable(_) => (0.0, DealRating::CheckManually),
        _ => {
            let ratio = round_one(avg / shelf_price);
            (ratio, DealRating::from_ratio(ratio))
        }
    };

    ShelfItem {
        item_name: candidate.item_name.unwrap_or_else(|| "Unknown".to_string()),
        description: candidate.description.unwrap_or_default(),
        category: candidate
            .category
            .as_deref()
            .map(Category::from_raw)
            .unwrap_or_default(),
        estimated_shelf_price: shelf_price,
        ebay_low: low,
        ebay_high: high,
        ebay_avg: avg,
        profit_potential,
        deal_rating,
        search_query,
        confidence,
    }
}

/// Best ratio first; ties keep their original order.
pub fn rank(mut deals: Vec<ShelfItem>) -> Vec<ShelfItem> {
    deals.sort_by(|a, b| b.profit_potential.total_cmp(&a.profit_potential));
    deals
}

pub fn summarize(deals: &[ShelfItem]) -> String {
    let hot = count_rating(deals, DealRating::HotDeal);
    let good = count_rating(deals, DealRating::GoodFind);
    if hot > 0 {
        format!("🎯 Found {hot} hot deal(s) and {good} good find(s)! Check the top items.")
    } else if good > 0 {
        format!("👍 Found {good} potentially good find(s). Worth investigating!")
    } else if !deals.is_empty() {
        "🔍 Some items identified, but nothing stands out. Keep hunting!".to_string()
    } else {
        "📷 Couldn't identify valuable items. Try a clearer photo or different angle.".to_string()
    }
}

fn count_rating(deals: &[ShelfItem], rating: DealRating) -> usize {
    deals.iter().filter(|deal| deal.deal_rating == rating).count()
}

pub fn into_response(deals: Vec<ShelfItem>) -> ShelfScanResponse {
    let deals = rank(deals);
    ShelfScanResponse {
        total_items_found: deals.len(),
        scan_summary: summarize(&deals),
        deals,
    }
}
