//! Revises an initial price estimate against sold-listing evidence.
//!
//! Refinement is best effort: any transport, status or parse failure hands
//! back the estimate exactly as it came in.

use crate::extract::extract_json;
use crate::http::REFINE_TIMEOUT;
use crate::llm::{ChatRequest, ModelTier, Reasoner};
use crate::market::MarketSnapshot;
use crate::models::{IdentificationEstimate, lenient_amount, lenient_text};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const SAMPLE_COMPARABLES: usize = 5;
const NO_COMPARABLES: &str = "No specific comparables found";
const ANALYSIS_MARKER: &str = "📊 Market Analysis:";

const REFINE_SYSTEM_PROMPT: &str =
    "You are an antique pricing expert. Respond only in valid JSON.";

/// Fields the reasoning service may revise. Anything missing stays as is.
#[derive(Debug, Default, Deserialize)]
pub struct PriceRevision {
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_value_low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_value_high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub suggested_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub market_analysis: Option<String>,
}

impl PriceRevision {
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("revision is not a json object".into());
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineStatus {
    Applied,
    Fallback,
}

impl RefineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Fallback => "fallback",
        }
    }
}

pub async fn refine(
    llm: &dyn Reasoner,
    estimate: IdentificationEstimate,
    snapshot: &MarketSnapshot,
) -> (IdentificationEstimate, RefineStatus) {
    let request = ChatRequest::text(
        ModelTier::Refine,
        REFINE_SYSTEM_PROMPT,
        refinement_prompt(&estimate, snapshot),
    )
    .max_tokens(500)
    .timeout(REFINE_TIMEOUT);

    let text = match llm.complete(request).await {
        Ok(text) => text,
        Err(err) => {
            warn!(target = "appraisal.pipeline", error = %err, "refine_request_failed");
            crate::metrics::degraded("refine_price", "upstream");
            return (estimate, RefineStatus::Fallback);
        }
    };

    let revision = match extract_json(&text)
        .map_err(|err| err.to_string())
        .and_then(PriceRevision::from_value)
    {
        Ok(revision) => revision,
        Err(err) => {
            warn!(target = "appraisal.pipeline", error = %err, "refine_parse_failed");
            crate::metrics::degraded("refine_price", "malformed");
            return (estimate, RefineStatus::Fallback);
        }
    };

    (apply_revision(estimate, revision), RefineStatus::Applied)
}

/// Overwrite only the fields the revision carries. Low/high ordering is
/// passed through unchanged; an inverted range is logged, not corrected.
pub fn apply_revision(
    mut estimate: IdentificationEstimate,
    revision: PriceRevision,
) -> IdentificationEstimate {
    if let Some(low) = revision.estimated_value_low {
        estimate.estimated_value_low = low;
    }
    if let Some(high) = revision.estimated_value_high {
        estimate.estimated_value_high = high;
    }
    if let Some(price) = revision.suggested_price {
        estimate.suggested_price = price;
    }
    if let Some(analysis) = revision.market_analysis {
        estimate
            .selling_tips
            .push_str(&format!("\n\n{ANALYSIS_MARKER} {analysis}"));
    }
    if estimate.estimated_value_low > estimate.estimated_value_high {
        warn!(
            target = "appraisal.pipeline",
            low = estimate.estimated_value_low,
            high = estimate.estimated_value_high,
            "refined_range_inverted"
        );
    }
    info!(
        target = "appraisal.pipeline",
        suggested_price = estimate.suggested_price,
        "estimate_refined"
    );
    estimate
}

pub fn refinement_prompt(estimate: &IdentificationEstimate, snapshot: &MarketSnapshot) -> String {
    let comparables = comparable_lines(snapshot);
    format!(
        "You previously identified this antique item as: {name}\n\n\
         I've searched eBay for recently SOLD items matching \"{query}\" and found {total} completed sales.\n\n\
         Here's the market data from actual eBay sales:\n\
         - Average sold price: ${avg:.2}\n\
         - Median sold price: ${median:.2}\n\
         - Price range: ${min:.2} - ${max:.2}\n\n\
         Sample comparable sales:\n{comparables}\n\n\
         Based on this REAL market data, revise your price estimates. eBay prices are often lower \
         than antique store prices; booth markup is typically 1.5-2.5x of eBay prices. Adjust for \
         condition relative to the comparables.\n\n\
         Respond with a JSON object containing only these fields:\n\
         {{\"estimated_value_low\": <number>, \"estimated_value_high\": <number>, \
         \"suggested_price\": <number>, \"market_analysis\": \"<one or two sentences>\"}}",
        name = described_as(estimate),
        query = snapshot.query,
        total = snapshot.total_found,
        avg = snapshot.avg_price,
        median = snapshot.median_price,
        min = snapshot.min_price,
        max = snapshot.max_price,
    )
}

/// The model may leave the name out; fall back to its own keywords.
fn described_as(estimate: &IdentificationEstimate) -> String {
    let name = estimate.item_name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    if estimate.keywords.is_empty() {
        "an item you could not name".to_string()
    } else {
        format!("an unnamed item ({})", estimate.keywords.join(", "))
    }
}

fn comparable_lines(snapshot: &MarketSnapshot) -> String {
    let lines: Vec<String> = snapshot
        .items
        .iter()
        .take(SAMPLE_COMPARABLES)
        .map(|item| format!("- \"{}\" - ${:.2} ({})", item.title, item.price, item.condition))
        .collect();
    if lines.is_empty() {
        NO_COMPARABLES.to_string()
    } else {
        lines.join("\n")
    }
}
