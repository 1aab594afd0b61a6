use crate::ebay::{EbayConfig, market_from_config};
use crate::extract::extract_json;
use crate::http::{IDENTIFY_TIMEOUT, build_client};
use crate::llm::{LlmError, ModelTier, OpenAiClient, OpenAiConfig, Reasoner};
use crate::market::{MarketError, MarketSearch, MarketSnapshot};
use crate::models::{
    IdentificationEstimate, IdentificationPayload, IdentifyRequest, IdentifyResponse,
    MarketDataResponse, StageReport,
};
use crate::query::{broader_query, build_query, needs_broadening};
use crate::refine::{RefineStatus, refine};
use crate::shelf::{self, ShelfItem, ShelfScanRequest, ShelfScanResponse};
use serde::Serialize;
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

const MARKET_SEARCH_LIMIT: usize = 15;

#[derive(Clone)]
pub struct Pipeline {
    llm: Arc<dyn Reasoner>,
    market: Arc<dyn MarketSearch>,
    market_source: &'static str,
}

impl Pipeline {
    pub fn new(llm: Arc<dyn Reasoner>, market: Arc<dyn MarketSearch>) -> Self {
        Self {
            llm,
            market,
            market_source: "custom",
        }
    }

    pub fn with_market_source(mut self, market_source: &'static str) -> Self {
        self.market_source = market_source;
        self
    }

    /// Wire the OpenAI and eBay clients from process environment. Both share
    /// one HTTP connection pool.
    pub fn from_env() -> Self {
        let http = build_client();
        let ebay = EbayConfig::from_env();
        let market_source = ebay.search_api.as_str();
        let llm = Arc::new(OpenAiClient::new(http.clone(), OpenAiConfig::from_env()));
        let market = market_from_config(http, ebay);
        Self::new(llm, market).with_market_source(market_source)
    }

    /// Pure configuration check; makes no network calls.
    pub fn readiness(&self) -> Readiness {
        let openai = self.llm.is_configured();
        let ebay = self.market.is_configured();
        Readiness {
            openai_configured: openai,
            ebay_configured: ebay,
            market_source: self.market_source,
            vision_model: self.llm.model_label(ModelTier::Vision),
            refine_model: self.llm.model_label(ModelTier::Refine),
            features: Features {
                image_identification: openai,
                market_data: ebay,
                price_refinement: openai && ebay,
            },
        }
    }

    /// Identify, price against sold listings, refine. Only the
    /// identification stage can fail the request.
    pub async fn identify(
        &self,
        request: IdentifyRequest,
    ) -> Result<IdentifyResponse, PipelineError> {
        let mut stages = Vec::new();

        let image_url = self
            .capture_stage("resolve_image", &mut stages, async {
                stages::resolve_image(&request.image)
            })
            .await?;

        let estimate = self
            .capture_stage(
                "identify_item",
                &mut stages,
                stages::identify_item(
                    self.llm.as_ref(),
                    &image_url,
                    request.additional_context.as_deref(),
                ),
            )
            .await?;

        let snapshot = self
            .capture_stage(
                "search_market",
                &mut stages,
                stages::search_market(self.market.as_ref(), &estimate),
            )
            .await?;

        let (estimate, market_data) = match snapshot {
            Some(snapshot) => {
                let refined = self
                    .capture_stage(
                        "refine_price",
                        &mut stages,
                        stages::refine_price(self.llm.as_ref(), estimate, &snapshot),
                    )
                    .await?;
                let market_data =
                    MarketDataResponse::from_snapshot(self.market.source_label(), &snapshot);
                (refined, Some(market_data))
            }
            None => (estimate, None),
        };
        let estimate = estimate.with_display_defaults();

        info!(
            target = "appraisal.pipeline",
            item = %estimate.item_name,
            suggested_price = estimate.suggested_price,
            market_data = market_data.is_some(),
            "identification_complete"
        );

        Ok(IdentifyResponse {
            estimate,
            market_data,
            stages,
        })
    }

    pub async fn scan_shelf(
        &self,
        request: ShelfScanRequest,
    ) -> Result<ShelfScanResponse, PipelineError> {
        let mut stages = Vec::new();

        let image_url = self
            .capture_stage("resolve_image", &mut stages, async {
                stages::resolve_image(&request.image)
            })
            .await?;

        let candidates = self
            .capture_stage(
                "identify_shelf",
                &mut stages,
                stages::identify_shelf(self.llm.as_ref(), &image_url, request.max_items),
            )
            .await?;

        let deals = self
            .capture_stage(
                "enrich_shelf",
                &mut stages,
                stages::enrich_shelf(self.market.as_ref(), candidates),
            )
            .await?;

        let response = shelf::into_response(deals);
        info!(
            target = "appraisal.shelf",
            total = response.total_items_found,
            elapsed_ms = stages.iter().map(|s| s.elapsed_ms).sum::<u128>() as u64,
            "shelf_scan_complete"
        );
        Ok(response)
    }

    /// Diagnostic passthrough to the marketplace client.
    pub async fn search_market(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<MarketSnapshot, MarketError> {
        if !self.market.is_configured() {
            return Err(MarketError::NotConfigured);
        }
        self.market.search(query, limit, true).await
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub openai_configured: bool,
    pub ebay_configured: bool,
    pub market_source: &'static str,
    pub vision_model: String,
    pub refine_model: String,
    pub features: Features,
}

#[derive(Debug, Serialize)]
pub struct Features {
    pub image_identification: bool,
    pub market_data: bool,
    pub price_refinement: bool,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Configuration,
    Timeout,
    Upstream(u16),
    RequestFailed,
    Malformed,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::InvalidInput, message)
    }

    pub fn configuration(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Configuration, message)
    }

    pub fn malformed(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Malformed, message)
    }

    fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    /// Fatal mapping for the identification calls.
    pub fn from_llm(stage: &'static str, err: LlmError) -> Self {
        let kind = match &err {
            LlmError::MissingApiKey => PipelineErrorKind::Configuration,
            LlmError::Timeout => PipelineErrorKind::Timeout,
            LlmError::Request(_) => PipelineErrorKind::RequestFailed,
            LlmError::Status { status, .. } => PipelineErrorKind::Upstream(*status),
            LlmError::InvalidResponse(_) => PipelineErrorKind::Malformed,
        };
        Self::new(stage, kind, err.to_string())
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    const INLINE_PREFIX: &str = "data:image/jpeg;base64,";

    const IDENTIFY_SYSTEM_PROMPT: &str = "You are a seasoned antique and vintage appraiser \
pricing items for resale in an antique store booth. From the photo, work out what the item is \
(maker where visible), its era, and its condition (chips, cracks, wear, repairs). Price it for \
real resale rather than insurance: modest pieces sell for $5-20, mid-range for $20-100, better \
pieces above that.\n\n\
Reply with a single JSON object with exactly these fields: item_name, description, category \
(one of furniture, art, vases, figurines, knick_knacks, jewelry, pottery, glassware, textiles, \
books, collectibles, vintage_decor, kitchenware, lighting, mirrors, clocks, other), era_period, \
estimated_value_low, estimated_value_high, suggested_price (numbers), condition_notes, \
selling_tips, keywords (a short list of search terms) and confidence (high, medium or low).";

    const IDENTIFY_USER_PROMPT: &str = "Identify this item and estimate its resale value.";

    /// Data URLs and remote URLs pass through; anything else is taken as
    /// bare base64 JPEG.
    pub fn resolve_image(image: &str) -> Result<StageOutcome<String>, PipelineError> {
        let image = image.trim();
        if image.is_empty() {
            return Err(PipelineError::invalid_input(
                "resolve_image",
                "no image provided",
            ));
        }
        let (url, source) = if image.starts_with("data:image") {
            (image.to_string(), "data_url")
        } else if image.starts_with("http://") || image.starts_with("https://") {
            (image.to_string(), "remote_url")
        } else {
            (format!("{INLINE_PREFIX}{image}"), "inline_base64")
        };
        let output = json!({ "source": source, "length": url.len() });
        Ok(StageOutcome::new(url, output))
    }

    pub async fn identify_item(
        llm: &dyn Reasoner,
        image_url: &str,
        additional_context: Option<&str>,
    ) -> Result<StageOutcome<IdentificationEstimate>, PipelineError> {
        const STAGE: &str = "identify_item";
        if !llm.is_configured() {
            return Err(PipelineError::configuration(
                STAGE,
                "OPENAI_API_KEY is not set",
            ));
        }

        let mut user_text = IDENTIFY_USER_PROMPT.to_string();
        if let Some(context) = additional_context.map(str::trim).filter(|c| !c.is_empty()) {
            user_text.push_str(&format!("\n\nAdditional context from the seller: {context}"));
        }

        let request =
            crate::llm::ChatRequest::text(ModelTier::Vision, IDENTIFY_SYSTEM_PROMPT, user_text)
                .with_image(image_url)
                .max_tokens(2000)
                .timeout(IDENTIFY_TIMEOUT);
        let text = llm
            .complete(request)
            .await
            .map_err(|err| PipelineError::from_llm(STAGE, err))?;

        let value =
            extract_json(&text).map_err(|err| PipelineError::malformed(STAGE, err.to_string()))?;
        let estimate = IdentificationPayload::from_value(value)
            .map_err(|err| PipelineError::malformed(STAGE, err))?
            .into_estimate();

        let output = json!({
            "item_name": estimate.item_name,
            "category": estimate.category,
            "confidence": estimate.confidence,
            "keywords": estimate.keywords,
            "model": llm.model_label(ModelTier::Vision),
        });
        Ok(StageOutcome::new(estimate, output))
    }

    /// Never fails. A missing client, an error or an empty result all mean
    /// no market data.
    pub async fn search_market(
        market: &dyn MarketSearch,
        estimate: &IdentificationEstimate,
    ) -> Result<StageOutcome<Option<MarketSnapshot>>, PipelineError> {
        if !market.is_configured() {
            return Ok(StageOutcome::new(None, json!({ "skipped": "not_configured" })));
        }

        let query = build_query(&estimate.item_name, &estimate.keywords);
        let mut snapshot = match market.search(&query, MARKET_SEARCH_LIMIT, true).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(target = "appraisal.pipeline", query = %query, error = %err, "market_search_failed");
                crate::metrics::degraded("search_market", "upstream");
                return Ok(StageOutcome::new(None, json!({ "query": query, "error": err.to_string() })));
            }
        };

        let mut broadened = false;
        if needs_broadening(snapshot.total_found, &estimate.keywords) {
            if let Some(broader) = broader_query(&estimate.keywords) {
                match market.search(&broader, MARKET_SEARCH_LIMIT, true).await {
                    Ok(wider) => {
                        snapshot = wider;
                        broadened = true;
                    }
                    Err(err) => {
                        warn!(target = "appraisal.pipeline", query = %broader, error = %err, "broader_search_failed");
                        crate::metrics::degraded("search_market", "broaden");
                    }
                }
            }
        }

        let output = json!({
            "query": snapshot.query,
            "total_found": snapshot.total_found,
            "returned": snapshot.items.len(),
            "broadened": broadened,
        });
        let snapshot = (!snapshot.is_empty()).then_some(snapshot);
        Ok(StageOutcome::new(snapshot, output))
    }

    pub async fn refine_price(
        llm: &dyn Reasoner,
        estimate: IdentificationEstimate,
        snapshot: &MarketSnapshot,
    ) -> Result<StageOutcome<IdentificationEstimate>, PipelineError> {
        let (estimate, status) = refine(llm, estimate, snapshot).await;
        let output = json!({
            "status": status.as_str(),
            "estimated_value_low": estimate.estimated_value_low,
            "estimated_value_high": estimate.estimated_value_high,
            "suggested_price": estimate.suggested_price,
        });
        if status == RefineStatus::Fallback {
            info!(target = "appraisal.pipeline", "refinement_skipped_original_estimate_kept");
        }
        Ok(StageOutcome::new(estimate, output))
    }

    pub async fn identify_shelf(
        llm: &dyn Reasoner,
        image_url: &str,
        max_items: usize,
    ) -> Result<StageOutcome<Vec<Value>>, PipelineError> {
        const STAGE: &str = "identify_shelf";
        if !llm.is_configured() {
            return Err(PipelineError::configuration(
                STAGE,
                "OPENAI_API_KEY is not set",
            ));
        }
        let candidates = shelf::identify_candidates(llm, image_url, max_items)
            .await
            .map_err(|err| PipelineError::from_llm(STAGE, err))?;
        let output = json!({ "candidates": candidates.len(), "max_items": max_items });
        Ok(StageOutcome::new(candidates, output))
    }

    pub async fn enrich_shelf(
        market: &dyn MarketSearch,
        candidates: Vec<Value>,
    ) -> Result<StageOutcome<Vec<ShelfItem>>, PipelineError> {
        let deals = shelf::enrich_all(market, candidates).await;
        let output = json!({
            "items": deals.len(),
            "market_priced": market.is_configured(),
        });
        Ok(StageOutcome::new(deals, output))
    }
}
