// Extraction conductor - runs strategy passes per page and assembles the dish list
//
// Every (page, strategy, profile) recognition job is independent. Jobs run on a
// JoinSet gated by a semaphore sized to the worker count, and their lines are
// merged by provenance key, so completion order never changes the result.
// Dropping the future returned by `extract` aborts the sets, which kills any
// running engine processes.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::aggregator::{aggregate, dedup_first_seen, texts, Provenance, TextLine};
use super::classifier::{ClassifierRules, LineLabel, MenuClassifier};
use super::ocr_engine::{split_lines, RecognitionEngine, RecognitionProfile, SegmentationMode};
use super::rasterizer::{DocumentKind, RasterImage, Rasterizer};
use super::strategy::{Strategy, PRIMARY_STRATEGIES, ROTATION_STRATEGIES};
use crate::config::{EngineConfig, MenuscanConfig, RasterizerConfig};
use crate::types::{ExtractionError, RecognitionError};

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub engine: EngineConfig,
    pub rasterizer: RasterizerConfig,
    pub classifier: ClassifierRules,
    /// Jobs allowed in flight at once.
    pub workers: usize,
}

impl From<&MenuscanConfig> for ExtractionConfig {
    fn from(config: &MenuscanConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            rasterizer: config.rasterizer.clone(),
            classifier: config.classifier.clone(),
            workers: config.pipeline.worker_count(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::from(&MenuscanConfig::default())
    }
}

/// Per-page progress. Rotation is only attempted when the primary pass
/// produced no dishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Initial,
    PrimaryAttempted,
    RotationAttempted,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rasterize,
    Preprocess,
    Recognize,
}

/// A failure that was absorbed instead of aborting the request.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub page_index: Option<usize>,
    pub strategy: Option<String>,
    pub segmentation: Option<SegmentationMode>,
    pub message: String,
}

impl StageFailure {
    fn document(stage: Stage, error: impl Display) -> Self {
        Self {
            stage,
            page_index: None,
            strategy: None,
            segmentation: None,
            message: error.to_string(),
        }
    }

    fn job(
        stage: Stage,
        page_index: usize,
        strategy: Strategy,
        segmentation: Option<SegmentationMode>,
        error: impl Display,
    ) -> Self {
        Self {
            stage,
            page_index: Some(page_index),
            strategy: Some(strategy.label()),
            segmentation,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    pub page_index: usize,
    pub state_path: Vec<PassState>,
    pub dishes: Vec<String>,
    pub failures: Vec<StageFailure>,
}

impl PageOutcome {
    pub fn rotation_attempted(&self) -> bool {
        self.state_path.contains(&PassState::RotationAttempted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub engine: String,
    pub pages: Vec<PageOutcome>,
    /// Concatenated per-page dishes, first occurrence kept.
    pub dishes: Vec<String>,
    /// Failures not tied to a single page.
    pub failures: Vec<StageFailure>,
}

impl ExtractionReport {
    pub fn all_failures(&self) -> impl Iterator<Item = &StageFailure> {
        self.failures
            .iter()
            .chain(self.pages.iter().flat_map(|page| page.failures.iter()))
    }
}

#[derive(Default)]
struct StrategyOutput {
    lines: Vec<TextLine>,
    failures: Vec<StageFailure>,
}

/// Request-scoped pipeline over a shared engine handle. Cloning is cheap;
/// clones share the worker pool.
#[derive(Clone)]
pub struct MenuExtractor {
    engine: Arc<dyn RecognitionEngine>,
    engine_config: Arc<EngineConfig>,
    rasterizer: Arc<Rasterizer>,
    classifier: Arc<MenuClassifier>,
    workers: Arc<Semaphore>,
}

impl MenuExtractor {
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: ExtractionConfig) -> Self {
        Self {
            engine,
            engine_config: Arc::new(config.engine),
            rasterizer: Arc::new(Rasterizer::new(config.rasterizer)),
            classifier: Arc::new(MenuClassifier::new(config.classifier)),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
        }
    }

    /// Ordered candidate dish names. Never fails; undecodable input and
    /// engine failures yield fewer (possibly zero) dishes.
    pub async fn extract(&self, bytes: &[u8], is_multi_page: bool) -> Vec<String> {
        self.extract_report(bytes, DocumentKind::from_multi_page(is_multi_page))
            .await
            .dishes
    }

    #[instrument(skip(self, bytes), fields(bytes = bytes.len(), engine = self.engine.name()))]
    pub async fn extract_report(&self, bytes: &[u8], kind: DocumentKind) -> ExtractionReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut failures = Vec::new();

        let pages = match self.rasterizer.rasterize(bytes, kind).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, "could not rasterize upload");
                failures.push(StageFailure::document(Stage::Rasterize, &e));
                Vec::new()
            }
        };
        info!(pages = pages.len(), ?kind, "rasterized upload");

        let (outcomes, page_failures) = self.process_pages(pages).await;
        failures.extend(page_failures);
        self.report(started_at, timer, outcomes, failures)
    }

    /// Run the pass state machine over already decoded pages.
    pub async fn extract_pages(&self, pages: Vec<RasterImage>) -> ExtractionReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let (outcomes, failures) = self.process_pages(pages).await;
        self.report(started_at, timer, outcomes, failures)
    }

    /// Classify text that was recognized elsewhere.
    pub fn classify_text(&self, raw: &str) -> Vec<String> {
        classify_text(&self.classifier, raw)
    }

    async fn process_pages(
        &self,
        pages: Vec<RasterImage>,
    ) -> (Vec<PageOutcome>, Vec<StageFailure>) {
        let mut jobs = JoinSet::new();
        for page in pages {
            let extractor = self.clone();
            jobs.spawn(async move { extractor.process_page(page).await });
        }

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "page task did not complete");
                    failures.push(StageFailure::document(Stage::Recognize, e));
                }
            }
        }
        outcomes.sort_by_key(|outcome| outcome.page_index);
        (outcomes, failures)
    }

    #[instrument(skip(self, page), fields(page = page.page_index()))]
    async fn process_page(&self, page: RasterImage) -> PageOutcome {
        let mut state_path = vec![PassState::Initial];
        let mut failures = Vec::new();

        let primary = self.run_pass(&page, &PRIMARY_STRATEGIES, &mut failures).await;
        state_path.push(PassState::PrimaryAttempted);
        let mut dishes = self.classifier.candidate_dishes(&texts(&primary));

        if dishes.is_empty() {
            debug!(lines = primary.len(), "primary pass found no dishes, trying rotations");
            let rotated = self.run_pass(&page, &ROTATION_STRATEGIES, &mut failures).await;
            state_path.push(PassState::RotationAttempted);
            dishes = self.classifier.candidate_dishes(&texts(&rotated));
        }
        state_path.push(PassState::Done);

        debug!(dishes = dishes.len(), failures = failures.len(), "page done");
        PageOutcome {
            page_index: page.page_index(),
            state_path,
            dishes,
            failures,
        }
    }

    async fn run_pass(
        &self,
        page: &RasterImage,
        strategies: &[Strategy],
        failures: &mut Vec<StageFailure>,
    ) -> Vec<TextLine> {
        let mut jobs = JoinSet::new();
        for (priority, strategy) in strategies.iter().copied().enumerate() {
            let extractor = self.clone();
            let page = page.clone();
            jobs.spawn(async move { extractor.run_strategy(page, priority, strategy).await });
        }

        let mut lines = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(output) => {
                    lines.extend(output.lines);
                    failures.extend(output.failures);
                }
                Err(e) => {
                    warn!(page = page.page_index(), error = %e, "strategy task did not complete");
                    failures.push(StageFailure {
                        page_index: Some(page.page_index()),
                        ..StageFailure::document(Stage::Recognize, e)
                    });
                }
            }
        }
        aggregate(lines)
    }

    async fn run_strategy(self, page: RasterImage, priority: usize, strategy: Strategy) -> StrategyOutput {
        let page_index = page.page_index();
        let mut output = StrategyOutput::default();

        let prepared = match self.preprocess(page, strategy).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(page = page_index, %strategy, error = %e, "preprocessing failed");
                output
                    .failures
                    .push(StageFailure::job(Stage::Preprocess, page_index, strategy, None, e));
                return output;
            }
        };

        let mut jobs = JoinSet::new();
        for (profile_order, segmentation) in strategy.profiles().iter().copied().enumerate() {
            let base = Provenance {
                page_index,
                strategy,
                priority,
                segmentation,
                profile_order,
                order: 0,
            };
            let extractor = self.clone();
            let prepared = prepared.clone();
            jobs.spawn(async move {
                let result = extractor.recognize(&prepared, &base).await;
                (base.segmentation, result)
            });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(lines))) => output.lines.extend(lines),
                Ok((segmentation, Err(e))) => {
                    warn!(
                        page = page_index,
                        %strategy,
                        mode = segmentation.label(),
                        psm = segmentation.psm(),
                        error = %e,
                        "recognition failed"
                    );
                    output.failures.push(StageFailure::job(
                        Stage::Recognize,
                        page_index,
                        strategy,
                        Some(segmentation),
                        e,
                    ));
                }
                Err(e) => {
                    warn!(page = page_index, %strategy, error = %e, "recognition task did not complete");
                    output
                        .failures
                        .push(StageFailure::job(Stage::Recognize, page_index, strategy, None, e));
                }
            }
        }
        output
    }

    async fn preprocess(
        &self,
        page: RasterImage,
        strategy: Strategy,
    ) -> Result<RasterImage, ExtractionError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| ExtractionError::Preprocess(e.to_string()))?;
        tokio::task::spawn_blocking(move || strategy.preprocess(&page))
            .await
            .map_err(|e| ExtractionError::Preprocess(e.to_string()))
    }

    async fn recognize(
        &self,
        prepared: &RasterImage,
        base: &Provenance,
    ) -> Result<Vec<TextLine>, RecognitionError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| RecognitionError::PoolClosed)?;
        let profile = RecognitionProfile::new(base.segmentation, &self.engine_config);
        let raw = self.engine.recognize(prepared, &profile).await?;
        Ok(TextLine::from_raw(&raw, base))
    }

    fn report(
        &self,
        started_at: DateTime<Utc>,
        timer: Instant,
        pages: Vec<PageOutcome>,
        failures: Vec<StageFailure>,
    ) -> ExtractionReport {
        let dishes = dedup_first_seen(pages.iter().flat_map(|page| page.dishes.iter().cloned()));
        let elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            pages = pages.len(),
            dishes = dishes.len(),
            failures = failures.len() + pages.iter().map(|p| p.failures.len()).sum::<usize>(),
            elapsed_ms,
            "extraction finished"
        );
        ExtractionReport {
            started_at,
            elapsed_ms,
            engine: self.engine.name().to_string(),
            pages,
            dishes,
            failures,
        }
    }
}

/// Split, dedup and classify raw recognized text.
pub fn classify_text(classifier: &MenuClassifier, raw: &str) -> Vec<String> {
    let lines = dedup_first_seen(split_lines(raw));
    classifier.candidate_dishes(&lines)
}

/// The labels `classify_text` works from, one per distinct line.
pub fn explain_text(classifier: &MenuClassifier, raw: &str) -> Vec<(String, LineLabel)> {
    let lines = dedup_first_seen(split_lines(raw));
    classifier.explain(&lines)
}
