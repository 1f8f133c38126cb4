//! Batch scoring of keyword lists through a completion provider.
//!
//! Keywords are split into fixed-size batches, one prompt per batch. Each
//! completion is parsed positionally into 1-5 scores. A batch whose call
//! fails scores the fallback for every keyword, and the run carries on, so
//! a report always holds exactly one score per input keyword.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod parser;

pub use parser::{ParsedScores, ResponseParser};

use crate::context::BusinessContext;
use crate::error::{ScorerError, ScorerResult};
use crate::llm::prompts::build_scoring_prompt;
use crate::llm::CompletionProvider;
use crate::logging::{LogContext, PerformanceLogger, RunIdGenerator};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Score assigned whenever a real score is unavailable
pub const FALLBACK_SCORE: u8 = 1;

/// What the list being scored contains
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    #[default]
    Keywords,
    ContentTopics,
}

impl std::fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMode::Keywords => write!(f, "keywords"),
            ScoringMode::ContentTopics => write!(f, "content topics"),
        }
    }
}

/// One input row's keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRecord {
    /// Original row position
    pub index: usize,
    pub text: String,
}

impl KeywordRecord {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self { index, text: text.into() }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Result of one batch round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Scored { scores: Vec<u8>, fallback_count: usize },
    Failed { reason: String },
    /// Not dispatched because the run was cancelled
    Skipped,
}

impl BatchOutcome {
    /// Scores for a batch of `len` keywords, fallback-filled when unscored
    pub fn into_scores(self, len: usize) -> Vec<u8> {
        match self {
            BatchOutcome::Scored { scores, .. } => scores,
            BatchOutcome::Failed { .. } | BatchOutcome::Skipped => vec![FALLBACK_SCORE; len],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Scored { .. } => "scored",
            BatchOutcome::Failed { .. } => "failed",
            BatchOutcome::Skipped => "skipped",
        }
    }
}

/// Progress notification delivered after each batch, in batch order
#[derive(Debug)]
pub struct BatchProgress<'a> {
    pub batch_number: usize,
    pub total_batches: usize,
    pub batch_len: usize,
    pub outcome: &'a BatchOutcome,
}

/// Shared flag for cooperative cancellation between batches
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; `false` if it had already been requested
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run hooks: cancellation and progress reporting
#[derive(Default)]
pub struct RunControl<'a> {
    pub cancel: Option<CancellationFlag>,
    pub progress: Option<&'a (dyn Fn(&BatchProgress<'_>) + Send + Sync)>,
}

impl<'a> RunControl<'a> {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled)
    }
}

/// Summary of a scoring run
#[derive(Debug, Clone)]
pub struct ScoringReport {
    pub run_id: String,
    /// One score per input keyword, in input order
    pub scores: Vec<u8>,
    /// One outcome per dispatched or skipped batch, in batch order
    pub outcomes: Vec<BatchOutcome>,
    /// Rows excluded from scoring because their keyword was blank
    pub blank_rows: usize,
    pub elapsed: Duration,
}

impl ScoringReport {
    pub fn total_batches(&self) -> usize {
        self.outcomes.len()
    }

    pub fn scored_batches(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Scored { .. }))
    }

    pub fn failed_batches(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Failed { .. }))
    }

    pub fn skipped_batches(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Skipped))
    }

    /// Positions in scored batches that fell back to the default score
    pub fn fallback_lines(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                BatchOutcome::Scored { fallback_count, .. } => *fallback_count,
                _ => 0,
            })
            .sum()
    }

    pub fn was_cancelled(&self) -> bool {
        self.skipped_batches() > 0
    }

    /// Histogram of scores 1..=5 (index 0 is score 1)
    pub fn distribution(&self) -> [usize; 5] {
        let mut counts = [0usize; 5];
        for &score in &self.scores {
            if (1..=5).contains(&score) {
                counts[(score - 1) as usize] += 1;
            }
        }
        counts
    }

    fn count<F: Fn(&BatchOutcome) -> bool>(&self, predicate: F) -> usize {
        self.outcomes.iter().filter(|o| predicate(o)).count()
    }
}

/// Batching options for a scorer
#[derive(Debug, Clone)]
pub struct ScorerOptions {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub mode: ScoringMode,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: 1,
            mode: ScoringMode::Keywords,
        }
    }
}

/// Turns N keywords into N scores through bounded-size provider calls
pub struct BatchScorer {
    options: ScorerOptions,
    parser: ResponseParser,
}

impl BatchScorer {
    pub fn new(options: ScorerOptions) -> ScorerResult<Self> {
        if options.batch_size == 0 {
            return Err(ScorerError::InvalidBatchSize);
        }
        if options.max_concurrent_batches == 0 {
            return Err(ScorerError::config("max_concurrent_batches must be > 0"));
        }

        Ok(Self {
            options,
            parser: ResponseParser::new()?,
        })
    }

    /// Number of provider calls needed for `keyword_count` keywords
    pub fn batch_count(&self, keyword_count: usize) -> usize {
        keyword_count.div_ceil(self.options.batch_size)
    }

    /// Render the prompt for the first batch of `keywords`
    pub fn preview_prompt<S: AsRef<str>>(&self, keywords: &[S], context: &BusinessContext) -> String {
        let end = keywords.len().min(self.options.batch_size);
        build_scoring_prompt(context, &keywords[..end], self.options.mode)
    }

    /// Score every keyword; the result aligns positionally with `keywords`
    pub async fn score<S: AsRef<str> + Sync>(
        &self,
        keywords: &[S],
        context: &BusinessContext,
        provider: &dyn CompletionProvider,
    ) -> ScoringReport {
        self.score_with(keywords, context, provider, &RunControl::default()).await
    }

    /// Score with cancellation and progress hooks
    pub async fn score_with<S: AsRef<str> + Sync>(
        &self,
        keywords: &[S],
        context: &BusinessContext,
        provider: &dyn CompletionProvider,
        control: &RunControl<'_>,
    ) -> ScoringReport {
        let run_id = RunIdGenerator::generate();

        if keywords.is_empty() {
            return ScoringReport {
                run_id,
                scores: Vec::new(),
                outcomes: Vec::new(),
                blank_rows: 0,
                elapsed: Duration::ZERO,
            };
        }

        let total_batches = self.batch_count(keywords.len());
        let perf = PerformanceLogger::new(
            LogContext::new("scoring", "score")
                .with_run_id(&run_id)
                .with_number_field("keywords", keywords.len() as i64)
                .with_number_field("batches", total_batches as i64),
        );
        info!(
            "Scoring {} {} in {} batches of up to {}",
            keywords.len(),
            self.options.mode,
            total_batches,
            self.options.batch_size
        );

        // `buffered` polls at most N batch futures at once and yields them in
        // index order, so outcomes line up with batches whatever finishes first.
        let run_ref = run_id.as_str();
        let mut results = stream::iter(keywords.chunks(self.options.batch_size).enumerate())
            .map(move |(idx, batch)| async move {
                let outcome = if control.is_cancelled() {
                    debug!("Skipping batch {} of {}: run cancelled", idx + 1, total_batches);
                    BatchOutcome::Skipped
                } else {
                    self.score_batch(idx, total_batches, batch, context, provider, run_ref).await
                };
                (batch.len(), outcome)
            })
            .buffered(self.options.max_concurrent_batches);

        let mut scores = Vec::with_capacity(keywords.len());
        let mut outcomes = Vec::with_capacity(total_batches);
        let mut batch_number = 0;

        while let Some((batch_len, outcome)) = results.next().await {
            batch_number += 1;
            if let Some(progress) = control.progress {
                progress(&BatchProgress {
                    batch_number,
                    total_batches,
                    batch_len,
                    outcome: &outcome,
                });
            }
            scores.extend(outcome.clone().into_scores(batch_len));
            outcomes.push(outcome);
        }
        drop(results);

        let elapsed = perf.elapsed();
        let status = if outcomes.iter().any(|o| matches!(o, BatchOutcome::Skipped)) {
            "cancelled"
        } else {
            "completed"
        };
        perf.finish_with_status("Scoring run finished", status);

        ScoringReport {
            run_id,
            scores,
            outcomes,
            blank_rows: 0,
            elapsed,
        }
    }

    /// Score table records, skipping blank keywords.
    ///
    /// Scores are placed by `KeywordRecord::index`. Blank rows are never
    /// sent to the provider and receive the fallback score at their index.
    /// The report holds one score per record.
    pub async fn score_records(
        &self,
        records: &[KeywordRecord],
        context: &BusinessContext,
        provider: &dyn CompletionProvider,
        control: &RunControl<'_>,
    ) -> ScoringReport {
        let (positions, keywords): (Vec<usize>, Vec<&str>) = records
            .iter()
            .filter(|record| !record.is_blank())
            .map(|record| (record.index, record.text.trim()))
            .unzip();

        let blank_rows = records.len() - keywords.len();
        if blank_rows > 0 {
            info!("Excluding {} blank keyword rows from scoring", blank_rows);
        }

        let mut report = self.score_with(&keywords, context, provider, control).await;
        report.scores = merge_scores(records.len(), &positions, &report.scores);
        report.blank_rows = blank_rows;
        report
    }

    async fn score_batch<S: AsRef<str>>(
        &self,
        idx: usize,
        total_batches: usize,
        batch: &[S],
        context: &BusinessContext,
        provider: &dyn CompletionProvider,
        run_id: &str,
    ) -> BatchOutcome {
        info!("Processing batch {} of {}", idx + 1, total_batches);

        let prompt = build_scoring_prompt(context, batch, self.options.mode);

        match provider.complete(&prompt).await {
            Ok(response) => {
                let ParsedScores { scores, fallback_count } = self.parser.parse(&response, batch.len());
                if fallback_count > 0 {
                    debug!(
                        "Batch {}: {} of {} positions used the fallback score",
                        idx + 1,
                        fallback_count,
                        batch.len()
                    );
                }
                BatchOutcome::Scored { scores, fallback_count }
            }
            Err(e) => {
                let first = batch.first().map(|k| k.as_ref()).unwrap_or_default();
                let log_ctx = LogContext::new("scoring", "score_batch")
                    .with_run_id(run_id)
                    .with_error_category(e.category())
                    .with_number_field("batch", (idx + 1) as i64)
                    .with_string_field("first_keyword", first);
                crate::log_warn!(log_ctx, e, "Batch failed, assigning fallback scores");
                BatchOutcome::Failed { reason: e.to_string() }
            }
        }
    }
}

/// Spread `scores` over `total` rows at `positions`, fallback elsewhere.
/// Positions past `total` are ignored.
pub fn merge_scores(total: usize, positions: &[usize], scores: &[u8]) -> Vec<u8> {
    let mut merged = vec![FALLBACK_SCORE; total];
    for (&pos, &score) in positions.iter().zip(scores) {
        if let Some(slot) = merged.get_mut(pos) {
            *slot = score;
        }
    }
    merged
}
