use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::coherence::CvCoherence;
use super::lda::VariationalLda;
use super::vocabulary::{EncodedCorpus, Vocabulary};
use super::{CoherenceStrategy, InferenceStrategy};
use crate::config::{AppConfig, SweepConfig};
use crate::error::{Result, TopicError};
use crate::models::{CandidateOutcome, Corpus, SearchResult};

/// Candidate topic counts `{start, start+step, ...}` below `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRange {
    pub start: usize,
    pub limit: usize,
    pub step: usize,
}

impl SweepRange {
    pub fn new(start: usize, limit: usize, step: usize) -> Self {
        SweepRange { start, limit, step }
    }

    pub fn candidates(&self) -> Vec<usize> {
        if self.step == 0 {
            return Vec::new();
        }
        (self.start..self.limit).step_by(self.step).collect()
    }

    fn checked_candidates(&self) -> Result<Vec<usize>> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(TopicError::InvalidRange {
                start: self.start,
                limit: self.limit,
                step: self.step,
            });
        }
        Ok(candidates)
    }
}

impl Default for SweepRange {
    fn default() -> Self {
        SweepRange::from(&SweepConfig::default())
    }
}

impl From<&SweepConfig> for SweepRange {
    fn from(config: &SweepConfig) -> Self {
        SweepRange::new(config.start, config.limit, config.step)
    }
}

/// Cooperative cancellation flag, checked between sweep candidates.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Index of the strictly greatest score; the first one wins on ties.
/// Non-finite scores never win.
pub fn select_best(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Sweeps candidate topic counts and keeps the most coherent model.
pub struct ModelSelector {
    inference: Box<dyn InferenceStrategy>,
    coherence: Box<dyn CoherenceStrategy>,
    parallel: bool,
}

impl ModelSelector {
    /// Variational LDA scored with C_v coherence.
    pub fn new(config: &AppConfig) -> Self {
        ModelSelector {
            inference: Box::new(VariationalLda::new(config.lda.clone())),
            coherence: Box::new(CvCoherence::new(config.coherence.clone())),
            parallel: config.sweep.parallel,
        }
    }

    pub fn with_strategies(
        inference: Box<dyn InferenceStrategy>,
        coherence: Box<dyn CoherenceStrategy>,
    ) -> Self {
        ModelSelector {
            inference,
            coherence,
            parallel: false,
        }
    }

    /// Evaluate candidates on the rayon pool instead of one after another.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn sweep(
        &self,
        corpus: &Corpus,
        range: &SweepRange,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        // Fail fast before any fit: range, corpus, vocabulary
        let candidates = range.checked_candidates()?;
        if corpus.is_empty() {
            return Err(TopicError::EmptyCorpus);
        }
        let vocabulary = Arc::new(Vocabulary::build(corpus)?);
        let encoded = EncodedCorpus::encode(corpus, vocabulary);

        info!(
            documents = corpus.len(),
            vocabulary = encoded.vocabulary().len(),
            candidates = ?candidates,
            parallel = self.parallel,
            "starting topic count sweep"
        );

        let outcomes: Vec<CandidateOutcome> = if self.parallel {
            candidates
                .par_iter()
                .map(|&k| (!cancel.is_cancelled()).then(|| self.evaluate(&encoded, corpus, k)))
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        } else {
            let mut outcomes = Vec::with_capacity(candidates.len());
            for &k in &candidates {
                if cancel.is_cancelled() {
                    break;
                }
                outcomes.push(self.evaluate(&encoded, corpus, k));
            }
            outcomes
        };

        let cancelled = outcomes.len() < candidates.len();
        if cancelled {
            info!(completed = outcomes.len(), total = candidates.len(), "sweep cancelled");
        }

        if !outcomes.is_empty() && outcomes.iter().all(|o| !o.is_valid()) {
            return Err(TopicError::AllCandidatesFailed {
                failures: outcomes.into_iter().filter_map(|o| o.failure).collect(),
            });
        }

        let scores: Vec<f64> = outcomes.iter().map(|o| o.score).collect();
        let optimal_k = select_best(&scores).map(|i| outcomes[i].k);
        if let Some(k) = optimal_k {
            info!(optimal_k = k, "sweep complete");
        }

        Ok(SearchResult {
            candidates: outcomes,
            optimal_k,
            cancelled,
        })
    }

    fn evaluate(&self, encoded: &EncodedCorpus, corpus: &Corpus, k: usize) -> CandidateOutcome {
        let result = self.inference.fit(encoded, k).and_then(|mut model| {
            let topic_scores = self.coherence.topic_scores(&model, corpus)?;
            let score = self.coherence.aggregate(&topic_scores);
            if !score.is_finite() {
                return Err(TopicError::NumericInstability { k, stage: "coherence" });
            }
            model.set_topic_coherence(topic_scores);
            Ok((model, score))
        });

        match result {
            Ok((model, score)) => {
                info!(k, score, "candidate scored");
                CandidateOutcome {
                    k,
                    model: Some(model),
                    score,
                    failure: None,
                }
            }
            Err(err) => {
                warn!(k, error = %err, "candidate failed");
                CandidateOutcome {
                    k,
                    model: None,
                    score: f64::NEG_INFINITY,
                    failure: Some(err.into_candidate_failure(k)),
                }
            }
        }
    }
}

/// Sweep with the default inference and coherence settings.
pub fn find_optimal_topics(corpus: &Corpus, range: SweepRange) -> Result<SearchResult> {
    ModelSelector::new(&AppConfig::default()).sweep(corpus, &range, &CancellationToken::new())
}
