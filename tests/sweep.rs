// Composition tests for the topic-count sweep.
//
// Stub strategies pin scores and failures so the selection rule can be
// checked in isolation; the remaining tests run the default pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use topic_sweep::{
    find_optimal_topics, AppConfig, CancellationToken, CoherenceStrategy, Corpus, EncodedCorpus,
    FailureKind, InferenceStrategy, LdaConfig, ModelSelector, Result, SweepRange, TopicError,
    TrainedModel, VariationalLda,
};

fn corpus(docs: &[&[&str]]) -> Corpus {
    Corpus::new(
        docs.iter()
            .map(|d| d.iter().map(|t| t.to_string()).collect())
            .collect(),
    )
}

fn food_and_animals() -> Corpus {
    corpus(&[
        &["Food", "Dish", "Cuisine", "Tableware"],
        &["Food", "Ingredient", "Dish", "Recipe"],
        &["Cuisine", "Dish", "Tableware", "Plate"],
        &["Food", "Recipe", "Ingredient", "Plate"],
        &["Dog", "Cat", "Pet", "Mammal"],
        &["Dog", "Carnivore", "Mammal", "Pet"],
        &["Cat", "Whiskers", "Pet", "Mammal"],
        &["Dog", "Cat", "Carnivore", "Whiskers"],
    ])
}

fn quick_lda() -> VariationalLda {
    VariationalLda::new(LdaConfig {
        passes: 3,
        ..LdaConfig::default()
    })
}

/// Real inference that counts how often it was called.
struct CountingLda {
    inner: VariationalLda,
    calls: Arc<AtomicUsize>,
}

impl InferenceStrategy for CountingLda {
    fn fit(&self, corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(corpus, num_topics)
    }
}

struct FailingInference;

impl InferenceStrategy for FailingInference {
    fn fit(&self, _corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel> {
        Err(TopicError::NumericInstability {
            k: num_topics,
            stage: "e-step",
        })
    }
}

/// Scores looked up by topic count.
struct FixedScores(HashMap<usize, f64>);

impl CoherenceStrategy for FixedScores {
    fn topic_scores(&self, model: &TrainedModel, _texts: &Corpus) -> Result<Vec<f64>> {
        let score = self.0.get(&model.num_topics()).copied().unwrap_or(0.0);
        Ok(vec![score; model.num_topics()])
    }

    // Every topic carries the same pinned value; averaging could perturb it.
    fn aggregate(&self, topic_scores: &[f64]) -> f64 {
        topic_scores.first().copied().unwrap_or(0.0)
    }
}

fn fixed(pairs: &[(usize, f64)]) -> Box<FixedScores> {
    Box::new(FixedScores(pairs.iter().copied().collect()))
}

// ============================================================
// Selection rule
// ============================================================

#[test]
fn tie_selects_smallest_topic_count() {
    let selector = ModelSelector::with_strategies(Box::new(quick_lda()), fixed(&[(2, 0.41), (5, 0.41)]));
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(2, 8, 3), &CancellationToken::new())
        .unwrap();
    assert_eq!(result.topic_counts(), vec![2, 5]);
    assert_eq!(result.scores(), vec![0.41, 0.41]);
    assert_eq!(result.optimal_k, Some(2));
}

#[test]
fn maximum_score_wins() {
    let selector = ModelSelector::with_strategies(
        Box::new(quick_lda()),
        fixed(&[(1, 0.2), (2, 0.35), (3, 0.9), (4, 0.1)]),
    );
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(1, 5, 1), &CancellationToken::new())
        .unwrap();
    assert_eq!(result.optimal_k, Some(3));
    assert_eq!(result.best_model().map(|m| m.num_topics()), Some(3));
    assert_eq!(result.models().len(), 4);
}

#[test]
fn topic_coherence_is_attached_to_models() {
    let selector = ModelSelector::with_strategies(Box::new(quick_lda()), fixed(&[(2, 0.5)]));
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(2, 3, 1), &CancellationToken::new())
        .unwrap();
    let model = result.best_model().unwrap();
    assert_eq!(model.topic_coherence(), Some(&[0.5, 0.5][..]));
    assert!(model.topics(3).iter().all(|t| t.coherence_score == Some(0.5)));
}

// ============================================================
// Failures
// ============================================================

#[test]
fn zero_topic_candidate_is_recorded_not_skipped() {
    let selector = ModelSelector::with_strategies(Box::new(quick_lda()), fixed(&[(1, 0.3), (2, 0.6)]));
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(0, 3, 1), &CancellationToken::new())
        .unwrap();

    assert_eq!(result.topic_counts(), vec![0, 1, 2]);
    let first = &result.candidates[0];
    assert!(first.model.is_none());
    assert_eq!(first.score, f64::NEG_INFINITY);
    let failure = first.failure.as_ref().unwrap();
    assert_eq!(failure.k, 0);
    assert_eq!(failure.kind, FailureKind::InvalidTopicCount);
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.optimal_k, Some(2));
}

#[test]
fn empty_range_attempts_no_fits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let selector = ModelSelector::with_strategies(
        Box::new(CountingLda {
            inner: quick_lda(),
            calls: calls.clone(),
        }),
        fixed(&[]),
    );
    let err = selector
        .sweep(&food_and_animals(), &SweepRange::new(5, 5, 1), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, TopicError::InvalidRange { start: 5, limit: 5, step: 1 }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_corpus_fails_before_inference() {
    let calls = Arc::new(AtomicUsize::new(0));
    let selector = ModelSelector::with_strategies(
        Box::new(CountingLda {
            inner: quick_lda(),
            calls: calls.clone(),
        }),
        fixed(&[]),
    );
    let err = selector
        .sweep(&Corpus::default(), &SweepRange::new(2, 5, 1), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, TopicError::EmptyCorpus));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn tokenless_corpus_fails_with_empty_vocabulary() {
    let err = find_optimal_topics(&corpus(&[&[], &[]]), SweepRange::new(2, 5, 1)).unwrap_err();
    assert!(matches!(err, TopicError::EmptyVocabulary));
}

#[test]
fn all_candidates_failing_aggregates_every_failure() {
    let selector = ModelSelector::with_strategies(Box::new(FailingInference), fixed(&[]));
    let err = selector
        .sweep(&food_and_animals(), &SweepRange::new(2, 8, 3), &CancellationToken::new())
        .unwrap_err();
    match err {
        TopicError::AllCandidatesFailed { failures } => {
            let ks: Vec<usize> = failures.iter().map(|f| f.k).collect();
            assert_eq!(ks, vec![2, 5]);
            assert!(failures.iter().all(|f| f.kind == FailureKind::NumericInstability));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================
// Cancellation and parallelism
// ============================================================

#[test]
fn cancelled_before_start_returns_empty_partial_result() {
    let token = CancellationToken::new();
    token.cancel();
    let selector = ModelSelector::with_strategies(Box::new(quick_lda()), fixed(&[]));
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(2, 8, 3), &token)
        .unwrap();
    assert!(result.cancelled);
    assert!(result.candidates.is_empty());
    assert_eq!(result.optimal_k, None);
}

/// Cancels the sweep from inside the first fit; later candidates must not start.
struct CancelAfterFirst {
    inner: VariationalLda,
    token: CancellationToken,
}

impl InferenceStrategy for CancelAfterFirst {
    fn fit(&self, corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel> {
        let model = self.inner.fit(corpus, num_topics);
        self.token.cancel();
        model
    }
}

#[test]
fn cancellation_between_candidates_keeps_completed_work() {
    let token = CancellationToken::new();
    let selector = ModelSelector::with_strategies(
        Box::new(CancelAfterFirst {
            inner: quick_lda(),
            token: token.clone(),
        }),
        fixed(&[(2, 0.4)]),
    );
    let result = selector
        .sweep(&food_and_animals(), &SweepRange::new(2, 11, 3), &token)
        .unwrap();
    assert!(result.cancelled);
    assert_eq!(result.topic_counts(), vec![2]);
    assert_eq!(result.optimal_k, Some(2));
}

#[test]
fn parallel_sweep_matches_sequential() {
    let c = food_and_animals();
    let range = SweepRange::new(2, 6, 1);
    let mut config = AppConfig::default();
    config.lda.passes = 3;

    let sequential = ModelSelector::new(&config)
        .sweep(&c, &range, &CancellationToken::new())
        .unwrap();
    let parallel = ModelSelector::new(&config)
        .parallel(true)
        .sweep(&c, &range, &CancellationToken::new())
        .unwrap();

    assert_eq!(sequential.topic_counts(), parallel.topic_counts());
    for (a, b) in sequential.scores().iter().zip(parallel.scores()) {
        assert!((a - b).abs() < 1e-9);
    }
    assert_eq!(sequential.optimal_k, parallel.optimal_k);
}

// ============================================================
// Default pipeline
// ============================================================

#[test]
fn default_pipeline_selects_a_candidate() {
    let c = food_and_animals();
    let result = find_optimal_topics(&c, SweepRange::new(2, 8, 3)).unwrap();

    assert_eq!(result.topic_counts(), vec![2, 5]);
    assert!(!result.cancelled);
    let best = result.best().unwrap();
    assert!(best.score.is_finite());
    assert!(result.scores().iter().all(|s| *s <= best.score));

    let model = result.best_model().unwrap();
    assert_eq!(model.doc_topic().len(), c.len());
    assert_eq!(model.topic_coherence().map(<[f64]>::len), Some(model.num_topics()));
}

#[test]
fn report_serializes_every_candidate() {
    let result = find_optimal_topics(&food_and_animals(), SweepRange::new(2, 4, 1)).unwrap();
    let report = result.report(3);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["candidates"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["optimal_k"].as_u64().map(|k| k as usize), result.optimal_k);
    assert!(report.candidates.iter().all(|c| c.topics.iter().all(|t| t.words.len() <= 3)));
}
