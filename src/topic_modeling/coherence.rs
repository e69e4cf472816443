// C_v topic coherence.
//
// Word and pair probabilities come from boolean sliding windows over the
// reference texts. Each top word gets a context vector of NPMI values against
// the other top words of its topic, and the topic score is the mean cosine
// similarity between those vectors and the topic's mean context vector.
//
// Statistics are only gathered for tokens of the training vocabulary.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::vocabulary::{Vocabulary, WordId};
use super::CoherenceStrategy;
use crate::config::CoherenceConfig;
use crate::error::{Result, TopicError};
use crate::models::{Corpus, TrainedModel};

/// Smoothing added to joint probabilities so unseen pairs stay finite.
const EPSILON: f64 = 1e-12;

/// Window counts for the words that appear in some topic's top-N.
#[derive(Debug, Default)]
pub struct WindowStats {
    pub total_windows: u64,
    pub word_freq: HashMap<WordId, u64>,
    pub pair_freq: HashMap<(WordId, WordId), u64>,
}

impl WindowStats {
    /// Slide windows over every text that contains a relevant word.
    ///
    /// A text shorter than the window counts as one window. Out-of-vocabulary
    /// and irrelevant tokens occupy positions but are never counted.
    pub fn collect(
        texts: &Corpus,
        vocabulary: &Vocabulary,
        relevant: &HashSet<WordId>,
        window_size: usize,
    ) -> Self {
        let mut stats = WindowStats::default();
        let window_size = window_size.max(1);

        for text in texts {
            let positions: Vec<Option<WordId>> = vocabulary
                .lookup_positions(text)
                .into_iter()
                .map(|id| id.filter(|id| relevant.contains(id)))
                .collect();
            if positions.iter().all(Option::is_none) {
                continue;
            }

            if positions.len() <= window_size {
                stats.add_window(present_ids(positions.iter().flatten().copied()));
                continue;
            }

            let mut in_window: HashMap<WordId, usize> = HashMap::new();
            for id in positions[..window_size].iter().flatten() {
                *in_window.entry(*id).or_insert(0) += 1;
            }
            stats.add_window(present_ids(in_window.keys().copied()));

            for end in window_size..positions.len() {
                if let Some(leaving) = positions[end - window_size] {
                    if let Some(count) = in_window.get_mut(&leaving) {
                        *count -= 1;
                        if *count == 0 {
                            in_window.remove(&leaving);
                        }
                    }
                }
                if let Some(entering) = positions[end] {
                    *in_window.entry(entering).or_insert(0) += 1;
                }
                stats.add_window(present_ids(in_window.keys().copied()));
            }
        }

        stats
    }

    /// Add one window given its sorted, de-duplicated relevant ids.
    pub fn add_window(&mut self, ids: Vec<WordId>) {
        self.total_windows += 1;

        for &id in &ids {
            *self.word_freq.entry(id).or_insert(0) += 1;
        }
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                *self.pair_freq.entry((ids[i], ids[j])).or_insert(0) += 1;
            }
        }
    }

    pub fn probability(&self, id: WordId) -> f64 {
        if self.total_windows == 0 {
            return 0.0;
        }
        self.word_freq.get(&id).copied().unwrap_or(0) as f64 / self.total_windows as f64
    }

    pub fn joint_probability(&self, a: WordId, b: WordId) -> f64 {
        if a == b {
            return self.probability(a);
        }
        if self.total_windows == 0 {
            return 0.0;
        }
        let key = (a.min(b), a.max(b));
        self.pair_freq.get(&key).copied().unwrap_or(0) as f64 / self.total_windows as f64
    }

    /// Normalized pointwise mutual information, in [-1, 1].
    pub fn npmi(&self, a: WordId, b: WordId) -> f64 {
        let pa = self.probability(a);
        let pb = self.probability(b);
        if pa == 0.0 || pb == 0.0 {
            return 0.0;
        }
        let pab = self.joint_probability(a, b) + EPSILON;
        if pab >= 1.0 {
            return 1.0;
        }
        let pmi = (pab / (pa * pb)).ln();
        (pmi / -pab.ln()).clamp(-1.0, 1.0)
    }
}

fn present_ids(ids: impl Iterator<Item = WordId>) -> Vec<WordId> {
    let mut ids: Vec<WordId> = ids.collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Coherence of one topic given its top word ids.
pub fn topic_coherence(stats: &WindowStats, words: &[WordId]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }

    let context: Vec<Vec<f64>> = words
        .iter()
        .map(|&a| words.iter().map(|&b| stats.npmi(a, b)).collect())
        .collect();

    let n = words.len() as f64;
    let topic_vector: Vec<f64> = (0..words.len())
        .map(|j| context.iter().map(|row| row[j]).sum::<f64>() / n)
        .collect();

    context
        .iter()
        .map(|row| cosine_similarity(row, &topic_vector))
        .sum::<f64>()
        / n
}

pub struct CvCoherence {
    config: CoherenceConfig,
}

impl CvCoherence {
    pub fn new(config: CoherenceConfig) -> Self {
        CvCoherence { config }
    }
}

impl CoherenceStrategy for CvCoherence {
    fn topic_scores(&self, model: &TrainedModel, texts: &Corpus) -> Result<Vec<f64>> {
        let k = model.num_topics();

        // Step 1: Top-N words per topic
        let top_words: Vec<Vec<WordId>> = (0..k)
            .map(|topic| {
                model
                    .top_word_ids(topic, self.config.top_n)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect()
            })
            .collect();
        let relevant: HashSet<WordId> = top_words.iter().flatten().copied().collect();

        // Step 2: Window co-occurrence statistics
        let stats = WindowStats::collect(texts, model.vocabulary(), &relevant, self.config.window_size);
        debug!(
            k,
            windows = stats.total_windows,
            relevant = relevant.len(),
            "co-occurrence statistics collected"
        );

        // Steps 3-5: NPMI context vectors and cosine similarity per topic
        let scores: Vec<f64> = top_words
            .iter()
            .map(|words| topic_coherence(&stats, words))
            .collect();
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(TopicError::NumericInstability { k, stage: "coherence" });
        }
        Ok(scores)
    }
}
