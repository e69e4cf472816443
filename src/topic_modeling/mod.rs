// Topic modeling: vocabulary, LDA inference, coherence scoring and K selection.
//
// The selector only talks to the two traits below, so the numerical methods
// can be swapped without touching the selection logic.

pub mod coherence;
pub mod lda;
pub mod selection;
mod special;
pub mod vocabulary;

pub use coherence::CvCoherence;
pub use lda::VariationalLda;
pub use selection::{find_optimal_topics, CancellationToken, ModelSelector, SweepRange};
pub use vocabulary::{EncodedCorpus, Vocabulary, WordId};

use crate::error::Result;
use crate::models::{Corpus, TrainedModel};

/// Fits a K-topic model to an encoded corpus.
pub trait InferenceStrategy: Send + Sync {
    fn fit(&self, corpus: &EncodedCorpus, num_topics: usize) -> Result<TrainedModel>;
}

/// Rates the interpretability of a fitted model against reference texts.
pub trait CoherenceStrategy: Send + Sync {
    /// One coherence value per topic.
    fn topic_scores(&self, model: &TrainedModel, texts: &Corpus) -> Result<Vec<f64>>;

    /// Combine topic coherences into the model coherence. Defaults to the mean.
    fn aggregate(&self, topic_scores: &[f64]) -> f64 {
        if topic_scores.is_empty() {
            return 0.0;
        }
        topic_scores.iter().sum::<f64>() / topic_scores.len() as f64
    }

    fn score(&self, model: &TrainedModel, texts: &Corpus) -> Result<f64> {
        Ok(self.aggregate(&self.topic_scores(model, texts)?))
    }
}
