// topic-sweep: topic discovery over image label sets.
//
// Builds a bag-of-words corpus, fits LDA models by variational Bayes for a
// range of topic counts, scores each with C_v coherence and keeps the most
// coherent one.

pub mod config;
pub mod error;
pub mod labels;
pub mod models;
pub mod topic_modeling;

pub use config::{AppConfig, CoherenceConfig, DocTopicPrior, LdaConfig, SweepConfig};
pub use error::{CandidateFailure, FailureKind, Result, TopicError};
pub use labels::LabeledImages;
pub use models::{BagOfWords, CandidateOutcome, Corpus, Document, SearchResult, TrainedModel};
pub use topic_modeling::{
    find_optimal_topics, CancellationToken, CoherenceStrategy, CvCoherence, EncodedCorpus,
    InferenceStrategy, ModelSelector, SweepRange, VariationalLda, Vocabulary,
};
