// Error types for topic-sweep.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure category, reported alongside the offending K.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    EmptyVocabulary,
    EmptyCorpus,
    InvalidTopicCount,
    InvalidRange,
    NumericInstability,
    AllCandidatesFailed,
    Config,
    Io,
}

/// A single sweep candidate that could not be fitted or scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub k: usize,
    pub kind: FailureKind,
    pub reason: String,
}

/// Top-level error type for topic modeling operations.
#[derive(Debug, Error)]
pub enum TopicError {
    /// The corpus holds no tokens at all.
    #[error("vocabulary is empty: corpus contains no tokens")]
    EmptyVocabulary,

    /// The corpus holds zero documents.
    #[error("corpus contains no documents")]
    EmptyCorpus,

    /// A fit was requested with fewer than one topic.
    #[error("invalid topic count {k}: at least one topic is required")]
    InvalidTopicCount { k: usize },

    /// The sweep range yields no candidates.
    #[error("topic range start={start} limit={limit} step={step} yields no candidates")]
    InvalidRange { start: usize, limit: usize, step: usize },

    /// A non-finite value showed up during inference or scoring.
    #[error("non-finite value during {stage} (k={k})")]
    NumericInstability { k: usize, stage: &'static str },

    /// Every candidate of a sweep failed.
    #[error("all {} sweep candidates failed: {}", .failures.len(), summarize(.failures))]
    AllCandidatesFailed { failures: Vec<CandidateFailure> },

    /// Configuration-related errors.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TopicError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TopicError::EmptyVocabulary => FailureKind::EmptyVocabulary,
            TopicError::EmptyCorpus => FailureKind::EmptyCorpus,
            TopicError::InvalidTopicCount { .. } => FailureKind::InvalidTopicCount,
            TopicError::InvalidRange { .. } => FailureKind::InvalidRange,
            TopicError::NumericInstability { .. } => FailureKind::NumericInstability,
            TopicError::AllCandidatesFailed { .. } => FailureKind::AllCandidatesFailed,
            TopicError::Config(_) => FailureKind::Config,
            TopicError::Io(_) | TopicError::Json(_) => FailureKind::Io,
        }
    }

    /// Convert into a per-candidate failure record for the sweep ledger.
    pub fn into_candidate_failure(self, k: usize) -> CandidateFailure {
        CandidateFailure {
            k,
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

fn summarize(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("k={} ({:?}: {})", f.k, f.kind, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for topic modeling operations.
pub type Result<T> = std::result::Result<T, TopicError>;
