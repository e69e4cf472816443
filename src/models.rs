use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DocTopicPrior;
use crate::error::{CandidateFailure, Result, TopicError};
use crate::topic_modeling::lda::{self, dirichlet_expectation_exp};
use crate::topic_modeling::vocabulary::{EncodedCorpus, Vocabulary, WordId};

/// One document: the ordered labels of a single image.
pub type Document = Vec<String>;

/// Ordered collection of documents. The index of a document is its identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    documents: Vec<Document>,
}

impl Corpus {
    pub fn new(documents: Vec<Document>) -> Self {
        Corpus { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

impl From<Vec<Vec<String>>> for Corpus {
    fn from(documents: Vec<Vec<String>>) -> Self {
        Corpus::new(documents)
    }
}

impl<'a> IntoIterator for &'a Corpus {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// Sparse token counts for one document, sorted by word id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagOfWords {
    entries: Vec<(WordId, usize)>,
}

impl BagOfWords {
    pub(crate) fn from_sorted(entries: Vec<(WordId, usize)>) -> Self {
        BagOfWords { entries }
    }

    pub fn entries(&self) -> &[(WordId, usize)] {
        &self.entries
    }

    pub fn count(&self, id: WordId) -> usize {
        self.entries
            .binary_search_by_key(&id, |&(w, _)| w)
            .map(|i| self.entries[i].1)
            .unwrap_or(0)
    }

    /// Total token occurrences.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|&(_, c)| c).sum()
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub num_topics: usize,
    pub alpha_mode: DocTopicPrior,
    pub alpha: Vec<f64>, // Final per-topic prior (learned when alpha_mode is Auto)
    pub eta: f64,
    pub passes: usize,
    pub iterations: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub seed: u64,
    pub passes_run: usize,
    pub converged: bool, // Stopped early on the log-likelihood threshold
    pub per_word_log_likelihood: f64,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeledTopic {
    pub id: usize,
    pub words: Vec<(String, f64)>, // Word and its probability in this topic
    pub documents: Vec<usize>,     // Documents whose primary topic this is
    pub coherence_score: Option<f64>,
}

/// A fitted K-topic model.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub(crate) vocabulary: Arc<Vocabulary>,
    pub(crate) lambda: Vec<Vec<f64>>,            // Topics x Words variational parameters
    pub(crate) topic_word: Vec<Vec<f64>>,        // Topics x Words
    pub(crate) doc_topic: Vec<Vec<f64>>,         // Documents x Topics
    pub(crate) word_topics: Vec<Vec<(WordId, usize)>>, // Per document: word -> most likely topic
    pub(crate) topic_coherence: Option<Vec<f64>>,
    pub hyperparameters: Hyperparameters,
    pub provenance: Provenance,
}

impl TrainedModel {
    pub fn num_topics(&self) -> usize {
        self.hyperparameters.num_topics
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    pub fn topic_word(&self) -> &[Vec<f64>] {
        &self.topic_word
    }

    pub fn doc_topic(&self) -> &[Vec<f64>] {
        &self.doc_topic
    }

    /// Most likely topic for each distinct word of a training document.
    pub fn word_topics(&self, doc: usize) -> Option<&[(WordId, usize)]> {
        self.word_topics.get(doc).map(Vec::as_slice)
    }

    pub fn topic_coherence(&self) -> Option<&[f64]> {
        self.topic_coherence.as_deref()
    }

    pub(crate) fn set_topic_coherence(&mut self, scores: Vec<f64>) {
        self.topic_coherence = Some(scores);
    }

    /// Top word ids of a topic by descending probability, ties broken by lower id.
    /// Only words with non-zero mass are returned.
    pub fn top_word_ids(&self, topic: usize, n: usize) -> Vec<(WordId, f64)> {
        let Some(row) = self.topic_word.get(topic) else {
            return Vec::new();
        };
        let mut ranked: Vec<(WordId, f64)> = row
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, p)| p > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub fn top_words(&self, topic: usize, n: usize) -> Vec<(String, f64)> {
        self.top_word_ids(topic, n)
            .into_iter()
            .filter_map(|(id, p)| self.vocabulary.token(id).map(|t| (t.to_string(), p)))
            .collect()
    }

    /// Render a topic as `0.250*"cat" + 0.125*"dog"`.
    pub fn format_topic(&self, topic: usize, n: usize) -> String {
        self.top_words(topic, n)
            .iter()
            .map(|(word, p)| format!("{p:.3}*\"{word}\""))
            .collect::<Vec<_>>()
            .join(" + ")
    }

    pub fn primary_topic(&self, doc: usize) -> Option<usize> {
        let probs = self.doc_topic.get(doc)?;
        probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
    }

    /// Topic summaries with their top words and primarily-assigned documents.
    pub fn topics(&self, top_n: usize) -> Vec<ModeledTopic> {
        (0..self.num_topics())
            .map(|topic_id| {
                let documents = (0..self.doc_topic.len())
                    .filter(|&doc| self.primary_topic(doc) == Some(topic_id))
                    .collect();
                ModeledTopic {
                    id: topic_id,
                    words: self.top_words(topic_id, top_n),
                    documents,
                    coherence_score: self
                        .topic_coherence
                        .as_ref()
                        .and_then(|scores| scores.get(topic_id).copied()),
                }
            })
            .collect()
    }

    /// Topic distribution of an unseen document, holding the topics fixed.
    pub fn infer(&self, bow: &BagOfWords) -> Result<Vec<f64>> {
        self.infer_against(bow, &self.exp_elog_beta())
    }

    fn exp_elog_beta(&self) -> Vec<Vec<f64>> {
        self.lambda.iter().map(|row| dirichlet_expectation_exp(row)).collect()
    }

    fn infer_against(&self, bow: &BagOfWords, exp_elog_beta: &[Vec<f64>]) -> Result<Vec<f64>> {
        let k = self.num_topics();
        let posterior = lda::infer_document(
            bow,
            exp_elog_beta,
            &self.hyperparameters.alpha,
            vec![1.0; k],
            self.hyperparameters.iterations,
            lda::GAMMA_THRESHOLD,
        );
        let theta = lda::normalize(&posterior.gamma);
        if theta.iter().any(|p| !p.is_finite()) {
            return Err(TopicError::NumericInstability {
                k,
                stage: "held-out inference",
            });
        }
        Ok(theta)
    }

    /// Encode and infer a raw token document; out-of-vocabulary tokens are dropped.
    pub fn infer_tokens(&self, document: &Document) -> Result<Vec<f64>> {
        self.infer(&self.vocabulary.encode(document))
    }

    /// Per-word log-likelihood of a corpus under the point estimates of this model.
    /// Its negation, exponentiated, is the perplexity.
    pub fn log_perplexity(&self, corpus: &EncodedCorpus) -> Result<f64> {
        let exp_elog_beta = self.exp_elog_beta();
        let thetas = corpus
            .documents()
            .iter()
            .map(|bow| self.infer_against(bow, &exp_elog_beta))
            .collect::<Result<Vec<_>>>()?;
        let bound = lda::per_word_log_likelihood(corpus.documents(), &thetas, &self.topic_word);
        if !bound.is_finite() {
            return Err(TopicError::NumericInstability {
                k: self.num_topics(),
                stage: "log perplexity",
            });
        }
        Ok(bound)
    }
}

/// Outcome of one sweep candidate.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub k: usize,
    pub model: Option<TrainedModel>,
    pub score: f64, // Negative infinity when the candidate failed
    pub failure: Option<CandidateFailure>,
}

impl CandidateOutcome {
    pub fn is_valid(&self) -> bool {
        self.failure.is_none() && self.model.is_some()
    }
}

/// Every candidate tried by a sweep, in ascending K, plus the selected K.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub candidates: Vec<CandidateOutcome>,
    pub optimal_k: Option<usize>,
    pub cancelled: bool,
}

impl SearchResult {
    pub fn topic_counts(&self) -> Vec<usize> {
        self.candidates.iter().map(|c| c.k).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.candidates.iter().map(|c| c.score).collect()
    }

    pub fn models(&self) -> Vec<Option<&TrainedModel>> {
        self.candidates.iter().map(|c| c.model.as_ref()).collect()
    }

    pub fn failures(&self) -> Vec<&CandidateFailure> {
        self.candidates.iter().filter_map(|c| c.failure.as_ref()).collect()
    }

    pub fn best(&self) -> Option<&CandidateOutcome> {
        let k = self.optimal_k?;
        self.candidates.iter().find(|c| c.k == k)
    }

    pub fn best_model(&self) -> Option<&TrainedModel> {
        self.best().and_then(|c| c.model.as_ref())
    }

    /// Serializable summary for export.
    pub fn report(&self, top_n: usize) -> SearchReport {
        SearchReport {
            optimal_k: self.optimal_k,
            cancelled: self.cancelled,
            candidates: self
                .candidates
                .iter()
                .map(|c| CandidateReport {
                    k: c.k,
                    score: c.score.is_finite().then_some(c.score),
                    failure: c.failure.clone(),
                    passes_run: c.model.as_ref().map(|m| m.provenance.passes_run),
                    topics: c.model.as_ref().map(|m| m.topics(top_n)).unwrap_or_default(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub optimal_k: Option<usize>,
    pub cancelled: bool,
    pub candidates: Vec<CandidateReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    pub k: usize,
    pub score: Option<f64>, // None when the candidate failed
    pub failure: Option<CandidateFailure>,
    pub passes_run: Option<usize>,
    pub topics: Vec<ModeledTopic>,
}
