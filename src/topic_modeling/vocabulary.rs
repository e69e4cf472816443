use std::collections::HashMap;
use std::sync::Arc;

use counter::Counter;

use crate::error::{Result, TopicError};
use crate::models::{BagOfWords, Corpus, Document};

pub type WordId = usize;

/// Bijective token <-> id mapping built once from a corpus.
///
/// Ids are assigned in first-occurrence order, scanning documents in corpus
/// order and tokens in document order, so they are contiguous in `[0, len)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    token_to_id: HashMap<String, WordId>,
    document_frequency: Vec<usize>,   // # documents containing the token
    collection_frequency: Vec<usize>, // # occurrences across the corpus
}

impl Vocabulary {
    pub fn build(corpus: &Corpus) -> Result<Self> {
        let mut tokens: Vec<String> = Vec::new();
        let mut token_to_id: HashMap<String, WordId> = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        let mut collection_frequency: Vec<usize> = Vec::new();

        for doc in corpus.iter() {
            let mut seen_in_doc: Vec<WordId> = Vec::new();
            for token in doc {
                let id = match token_to_id.get(token) {
                    Some(&id) => id,
                    None => {
                        let id = tokens.len();
                        tokens.push(token.clone());
                        token_to_id.insert(token.clone(), id);
                        document_frequency.push(0);
                        collection_frequency.push(0);
                        id
                    }
                };
                collection_frequency[id] += 1;
                seen_in_doc.push(id);
            }
            seen_in_doc.sort_unstable();
            seen_in_doc.dedup();
            for id in seen_in_doc {
                document_frequency[id] += 1;
            }
        }

        if tokens.is_empty() {
            return Err(TopicError::EmptyVocabulary);
        }

        Ok(Vocabulary {
            tokens,
            token_to_id,
            document_frequency,
            collection_frequency,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<WordId> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: WordId) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    /// Tokens in id order.
    pub fn iter(&self) -> impl Iterator<Item = (WordId, &str)> {
        self.tokens.iter().enumerate().map(|(id, t)| (id, t.as_str()))
    }

    pub fn document_frequency(&self, id: WordId) -> usize {
        self.document_frequency.get(id).copied().unwrap_or(0)
    }

    pub fn collection_frequency(&self, id: WordId) -> usize {
        self.collection_frequency.get(id).copied().unwrap_or(0)
    }

    /// The `n` tokens found in the most documents, ties broken by total
    /// occurrences and then by id.
    pub fn most_frequent(&self, n: usize) -> Vec<WordId> {
        let mut ids: Vec<WordId> = (0..self.len()).collect();
        ids.sort_by(|&a, &b| {
            self.document_frequency[b]
                .cmp(&self.document_frequency[a])
                .then(self.collection_frequency[b].cmp(&self.collection_frequency[a]))
                .then(a.cmp(&b))
        });
        ids.truncate(n);
        ids
    }

    /// Encode a document as sparse token counts. Out-of-vocabulary tokens are dropped.
    pub fn encode(&self, document: &Document) -> BagOfWords {
        let counts: Counter<WordId> = document
            .iter()
            .filter_map(|token| self.id(token))
            .collect();

        let mut entries: Vec<(WordId, usize)> = counts.into_iter().collect();
        entries.sort_unstable_by_key(|&(id, _)| id);
        BagOfWords::from_sorted(entries)
    }

    /// Map tokens to ids, keeping a `None` placeholder for out-of-vocabulary tokens
    /// so that positional windows stay aligned with the source document.
    pub fn lookup_positions(&self, document: &Document) -> Vec<Option<WordId>> {
        document.iter().map(|token| self.id(token)).collect()
    }
}

/// A corpus encoded against a shared, read-only vocabulary.
#[derive(Debug, Clone)]
pub struct EncodedCorpus {
    vocabulary: Arc<Vocabulary>,
    documents: Vec<BagOfWords>,
}

impl EncodedCorpus {
    pub fn encode(corpus: &Corpus, vocabulary: Arc<Vocabulary>) -> Self {
        let documents = corpus.iter().map(|doc| vocabulary.encode(doc)).collect();
        EncodedCorpus {
            vocabulary,
            documents,
        }
    }

    /// Build the vocabulary and encode in one step.
    pub fn from_corpus(corpus: &Corpus) -> Result<Self> {
        let vocabulary = Arc::new(Vocabulary::build(corpus)?);
        Ok(Self::encode(corpus, vocabulary))
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    pub fn documents(&self) -> &[BagOfWords] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn num_tokens(&self) -> usize {
        self.documents.iter().map(BagOfWords::total).sum()
    }
}
