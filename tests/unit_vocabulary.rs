// Unit tests for vocabulary construction and bag-of-words encoding.

use std::collections::HashSet;
use std::sync::Arc;

use topic_sweep::{Corpus, EncodedCorpus, TopicError, Vocabulary};

fn corpus(docs: &[&[&str]]) -> Corpus {
    Corpus::new(
        docs.iter()
            .map(|d| d.iter().map(|t| t.to_string()).collect())
            .collect(),
    )
}

// ============================================================
// Vocabulary ids
// ============================================================

#[test]
fn ids_are_contiguous_and_bijective() {
    let c = corpus(&[
        &["Food", "Tableware", "Dish", "Food"],
        &[],
        &["Cuisine", "Dish", "Ingredient"],
        &["Tableware", "Plate"],
    ]);
    let vocab = Vocabulary::build(&c).unwrap();

    let unique: HashSet<&String> = c.iter().flatten().collect();
    assert_eq!(vocab.len(), unique.len());

    let ids: HashSet<usize> = unique.iter().map(|t| vocab.id(t).unwrap()).collect();
    assert_eq!(ids, (0..vocab.len()).collect::<HashSet<usize>>());

    for (id, token) in vocab.iter() {
        assert_eq!(vocab.id(token), Some(id));
        assert_eq!(vocab.token(id), Some(token));
    }
}

#[test]
fn scenario_first_occurrence_ids() {
    let c = corpus(&[&["cat", "cat", "dog"], &["dog", "fish"]]);
    let vocab = Vocabulary::build(&c).unwrap();
    assert_eq!(vocab.id("cat"), Some(0));
    assert_eq!(vocab.id("dog"), Some(1));
    assert_eq!(vocab.id("fish"), Some(2));

    let encoded = EncodedCorpus::encode(&c, Arc::new(vocab));
    assert_eq!(encoded.documents()[0].entries(), &[(0, 2), (1, 1)]);
    assert_eq!(encoded.documents()[1].entries(), &[(1, 1), (2, 1)]);
    assert_eq!(encoded.num_tokens(), 5);
}

#[test]
fn empty_corpus_has_no_vocabulary() {
    assert!(matches!(
        Vocabulary::build(&Corpus::default()),
        Err(TopicError::EmptyVocabulary)
    ));
    assert!(matches!(
        EncodedCorpus::from_corpus(&corpus(&[&[], &[]])),
        Err(TopicError::EmptyVocabulary)
    ));
}

// ============================================================
// Encoding
// ============================================================

#[test]
fn counts_sum_to_document_length() {
    let c = corpus(&[&["a", "b", "a", "c", "a"], &["c", "c"], &[]]);
    let vocab = Vocabulary::build(&c).unwrap();
    for doc in c.iter() {
        assert_eq!(vocab.encode(doc).total(), doc.len());
    }
}

#[test]
fn out_of_vocabulary_tokens_are_dropped() {
    let vocab = Vocabulary::build(&corpus(&[&["a", "b"]])).unwrap();
    let held_out: Vec<String> = ["a", "unseen", "a", "also-unseen"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let bow = vocab.encode(&held_out);
    assert_eq!(bow.entries(), &[(0, 2)]);
    assert_eq!(bow.count(1), 0);
    assert_eq!(bow.total(), 2);
}

#[test]
fn fully_unknown_document_encodes_empty() {
    let vocab = Vocabulary::build(&corpus(&[&["a"]])).unwrap();
    let bow = vocab.encode(&vec!["zzz".to_string()]);
    assert!(bow.is_empty());
}
