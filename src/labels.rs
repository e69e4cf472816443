// Loading label sets produced by the image-labeling collaborator.
//
// Two JSON shapes are accepted: an object mapping image path to its label list
// (iterated in sorted path order so document indices are stable), or a bare
// array of label lists.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::models::Corpus;

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    ByImage(BTreeMap<String, Vec<String>>),
    Documents(Vec<Vec<String>>),
}

/// Labeled images: one document per image, with the image identifier kept alongside.
#[derive(Debug, Clone)]
pub struct LabeledImages {
    pub images: Vec<String>, // Image path, or the document index when none was given
    pub corpus: Corpus,
}

impl LabeledImages {
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: LabelFile = serde_json::from_str(raw)?;
        let (images, documents): (Vec<String>, Vec<Vec<String>>) = match parsed {
            LabelFile::ByImage(map) => map.into_iter().unzip(),
            LabelFile::Documents(docs) => {
                let images = (0..docs.len()).map(|i| i.to_string()).collect();
                (images, docs)
            }
        };
        Ok(LabeledImages {
            images,
            corpus: Corpus::new(documents),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
