//! Uncompressed in-memory index for recently added documents
//!
//! Serves documents that have not yet been sealed into a segment. Its
//! doc-id range starts where the on-disk segments end and stays disjoint
//! from them; `clear` keeps `next_doc_id` so ids never collide with a
//! segment flushed from here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analysis::analyze;
use crate::config::Bm25Params;

/// A document held in RAM and mirrored to the WAL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: u32,
    pub content: String,
    /// Opaque caller blob; never parsed here
    pub metadata: String,
    /// Token count, cached for scoring
    pub length: u32,
}

pub struct RamIndex {
    inverted_index: HashMap<String, Vec<(u32, u32)>>,
    docs: HashMap<u32, Document>,
    next_doc_id: u32,
    total_length: u64,
    params: Bm25Params,
}

impl RamIndex {
    pub fn new(start_doc_id: u32) -> Self {
        Self {
            inverted_index: HashMap::new(),
            docs: HashMap::new(),
            next_doc_id: start_doc_id,
            total_length: 0,
            params: Bm25Params::default(),
        }
    }

    /// Analyze and insert a document, assigning the next doc id.
    pub fn insert(&mut self, content: String, metadata: String) -> u32 {
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;

        let tokens = analyze(&content);
        let length = tokens.len() as u32;
        self.total_length += length as u64;

        self.docs.insert(
            doc_id,
            Document {
                id: doc_id,
                content,
                metadata,
                length,
            },
        );

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *term_freqs.entry(token).or_insert(0) += 1;
        }
        for (term, tf) in term_freqs {
            self.inverted_index
                .entry(term)
                .or_default()
                .push((doc_id, tf));
        }

        doc_id
    }

    /// BM25 search against this index's own document count and avgdl.
    pub fn search(&self, query: &str) -> Vec<(u32, f32)> {
        let tokens = analyze(query);
        if tokens.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let num_docs = self.docs.len() as u32;
        let avgdl = self.total_length as f32 / num_docs as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for token in tokens {
            let Some(postings) = self.inverted_index.get(&token) else {
                continue;
            };
            let idf = self.params.idf(postings.len() as u32, num_docs);

            for &(doc_id, tf) in postings {
                // The inverted index is built from docs, so the entry exists.
                let doc_len = self.docs[&doc_id].length as f32;
                let score = self.params.score(tf as f32, doc_len, avgdl, idf);
                *scores.entry(doc_id).or_insert(0.0) += score;
            }
        }

        let mut results: Vec<_> = scores.into_iter().collect();
        results.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results
    }

    /// Drop all documents but keep `next_doc_id` moving forward.
    pub fn clear(&mut self) {
        self.inverted_index.clear();
        self.docs.clear();
        self.total_length = 0;
    }

    pub fn num_docs(&self) -> u32 {
        self.docs.len() as u32
    }

    pub fn next_doc_id(&self) -> u32 {
        self.next_doc_id
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, doc_id: u32) -> Option<&Document> {
        self.docs.get(&doc_id)
    }

    /// Documents in ascending doc-id order, for sealing into a segment.
    pub fn docs_ordered(&self) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self.docs.values().collect();
        docs.sort_unstable_by_key(|d| d.id);
        docs
    }
}
