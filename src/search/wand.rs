//! WAND top-k search over materialized posting lists
//!
//! Each query term carries an upper-bound contribution, the BM25 limit
//! as tf grows without bound. Candidates are visited in descending
//! summed-upper-bound order; once the heap holds top_k results and the
//! next candidate's bound cannot beat the heap minimum, no later
//! candidate can either, so scoring stops.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::codecs::decode_postings;
use crate::config::Bm25Params;

struct TermInfo {
    idf: f32,
    upper_bound: f32,
    postings: HashMap<u32, u32>,
}

#[derive(Clone, Copy)]
struct ScoredDoc {
    doc_id: u32,
    score: f32,
}

impl PartialEq for ScoredDoc {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the BinaryHeap pops its minimum-scored entry.
impl Ord for ScoredDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
    }
}

pub struct WandSearcher {
    num_docs: u32,
    avgdl: f32,
    params: Bm25Params,
}

impl WandSearcher {
    pub fn new(num_docs: u32, avgdl: f32) -> Self {
        Self {
            num_docs,
            avgdl,
            params: Bm25Params::default(),
        }
    }

    pub fn with_params(mut self, params: Bm25Params) -> Self {
        self.params = params;
        self
    }

    /// Top-k over fully materialized posting lists. Each entry pairs a
    /// term's document frequency with its varint-encoded postings (the
    /// [`crate::codecs::encode_postings`] format). Returns `(doc_id,
    /// score)` in descending score order; the set equals exhaustive
    /// scoring's top-k.
    pub fn search(&self, posting_data: Vec<(u32, Vec<u8>)>, top_k: usize) -> Vec<(u32, f32)> {
        if posting_data.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut terms: Vec<TermInfo> = posting_data
            .into_iter()
            .map(|(df, data)| {
                let idf = self.params.idf(df, self.num_docs);
                TermInfo {
                    idf,
                    upper_bound: self.params.upper_bound(idf),
                    postings: decode_postings(&data).into_iter().collect(),
                }
            })
            .collect();

        // Rarest first, so intersection shrinks the candidate set fastest.
        terms.sort_by_key(|t| t.postings.len());

        let candidates = self.collect_candidates(&terms, top_k);
        let doc_lengths = self.estimate_doc_lengths(&terms, &candidates);

        let mut ranked: Vec<(f32, u32)> = candidates
            .iter()
            .map(|&doc_id| {
                let upper: f32 = terms
                    .iter()
                    .filter(|t| t.postings.contains_key(&doc_id))
                    .map(|t| t.upper_bound)
                    .sum();
                (upper, doc_id)
            })
            .collect();
        ranked.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        self.score_until_threshold(&terms, ranked, &doc_lengths, top_k)
    }

    /// Candidate collection by progressive intersection: keep
    /// intersecting while the running set stays at or above `2·top_k`,
    /// else fall back to the union built so far.
    fn collect_candidates(&self, terms: &[TermInfo], top_k: usize) -> HashSet<u32> {
        let mut candidates: HashSet<u32> = terms[0].postings.keys().copied().collect();
        if terms.len() == 1 || candidates.len() <= top_k * 5 {
            return candidates;
        }

        for term in &terms[1..] {
            let intersection: HashSet<u32> = candidates
                .iter()
                .filter(|doc_id| term.postings.contains_key(doc_id))
                .copied()
                .collect();

            if intersection.len() >= top_k * 2 {
                candidates = intersection;
            }
            if candidates.len() <= top_k * 5 {
                break;
            }
        }
        candidates
    }

    /// Posting lists carry no stored lengths here, so approximate each
    /// candidate's length by its tf sum, floored to avgdl when the sum is
    /// implausibly small.
    fn estimate_doc_lengths(
        &self,
        terms: &[TermInfo],
        candidates: &HashSet<u32>,
    ) -> HashMap<u32, u32> {
        let mut doc_lengths: HashMap<u32, u32> = HashMap::new();
        for term in terms {
            for (&doc_id, &tf) in &term.postings {
                if candidates.contains(&doc_id) {
                    *doc_lengths.entry(doc_id).or_insert(0) += tf;
                }
            }
        }

        let min_len = (self.avgdl * 0.5) as u32;
        for len in doc_lengths.values_mut() {
            if *len < min_len {
                *len = self.avgdl as u32;
            }
        }
        doc_lengths
    }

    fn score_until_threshold(
        &self,
        terms: &[TermInfo],
        ranked: Vec<(f32, u32)>,
        doc_lengths: &HashMap<u32, u32>,
        top_k: usize,
    ) -> Vec<(u32, f32)> {
        let mut heap: BinaryHeap<ScoredDoc> = BinaryHeap::with_capacity(top_k + 1);
        let mut threshold = 0.0f32;

        for (upper, doc_id) in ranked {
            if heap.len() >= top_k && upper <= threshold {
                break;
            }

            let Some(&doc_len) = doc_lengths.get(&doc_id) else {
                continue;
            };

            let score: f32 = terms
                .iter()
                .filter_map(|term| {
                    term.postings.get(&doc_id).map(|&tf| {
                        self.params
                            .score(tf as f32, doc_len as f32, self.avgdl, term.idf)
                    })
                })
                .sum();

            if heap.len() < top_k {
                heap.push(ScoredDoc { doc_id, score });
                if heap.len() == top_k {
                    threshold = heap.peek().map(|d| d.score).unwrap_or(0.0);
                }
            } else if score > threshold {
                heap.pop();
                heap.push(ScoredDoc { doc_id, score });
                threshold = heap.peek().map(|d| d.score).unwrap_or(0.0);
            }
        }

        let mut results: Vec<(u32, f32)> = heap.into_iter().map(|d| (d.doc_id, d.score)).collect();
        results.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        results
    }

    /// Exhaustive scoring over the same inputs; the reference the WAND
    /// path must agree with.
    pub fn search_exhaustive(
        &self,
        posting_data: Vec<(u32, Vec<u8>)>,
        top_k: usize,
    ) -> Vec<(u32, f32)> {
        if posting_data.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let terms: Vec<TermInfo> = posting_data
            .into_iter()
            .map(|(df, data)| {
                let idf = self.params.idf(df, self.num_docs);
                TermInfo {
                    idf,
                    upper_bound: self.params.upper_bound(idf),
                    postings: decode_postings(&data).into_iter().collect(),
                }
            })
            .collect();

        let all_docs: HashSet<u32> = terms
            .iter()
            .flat_map(|t| t.postings.keys().copied())
            .collect();
        let doc_lengths = self.estimate_doc_lengths(&terms, &all_docs);

        let mut results: Vec<(u32, f32)> = all_docs
            .into_iter()
            .map(|doc_id| {
                let doc_len = doc_lengths[&doc_id] as f32;
                let score = terms
                    .iter()
                    .filter_map(|term| {
                        term.postings
                            .get(&doc_id)
                            .map(|&tf| self.params.score(tf as f32, doc_len, self.avgdl, term.idf))
                    })
                    .sum();
                (doc_id, score)
            })
            .collect();
        results.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        results.truncate(top_k);
        results
    }
}
