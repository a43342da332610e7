//! Core types shared by the segment writer and reader

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Per-segment metadata, persisted as `meta.json`.
///
/// Writing this file is the segment commit: readers treat a directory
/// without it as absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Documents in this segment
    pub num_docs: u32,
    /// First global doc id covered by this segment
    pub base_doc_id: u32,
    /// Sum of document lengths, for avgdl maintenance
    pub total_length: u64,
}

/// Index-level metadata, persisted as `index.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Segment directory names in base_doc_id order
    pub segments: Vec<String>,
    /// Total documents across all segments
    pub total_docs: u32,
    /// Average document length across all segments
    pub avgdl: f32,
}

impl IndexMeta {
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
            total_docs: 0,
            avgdl: 0.0,
        }
    }

    /// Fold a freshly committed segment into the index metadata,
    /// recomputing avgdl from the length-weighted sums.
    pub fn push_segment(&mut self, name: String, meta: &SegmentMeta) {
        let old_total_length = self.avgdl as f64 * self.total_docs as f64;
        self.segments.push(name);
        self.total_docs += meta.num_docs;
        if self.total_docs > 0 {
            self.avgdl =
                ((old_total_length + meta.total_length as f64) / self.total_docs as f64) as f32;
        }
    }
}

/// One analyzed document ready for segment writing: its external book id
/// and, per chunk, the token count and term frequency map.
pub struct ProcessedDoc {
    pub book_id: String,
    pub chunks: Vec<(u32, HashMap<String, u32>)>,
}

/// One unit of work for the segment writer thread.
pub struct BatchData {
    pub segment_id: usize,
    pub segment_dir: PathBuf,
    pub docs: Vec<ProcessedDoc>,
    pub base_doc_id: u32,
}
