use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// BM25 scoring parameters, shared by the file searcher and the RAM index
/// so that scores from both can be summed directly.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter
    pub k1: f32,
    /// Length normalization parameter
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    /// Robertson-Sparck-Jones IDF.
    pub fn idf(&self, df: u32, total_docs: u32) -> f32 {
        let n = total_docs as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score one term occurrence.
    pub fn score(&self, tf: f32, doc_len: f32, avgdl: f32, idf: f32) -> f32 {
        let numerator = tf * (self.k1 + 1.0);
        let denominator = tf + self.k1 * (1.0 - self.b + self.b * doc_len / avgdl);
        idf * numerator / denominator
    }

    /// Upper bound on the score of a single term occurrence, reached as
    /// `tf → ∞` with the shortest possible document.
    pub fn upper_bound(&self, idf: f32) -> f32 {
        idf * (self.k1 + 1.0)
    }
}

/// WAL durability level for the real-time indexer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalDurability {
    /// Flush each record to the OS page cache (survives process crash)
    #[default]
    OsBuffer,
    /// Additionally fsync after each append (survives power loss)
    Fsync,
}

/// Indexing pipeline configuration
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in characters
    pub chunk_overlap: usize,
    /// Documents per segment batch
    pub batch_size: usize,
    /// Terms excluded from postings (document lengths still count them)
    pub stopwords: HashSet<String>,
    /// Processor stage parallelism
    pub workers: usize,
    /// Concurrent file loads in the loader stage
    pub download_concurrency: usize,
    /// Delete existing segments and chunk store before indexing
    pub reindex: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            batch_size: 1000,
            stopwords: stop_words::get(stop_words::LANGUAGE::Portuguese)
                .into_iter()
                .collect(),
            workers: num_cpus::get(),
            download_concurrency: 20,
            reindex: false,
        }
    }
}

impl IndexOptions {
    /// Replace the stopword set.
    pub fn with_stopwords<I: IntoIterator<Item = String>>(mut self, words: I) -> Self {
        self.stopwords = words.into_iter().collect();
        self
    }

    /// Set the documents-per-segment batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set chunking geometry.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = IndexOptions::default();
        assert_eq!(options.chunk_size, 1000);
        assert_eq!(options.chunk_overlap, 100);
        assert_eq!(options.batch_size, 1000);
        assert!(!options.reindex);
        assert!(options.workers >= 1);
        // Portuguese defaults include the common articles
        assert!(options.stopwords.contains("de"));
    }

    #[test]
    fn test_bm25_params() {
        let params = Bm25Params::default();
        assert_eq!(params.k1, 1.5);
        assert_eq!(params.b, 0.75);

        // Rarer terms score higher
        let idf_rare = params.idf(5, 1000);
        let idf_common = params.idf(500, 1000);
        assert!(idf_rare > idf_common);

        // Higher tf scores higher, saturating below the upper bound
        let idf = params.idf(10, 1000);
        let low = params.score(1.0, 100.0, 100.0, idf);
        let high = params.score(10.0, 100.0, 100.0, idf);
        assert!(high > low);
        assert!(high < params.upper_bound(idf));
    }

    #[test]
    fn test_builder_style_options() {
        let options = IndexOptions::default()
            .with_batch_size(50)
            .with_chunking(500, 50)
            .with_stopwords(vec!["the".to_string()]);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.chunk_size, 500);
        assert!(options.stopwords.contains("the"));
        assert!(!options.stopwords.contains("de"));
    }
}
