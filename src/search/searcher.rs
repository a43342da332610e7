//! Multi-segment BM25 searcher over committed segments
//!
//! Document frequencies are summed across segments before computing IDF,
//! so scores are corpus-wide rather than per-segment. A token with no
//! exact match anywhere falls back to fuzzy expansion over each
//! segment's term dictionary.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::analysis::analyze;
use crate::config::Bm25Params;
use crate::error::{EstanteError, Result};
use crate::segment::{IndexMeta, SegmentReader, INDEX_META_FILE};

pub struct FileSearcher {
    index_dir: PathBuf,
    segments: Vec<SegmentReader>,
    total_docs: u32,
    avgdl: f32,
    params: Bm25Params,
    stopwords: HashSet<String>,
}

impl FileSearcher {
    /// Open an index directory. Fails up front on a missing or
    /// incompatible `index.json` or any corrupt listed segment, never at
    /// first query.
    pub fn open<P: AsRef<Path>>(index_dir: P) -> Result<Self> {
        let index_dir = index_dir.as_ref().to_path_buf();
        let meta_path = index_dir.join(INDEX_META_FILE);
        let meta: IndexMeta = serde_json::from_str(&fs::read_to_string(&meta_path).map_err(
            |e| EstanteError::InvalidArgument(format!("cannot read {}: {}", meta_path.display(), e)),
        )?)?;

        let segments = meta
            .segments
            .iter()
            .map(|name| SegmentReader::open(&index_dir.join(name)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            index_dir,
            segments,
            total_docs: meta.total_docs,
            avgdl: meta.avgdl,
            params: Bm25Params::default(),
            stopwords: HashSet::new(),
        })
    }

    /// Query tokens found in this set are dropped before scoring.
    pub fn set_stopwords<I: IntoIterator<Item = String>>(&mut self, words: I) {
        self.stopwords = words.into_iter().collect();
    }

    pub fn num_docs(&self) -> u32 {
        self.total_docs
    }

    pub fn avgdl(&self) -> f32 {
        self.avgdl
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Top-k BM25 search. Returns `(book_id, score, doc_id)` ordered by
    /// descending score, ascending doc id on ties. Never fails: an empty
    /// query, an empty index or no match yield an empty result.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32, u32)> {
        if top_k == 0 {
            return Vec::new();
        }
        let tokens: Vec<String> = analyze(query)
            .into_iter()
            .filter(|t| !self.stopwords.contains(t))
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut doc_scores: HashMap<u32, f32> = HashMap::new();
        for token in &tokens {
            self.score_token(token, &mut doc_scores);
        }

        self.select_top_k(doc_scores, top_k)
    }

    /// Map a global doc id back to its book id via the owning segment.
    pub fn book_id(&self, doc_id: u32) -> Option<&str> {
        let segment = self.owning_segment(doc_id)?;
        segment.book_id(doc_id - segment.base_doc_id)
    }

    fn owning_segment(&self, doc_id: u32) -> Option<&SegmentReader> {
        self.segments
            .iter()
            .find(|s| doc_id >= s.base_doc_id && doc_id < s.base_doc_id + s.num_docs)
    }

    fn score_token(&self, token: &str, doc_scores: &mut HashMap<u32, f32>) {
        let (terms, total_df) = self.resolve_term(token);
        if total_df == 0 {
            return;
        }

        let idf = self.params.idf(total_df, self.total_docs);

        for term in &terms {
            for segment in &self.segments {
                let Some(postings) = segment.postings(term) else {
                    continue;
                };
                for (local_doc_id, tf) in postings {
                    let doc_len = segment.doc_length(local_doc_id).unwrap_or(1) as f32;
                    let global_doc_id = segment.base_doc_id + local_doc_id;
                    let score = self.params.score(tf as f32, doc_len, self.avgdl, idf);
                    *doc_scores.entry(global_doc_id).or_insert(0.0) += score;
                }
            }
        }
    }

    /// Resolve a query token to concrete index terms: exact where it
    /// exists, otherwise fuzzy with distance 2 for tokens longer than
    /// four characters, 1 below that. The effective df is summed across
    /// resolved terms and segments.
    fn resolve_term(&self, token: &str) -> (Vec<String>, u32) {
        let exact_df: u32 = self.segments.iter().filter_map(|s| s.df(token)).sum();
        if exact_df > 0 {
            return (vec![token.to_string()], exact_df);
        }

        let distance = if token.len() > 4 { 2 } else { 1 };
        let mut candidates: HashSet<String> = HashSet::new();
        for segment in &self.segments {
            candidates.extend(segment.fuzzy_terms(token, distance));
        }
        if candidates.is_empty() {
            return (Vec::new(), 0);
        }

        let terms: Vec<String> = candidates.into_iter().collect();
        let total_df = terms
            .iter()
            .map(|t| self.segments.iter().filter_map(|s| s.df(t)).sum::<u32>())
            .sum();
        (terms, total_df)
    }

    fn select_top_k(
        &self,
        doc_scores: HashMap<u32, f32>,
        top_k: usize,
    ) -> Vec<(String, f32, u32)> {
        if doc_scores.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<(u32, f32)> = doc_scores.into_iter().collect();
        let k = top_k.min(results.len());

        results.select_nth_unstable_by(k - 1, |a, b| cmp_by_score(*a, *b));
        results.truncate(k);
        results.sort_unstable_by(|a, b| cmp_by_score(*a, *b));

        results
            .into_iter()
            .filter_map(|(doc_id, score)| {
                match self.book_id(doc_id) {
                    Some(book_id) => Some((book_id.to_string(), score, doc_id)),
                    None => {
                        // A scored doc id must belong to some segment;
                        // losing the mapping means that segment's chunk
                        // table is damaged. Drop the hit, keep the rest.
                        warn!(doc_id, "no owning segment for scored document");
                        None
                    }
                }
            })
            .collect()
    }
}

fn cmp_by_score(a: (u32, f32), b: (u32, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::types::ProcessedDoc;
    use crate::segment::writer::{batch_for, write_segment};
    use crate::segment::{segment_dir_name, IndexMeta};
    use tempfile::TempDir;

    fn processed(book_id: &str, text: &str) -> ProcessedDoc {
        let tokens = analyze(text);
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *freqs.entry(t.clone()).or_insert(0) += 1;
        }
        ProcessedDoc {
            book_id: book_id.to_string(),
            chunks: vec![(tokens.len() as u32, freqs)],
        }
    }

    fn build_index(dir: &Path, segments: Vec<Vec<(&str, &str)>>) {
        let mut meta = IndexMeta::empty();
        let mut base = 0u32;
        for (segment_id, docs) in segments.into_iter().enumerate() {
            let processed: Vec<ProcessedDoc> = docs
                .into_iter()
                .map(|(id, text)| processed(id, text))
                .collect();
            let batch = batch_for(dir, segment_id, processed, base);
            let seg_meta = write_segment(batch).unwrap();
            base += seg_meta.num_docs;
            meta.push_segment(segment_dir_name(segment_id), &seg_meta);
        }
        fs::write(
            dir.join(INDEX_META_FILE),
            serde_json::to_string_pretty(&meta).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_open_requires_index_meta() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FileSearcher::open(dir.path()),
            Err(EstanteError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_basic_search() {
        let dir = TempDir::new().unwrap();
        build_index(
            dir.path(),
            vec![vec![
                ("a", "the quick brown fox"),
                ("b", "lazy dog sleeps"),
                ("c", "quick lazy fox"),
            ]],
        );

        let searcher = FileSearcher::open(dir.path()).unwrap();
        let results = searcher.search("quick fox", 3);

        let books: Vec<&str> = results.iter().map(|(b, _, _)| b.as_str()).collect();
        assert_eq!(results.len(), 2);
        assert!(books.contains(&"a"));
        assert!(books.contains(&"c"));
        assert!(!books.contains(&"b"));
        // Ordered by descending score.
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn test_multi_segment_idf_is_global() {
        let dir = TempDir::new().unwrap();
        // Same corpus split across two segments vs one; both searched
        // with the global doc count.
        build_index(
            dir.path(),
            vec![
                vec![("a", "raposa na floresta"), ("b", "floresta escura")],
                vec![("c", "raposa astuta"), ("d", "cachorro fiel")],
            ],
        );

        let searcher = FileSearcher::open(dir.path()).unwrap();
        assert_eq!(searcher.num_docs(), 4);

        let results = searcher.search("raposa", 10);
        assert_eq!(results.len(), 2);
        let ids: Vec<u32> = results.iter().map(|(_, _, id)| *id).collect();
        assert!(ids.contains(&0));
        assert!(ids.contains(&2));

        // Same documents in a single segment must score identically.
        let single = TempDir::new().unwrap();
        build_index(
            single.path(),
            vec![vec![
                ("a", "raposa na floresta"),
                ("b", "floresta escura"),
                ("c", "raposa astuta"),
                ("d", "cachorro fiel"),
            ]],
        );
        let single_searcher = FileSearcher::open(single.path()).unwrap();
        let single_results = single_searcher.search("raposa", 10);
        assert_eq!(results.len(), single_results.len());
        for (split, whole) in results.iter().zip(&single_results) {
            assert!((split.1 - whole.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_top_k_prefix_property() {
        let dir = TempDir::new().unwrap();
        build_index(
            dir.path(),
            vec![vec![
                ("a", "termo"),
                ("b", "termo termo"),
                ("c", "termo termo termo"),
                ("d", "termo outro assunto aqui"),
            ]],
        );
        let searcher = FileSearcher::open(dir.path()).unwrap();

        let top2 = searcher.search("termo", 2);
        let top4 = searcher.search("termo", 4);
        assert_eq!(top2.len(), 2);
        assert_eq!(top4.len(), 4);
        assert_eq!(top2[..], top4[..2]);
    }

    #[test]
    fn test_fuzzy_fallback() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path(), vec![vec![("a", "navegando pelo oceano")]]);
        let searcher = FileSearcher::open(dir.path()).unwrap();

        // "oceano" stems to a term not matched exactly by the typo, but
        // within edit distance 2.
        let results = searcher.search("osceano", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_stopwords_and_empty_query() {
        let dir = TempDir::new().unwrap();
        build_index(dir.path(), vec![vec![("a", "conteudo util")]]);
        let mut searcher = FileSearcher::open(dir.path()).unwrap();
        searcher.set_stopwords(analyze("conteudo"));

        assert!(searcher.search("", 10).is_empty());
        assert!(searcher.search("conteudo", 10).is_empty());
        assert!(searcher.search("util", 0).is_empty());
        assert_eq!(searcher.search("util", 10).len(), 1);
    }
}
