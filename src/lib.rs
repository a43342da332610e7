//! estante: a segmented BM25 full-text search engine
//!
//! Documents flow through a bounded parallel pipeline into immutable
//! on-disk segments (FST term dictionary, block-compressed postings,
//! memory-mapped readers). A near-real-time layer serves newly added
//! documents from RAM, backed by a write-ahead log, until they are
//! sealed into a segment.

pub mod analysis;
pub mod codecs;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod search;
pub mod segment;

pub use analysis::{analyze, Analyzer};
pub use codecs::{decode_postings, encode_postings, merge_postings};
pub use config::{Bm25Params, IndexOptions, WalDurability};
pub use document::{chunk_text, file_hashes_batch, parse_epub, parse_pdf, parse_txt};
pub use error::{EstanteError, Result};
pub use index::RealTimeIndexer;
pub use pipeline::{index_corpus, index_corpus_file};
pub use search::{FileSearcher, WandSearcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
