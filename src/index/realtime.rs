//! Real-time indexer: federates the file searcher, the RAM index and the
//! write-ahead log under one API
//!
//! New documents are served from RAM immediately and become durable via
//! the WAL; `flush` seals the RAM contents into a regular on-disk
//! segment and only then truncates the log. Lock order is fixed:
//! segment readers, then RAM, then WAL.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::analyze;
use crate::config::WalDurability;
use crate::error::Result;
use crate::index::ram::{Document, RamIndex};
use crate::index::wal::Wal;
use crate::search::FileSearcher;
use crate::segment::types::{IndexMeta, ProcessedDoc};
use crate::segment::writer::{batch_for, write_segment};
use crate::segment::{segment_dir_name, INDEX_META_FILE};

const WAL_FILE: &str = "index.wal";

pub struct RealTimeIndexer {
    index_dir: PathBuf,
    disk: RwLock<FileSearcher>,
    ram: RwLock<RamIndex>,
    wal: Mutex<Wal>,
}

impl RealTimeIndexer {
    /// Open an index directory with default WAL durability.
    pub fn open<P: AsRef<Path>>(index_dir: P) -> Result<Self> {
        Self::open_with(index_dir, WalDurability::default())
    }

    /// Open an index directory, creating an empty index if none exists,
    /// and replay the WAL into a fresh RAM index.
    pub fn open_with<P: AsRef<Path>>(index_dir: P, durability: WalDurability) -> Result<Self> {
        let index_dir = index_dir.as_ref().to_path_buf();
        fs::create_dir_all(&index_dir)?;

        let meta_path = index_dir.join(INDEX_META_FILE);
        if !meta_path.exists() {
            fs::write(
                &meta_path,
                serde_json::to_string_pretty(&IndexMeta::empty())?,
            )?;
        }

        let disk = FileSearcher::open(&index_dir)?;
        let wal = Wal::open(index_dir.join(WAL_FILE), durability)?;

        // RAM doc ids start where the sealed segments end.
        let mut ram = RamIndex::new(disk.num_docs());
        let recovered = wal.read_all()?;
        let replayed = recovered.len();
        for doc in recovered {
            ram.insert(doc.content, doc.metadata);
        }
        if replayed > 0 {
            info!(replayed, "recovered documents from WAL");
        }

        Ok(Self {
            index_dir,
            disk: RwLock::new(disk),
            ram: RwLock::new(ram),
            wal: Mutex::new(wal),
        })
    }

    /// Insert a document, returning its doc id. The insert is visible to
    /// searches as soon as this returns, and durable via the WAL.
    pub fn add_document(&self, content: String, metadata: String) -> Result<u32> {
        let mut ram = self.ram.write();
        let doc_id = ram.insert(content, metadata);
        // The inserted doc is read back so the WAL record carries the
        // analyzed length and the exact stored content.
        let doc = ram.get(doc_id).cloned().expect("document just inserted");

        let mut wal = self.wal.lock();
        wal.append(&doc)?;
        Ok(doc_id)
    }

    /// Federated search over sealed segments and RAM, in parallel.
    /// RAM hits report their decimal doc id as `book_id`, which is also
    /// the book id they keep once sealed by `flush`.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32, u32)> {
        let disk = self.disk.read();
        let ram = self.ram.read();

        let (disk_results, ram_results) =
            rayon::join(|| disk.search(query, top_k), || ram.search(query));

        let mut results = disk_results;
        results.extend(
            ram_results
                .into_iter()
                .map(|(doc_id, score)| (doc_id.to_string(), score, doc_id)),
        );

        results.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        results.truncate(top_k);
        results
    }

    /// Number of documents currently held in RAM (not yet sealed).
    pub fn num_ram_docs(&self) -> u32 {
        self.ram.read().num_docs()
    }

    /// Total documents across sealed segments.
    pub fn num_sealed_docs(&self) -> u32 {
        self.disk.read().num_docs()
    }

    /// Seal the RAM contents into a new on-disk segment, extend the index
    /// metadata, then truncate the WAL and clear RAM. Returns the number
    /// of sealed documents.
    ///
    /// The segment's `meta.json` plus the updated `index.json` form the
    /// commit point: a crash before it replays the WAL on reopen, a crash
    /// after it finds the WAL already truncated.
    pub fn flush(&self) -> Result<u32> {
        let mut disk = self.disk.write();
        let mut ram = self.ram.write();
        if ram.is_empty() {
            return Ok(0);
        }

        let docs = ram.docs_ordered();
        let base_doc_id = docs[0].id;
        let count = docs.len() as u32;

        let processed: Vec<ProcessedDoc> = docs.into_iter().map(to_processed).collect();

        let segment_id = disk.segment_count();
        let seg_meta = write_segment(batch_for(&self.index_dir, segment_id, processed, base_doc_id))?;

        let meta_path = self.index_dir.join(INDEX_META_FILE);
        let mut index_meta: IndexMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
        index_meta.push_segment(segment_dir_name(segment_id), &seg_meta);
        fs::write(&meta_path, serde_json::to_string_pretty(&index_meta)?)?;

        *disk = FileSearcher::open(&self.index_dir)?;

        let mut wal = self.wal.lock();
        wal.truncate()?;
        ram.clear();

        info!(sealed = count, segment = segment_id, "RAM index sealed");
        Ok(count)
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }
}

/// A RAM document seals as a single-chunk processed doc; its decimal id
/// becomes the book id.
fn to_processed(doc: &Document) -> ProcessedDoc {
    let mut freqs: HashMap<String, u32> = HashMap::new();
    for token in analyze(&doc.content) {
        *freqs.entry(token).or_insert(0) += 1;
    }
    ProcessedDoc {
        book_id: doc.id.to_string(),
        chunks: vec![(doc.length, freqs)],
    }
}
