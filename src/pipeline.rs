//! Corpus indexing pipeline
//!
//! Three stages connected by bounded channels:
//!
//! 1. loader: async file reads gated by a concurrency semaphore
//! 2. processors: parse, chunk, analyze (CPU-parallel workers)
//! 3. indexer: single thread batching processed docs into segments
//!
//! The processor → indexer channel has capacity 1. That is load-bearing:
//! producers wait for the writer, which caps peak memory at roughly one
//! in-flight batch.

use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::analysis::analyze_arena;
use crate::config::IndexOptions;
use crate::document::parsers::{chunk_store_path, chunk_text, DocumentFormat};
use crate::error::{EstanteError, Result};
use crate::segment::types::{IndexMeta, ProcessedDoc};
use crate::segment::writer::{batch_for, write_segment};
use crate::segment::{segment_dir_name, INDEX_META_FILE};

/// One corpus file, loaded but not yet parsed.
struct RawDoc {
    book_id: String,
    bytes: Vec<u8>,
    format: DocumentFormat,
}

struct PipelineCtx {
    index_dir: PathBuf,
    chunks_dir: PathBuf,
    stopwords: HashSet<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    /// blake3 content hashes already indexed this run
    seen_hashes: DashMap<[u8; 32], ()>,
}

/// Index every supported file under `books_dir` into `index_dir`,
/// storing compressed chunk text under `chunks_dir`.
///
/// Returns `(num_books, num_chunks)`.
pub fn index_corpus(
    books_dir: &str,
    index_dir: &str,
    chunks_dir: &str,
    options: &IndexOptions,
) -> Result<(u32, u32)> {
    let index_path = PathBuf::from(index_dir);
    let chunks_path = PathBuf::from(chunks_dir);
    fs::create_dir_all(&index_path)?;
    fs::create_dir_all(&chunks_path)?;

    if options.reindex {
        clear_index(&index_path, &chunks_path)?;
    }

    // Continue an existing index: new segments extend its doc-id space.
    let mut index_meta = read_index_meta(&index_path)?;
    let base_doc_id = index_meta.total_docs;
    let first_segment_id = index_meta.segments.len();

    let book_files = discover_books(books_dir);
    info!(files = book_files.len(), books_dir = %books_dir, "corpus scan complete");

    let ctx = Arc::new(PipelineCtx {
        index_dir: index_path.clone(),
        chunks_dir: chunks_path,
        stopwords: options.stopwords.clone(),
        chunk_size: options.chunk_size,
        chunk_overlap: options.chunk_overlap,
        seen_hashes: DashMap::new(),
    });

    let workers = options.workers.max(1);
    let (tx_raw, rx_raw) = bounded::<RawDoc>(options.download_concurrency.max(1) * 2);
    let (tx_processed, rx_processed) = bounded::<ProcessedDoc>(1);

    let indexer = spawn_indexer(
        rx_processed,
        ctx.clone(),
        options.batch_size,
        first_segment_id,
        base_doc_id,
    );
    let processors = spawn_processors(workers, rx_raw, tx_processed, ctx.clone());

    run_loader(book_files, tx_raw, ctx, options.download_concurrency.max(1))?;

    for handle in processors {
        let _ = handle.join();
    }
    let (segments, num_books, num_chunks) = indexer
        .join()
        .map_err(|_| EstanteError::Index("indexer thread panicked".to_string()))??;

    for (name, meta) in segments {
        index_meta.push_segment(name, &meta);
    }
    fs::write(
        index_path.join(INDEX_META_FILE),
        serde_json::to_string_pretty(&index_meta)?,
    )?;

    info!(num_books, num_chunks, "indexing complete");
    Ok((num_books, num_chunks))
}

/// Flat-argument wrapper over [`index_corpus`] for external callers.
#[allow(clippy::too_many_arguments)]
pub fn index_corpus_file(
    books_dir: &str,
    index_dir: &str,
    chunks_dir: &str,
    stopwords: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
) -> Result<(u32, u32)> {
    let options = IndexOptions::default()
        .with_stopwords(stopwords)
        .with_chunking(chunk_size, chunk_overlap)
        .with_batch_size(batch_size);
    index_corpus(books_dir, index_dir, chunks_dir, &options)
}

fn read_index_meta(index_path: &Path) -> Result<IndexMeta> {
    let meta_path = index_path.join(INDEX_META_FILE);
    if !meta_path.exists() {
        return Ok(IndexMeta::empty());
    }
    Ok(serde_json::from_str(&fs::read_to_string(meta_path)?)?)
}

fn clear_index(index_path: &Path, chunks_path: &Path) -> Result<()> {
    for entry in fs::read_dir(index_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("segment_") && entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else if name == INDEX_META_FILE {
            fs::remove_file(entry.path())?;
        }
    }
    for entry in fs::read_dir(chunks_path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

fn discover_books(books_dir: &str) -> Vec<String> {
    let patterns = [
        format!("{}/*.txt", books_dir),
        format!("{}/*.epub", books_dir),
        format!("{}/*.pdf", books_dir),
    ];

    let mut files = Vec::new();
    for pattern in &patterns {
        if let Ok(entries) = glob::glob(pattern) {
            for entry in entries.flatten() {
                files.push(entry.to_string_lossy().to_string());
            }
        }
    }
    files.sort();
    files
}

/// Loader stage: read files concurrently under a semaphore bound and feed
/// the processors.
fn run_loader(
    book_files: Vec<String>,
    tx_raw: Sender<RawDoc>,
    ctx: Arc<PipelineCtx>,
    concurrency: usize,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
        let mut tasks = Vec::with_capacity(book_files.len());

        for path in book_files {
            let semaphore = semaphore.clone();
            let tx = tx_raw.clone();
            let ctx = ctx.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");

                let Some((book_id, format)) = identify(&path) else {
                    return;
                };
                // Already chunked on a previous run: nothing to do.
                if chunk_store_path(&ctx.chunks_dir, &book_id).exists() {
                    return;
                }

                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let _ = tx.send(RawDoc {
                            book_id,
                            bytes,
                            format,
                        });
                    }
                    Err(e) => warn!(path = %path, error = %e, "failed to load corpus file"),
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    });

    drop(tx_raw);
    Ok(())
}

fn identify(path: &str) -> Option<(String, DocumentFormat)> {
    let format = DocumentFormat::from_path(path)?;
    let book_id = Path::new(path).file_stem()?.to_string_lossy().to_string();
    Some((book_id, format))
}

fn spawn_processors(
    workers: usize,
    rx_raw: Receiver<RawDoc>,
    tx_processed: Sender<ProcessedDoc>,
    ctx: Arc<PipelineCtx>,
) -> Vec<thread::JoinHandle<()>> {
    (0..workers)
        .map(|_| {
            let rx = rx_raw.clone();
            let tx = tx_processed.clone();
            let ctx = ctx.clone();

            thread::spawn(move || {
                let mut bump = bumpalo::Bump::new();
                while let Ok(raw) = rx.recv() {
                    if let Some(doc) = process_book(raw, &ctx, &mut bump) {
                        if tx.send(doc).is_err() {
                            // Indexer is gone; nothing left to do.
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}

fn process_book(raw: RawDoc, ctx: &PipelineCtx, bump: &mut bumpalo::Bump) -> Option<ProcessedDoc> {
    let text = raw.format.parse_bytes(&raw.bytes)?;

    // insert() doubles as the membership test so two workers racing on
    // identical content cannot both claim it.
    let content_hash = blake3::hash(text.as_bytes());
    if ctx
        .seen_hashes
        .insert(*content_hash.as_bytes(), ())
        .is_some()
    {
        return None;
    }

    let chunks = chunk_text(&text, ctx.chunk_size, ctx.chunk_overlap);
    if chunks.is_empty() {
        return None;
    }

    store_chunks(&raw.book_id, &chunks, &ctx.chunks_dir);

    let mut chunk_data = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        bump.reset();
        let tokens = analyze_arena(chunk, bump);
        if tokens.is_empty() {
            continue;
        }

        let length = tokens.len() as u32;
        let mut freqs: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            if !ctx.stopwords.contains(token) {
                *freqs.entry(token).or_insert(0) += 1;
            }
        }

        if !freqs.is_empty() {
            let owned: HashMap<String, u32> =
                freqs.into_iter().map(|(t, tf)| (t.to_string(), tf)).collect();
            chunk_data.push((length, owned));
        }
    }

    if chunk_data.is_empty() {
        return None;
    }
    Some(ProcessedDoc {
        book_id: raw.book_id,
        chunks: chunk_data,
    })
}

/// Persist a book's chunk text, zstd-compressed, under its shard dir.
fn store_chunks(book_id: &str, chunks: &[String], chunks_dir: &Path) {
    let path = chunk_store_path(chunks_dir, book_id);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let full_text = chunks.join("\n");
    match zstd::stream::encode_all(full_text.as_bytes(), 3) {
        Ok(compressed) => {
            if let Err(e) = fs::write(&path, compressed) {
                warn!(book_id = %book_id, error = %e, "failed to store chunk text");
            }
        }
        Err(e) => warn!(book_id = %book_id, error = %e, "failed to compress chunk text"),
    }
}

type IndexerResult = Result<(Vec<(String, crate::segment::SegmentMeta)>, u32, u32)>;

fn spawn_indexer(
    rx: Receiver<ProcessedDoc>,
    ctx: Arc<PipelineCtx>,
    batch_size: usize,
    first_segment_id: usize,
    base_doc_id: u32,
) -> thread::JoinHandle<IndexerResult> {
    thread::spawn(move || {
        let mut segments = Vec::new();
        let mut batch: Vec<ProcessedDoc> = Vec::new();
        let mut segment_id = first_segment_id;
        let mut next_doc_id = base_doc_id;
        let mut num_books = 0u32;

        while let Ok(doc) = rx.recv() {
            num_books += 1;
            batch.push(doc);
            if batch.len() >= batch_size.max(1) {
                write_batch(&mut batch, &mut segment_id, &mut next_doc_id, &ctx, &mut segments)?;
            }
        }
        if !batch.is_empty() {
            write_batch(&mut batch, &mut segment_id, &mut next_doc_id, &ctx, &mut segments)?;
        }

        Ok((segments, num_books, next_doc_id - base_doc_id))
    })
}

fn write_batch(
    batch: &mut Vec<ProcessedDoc>,
    segment_id: &mut usize,
    next_doc_id: &mut u32,
    ctx: &PipelineCtx,
    segments: &mut Vec<(String, crate::segment::SegmentMeta)>,
) -> Result<()> {
    let docs = std::mem::take(batch);
    let data = batch_for(&ctx.index_dir, *segment_id, docs, *next_doc_id);
    let meta = write_segment(data)?;

    *next_doc_id += meta.num_docs;
    segments.push((segment_dir_name(*segment_id), meta));
    *segment_id += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::FileSearcher;
    use tempfile::TempDir;

    fn corpus(dir: &Path, books: &[(&str, &str)]) {
        for (name, text) in books {
            fs::write(dir.join(format!("{}.txt", name)), text).unwrap();
        }
    }

    fn options() -> IndexOptions {
        IndexOptions::default()
            .with_stopwords(Vec::new())
            .with_batch_size(2)
            .with_chunking(50, 10)
    }

    #[test]
    fn test_index_corpus_end_to_end() {
        let books = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        let chunks = TempDir::new().unwrap();

        corpus(
            books.path(),
            &[
                ("um", "a raposa veloz pula sobre o cachorro"),
                ("dois", "o cachorro dorme o dia inteiro"),
                ("tres", "a raposa astuta caça na floresta"),
            ],
        );

        let (num_books, num_chunks) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &options(),
        )
        .unwrap();

        assert_eq!(num_books, 3);
        assert!(num_chunks >= 3);

        // batch_size 2 over 3 books: two segments.
        let searcher = FileSearcher::open(index.path()).unwrap();
        assert_eq!(searcher.segment_count(), 2);
        assert_eq!(searcher.num_docs(), num_chunks);

        let results = searcher.search("raposa", 10);
        assert_eq!(results.len(), 2);

        // Chunk store holds a compressed file per book.
        assert!(chunk_store_path(chunks.path(), "um").exists());
        assert!(chunk_store_path(chunks.path(), "dois").exists());
    }

    #[test]
    fn test_duplicate_content_indexed_once() {
        let books = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        let chunks = TempDir::new().unwrap();

        let text = "conteudo repetido identico em dois arquivos";
        corpus(books.path(), &[("original", text), ("copia", text)]);

        let (num_books, _) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &options(),
        )
        .unwrap();

        assert_eq!(num_books, 1);
    }

    #[test]
    fn test_incremental_then_reindex() {
        let books = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        let chunks = TempDir::new().unwrap();

        corpus(books.path(), &[("um", "primeira leva de documentos")]);
        let (first_books, first_chunks) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &options(),
        )
        .unwrap();
        assert_eq!(first_books, 1);

        // Second run: old book is already chunked and skipped; the new
        // book extends the index.
        corpus(books.path(), &[("dois", "segunda leva chegando agora")]);
        let (second_books, _) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &options(),
        )
        .unwrap();
        assert_eq!(second_books, 1);

        let searcher = FileSearcher::open(index.path()).unwrap();
        assert_eq!(searcher.num_docs(), first_chunks + 1);

        // Reindex rebuilds from scratch.
        let mut opts = options();
        opts.reindex = true;
        let (re_books, re_chunks) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &opts,
        )
        .unwrap();
        assert_eq!(re_books, 2);

        let searcher = FileSearcher::open(index.path()).unwrap();
        assert_eq!(searcher.num_docs(), re_chunks);
    }

    #[test]
    fn test_unparseable_files_are_skipped() {
        let books = TempDir::new().unwrap();
        let index = TempDir::new().unwrap();
        let chunks = TempDir::new().unwrap();

        fs::write(books.path().join("bom.txt"), "texto legitimo e valido").unwrap();
        fs::write(books.path().join("ruim.txt"), [0xFFu8, 0xFE, 0x00]).unwrap();
        fs::write(books.path().join("ignorado.docx"), "outro formato").unwrap();

        let (num_books, _) = index_corpus(
            books.path().to_str().unwrap(),
            index.path().to_str().unwrap(),
            chunks.path().to_str().unwrap(),
            &options(),
        )
        .unwrap();
        assert_eq!(num_books, 1);
    }
}
