//! Segment writer: turns one batch of processed documents into a
//! complete immutable segment directory
//!
//! File set: `terms.fst`, `offsets.bin`, `postings_docs.bin`,
//! `postings_freqs.bin`, `chunks.bin`, `doc_lengths.bin`, `meta.json`.
//! `meta.json` is written last and acts as the commit marker; on any
//! failure the partial directory is removed before the error propagates.

use fst::Map as FstMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::codecs::encode_postings_separated;
use crate::error::{EstanteError, Result};
use crate::segment::types::{BatchData, ProcessedDoc, SegmentMeta};
use crate::segment::META_FILE;

/// Bytes per offsets.bin record:
/// `doc_offset:u64 | doc_len:u32 | freq_offset:u64 | freq_len:u32 | doc_count:u32`
pub const OFFSET_RECORD_SIZE: usize = 28;

/// Write one segment. Returns its committed metadata.
pub fn write_segment(data: BatchData) -> Result<SegmentMeta> {
    let segment_dir = data.segment_dir.clone();
    let result = write_segment_inner(data);
    if result.is_err() {
        // Never leave a half-written directory behind; without meta.json
        // readers would skip it, but the space and the name are burned.
        let _ = fs::remove_dir_all(&segment_dir);
    }
    result
}

fn write_segment_inner(data: BatchData) -> Result<SegmentMeta> {
    fs::create_dir_all(&data.segment_dir)?;

    let flat = flatten_chunks(&data.docs);

    let mut sorted_terms: Vec<(String, Vec<(u32, u32)>)> =
        invert(flat.chunk_freq_maps).into_iter().collect();
    sorted_terms.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let encoded: Vec<(Vec<u8>, Vec<u8>)> = sorted_terms
        .par_iter()
        .map(|(_, postings)| encode_postings_separated(postings))
        .collect();

    let offsets_data = build_offsets(&sorted_terms, &encoded);
    let fst_bytes = build_fst(&sorted_terms)?;
    let chunks_blob = build_chunks_blob(&flat.book_ids, &flat.chunk_to_book);
    let lengths_blob = build_lengths_blob(&flat.doc_lengths);

    let (docs_blob, freqs_blob) = concat_streams(&encoded);

    fs::write(data.segment_dir.join("terms.fst"), &fst_bytes)?;
    fs::write(data.segment_dir.join("offsets.bin"), &offsets_data)?;
    fs::write(data.segment_dir.join("postings_docs.bin"), &docs_blob)?;
    fs::write(data.segment_dir.join("postings_freqs.bin"), &freqs_blob)?;
    fs::write(data.segment_dir.join("chunks.bin"), &chunks_blob)?;
    fs::write(data.segment_dir.join("doc_lengths.bin"), &lengths_blob)?;

    let meta = SegmentMeta {
        num_docs: flat.chunk_to_book.len() as u32,
        base_doc_id: data.base_doc_id,
        total_length: flat.total_length,
    };
    fs::write(
        data.segment_dir.join(META_FILE),
        serde_json::to_string(&meta)?,
    )?;

    info!(
        segment = data.segment_id,
        num_docs = meta.num_docs,
        terms = sorted_terms.len(),
        "segment committed"
    );

    Ok(meta)
}

struct FlatChunks {
    book_ids: Vec<String>,
    chunk_to_book: Vec<u32>,
    doc_lengths: Vec<u32>,
    chunk_freq_maps: Vec<(u32, HashMap<String, u32>)>,
    total_length: u64,
}

/// Flatten per-document chunk lists into parallel arrays, assigning
/// segment-local doc ids in chunk order so posting lists come out
/// already sorted. Readers add `base_doc_id` to globalize them.
fn flatten_chunks(docs: &[ProcessedDoc]) -> FlatChunks {
    let total_chunks: usize = docs.iter().map(|d| d.chunks.len()).sum();
    let mut book_ids = Vec::with_capacity(docs.len());
    let mut chunk_to_book = Vec::with_capacity(total_chunks);
    let mut doc_lengths = Vec::with_capacity(total_chunks);
    let mut chunk_freq_maps = Vec::with_capacity(total_chunks);
    let mut total_length = 0u64;

    for doc in docs {
        let book_idx = book_ids.len() as u32;
        book_ids.push(doc.book_id.clone());

        for (length, freq_map) in &doc.chunks {
            let doc_id = chunk_to_book.len() as u32;
            chunk_to_book.push(book_idx);
            doc_lengths.push(*length);
            total_length += *length as u64;
            chunk_freq_maps.push((doc_id, freq_map.clone()));
        }
    }

    FlatChunks {
        book_ids,
        chunk_to_book,
        doc_lengths,
        chunk_freq_maps,
        total_length,
    }
}

fn invert(chunk_freq_maps: Vec<(u32, HashMap<String, u32>)>) -> HashMap<String, Vec<(u32, u32)>> {
    let mut terms: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
    for (doc_id, freq_map) in chunk_freq_maps {
        for (term, tf) in freq_map {
            terms.entry(term).or_default().push((doc_id, tf));
        }
    }
    terms
}

fn build_offsets(
    sorted_terms: &[(String, Vec<(u32, u32)>)],
    encoded: &[(Vec<u8>, Vec<u8>)],
) -> Vec<u8> {
    let mut offsets_data = Vec::with_capacity(sorted_terms.len() * OFFSET_RECORD_SIZE);
    let mut doc_offset = 0u64;
    let mut freq_offset = 0u64;

    for (idx, (_, postings)) in sorted_terms.iter().enumerate() {
        let (doc_bytes, freq_bytes) = &encoded[idx];
        let doc_len = doc_bytes.len() as u32;
        let freq_len = freq_bytes.len() as u32;

        offsets_data.extend_from_slice(&doc_offset.to_le_bytes());
        offsets_data.extend_from_slice(&doc_len.to_le_bytes());
        offsets_data.extend_from_slice(&freq_offset.to_le_bytes());
        offsets_data.extend_from_slice(&freq_len.to_le_bytes());
        offsets_data.extend_from_slice(&(postings.len() as u32).to_le_bytes());

        doc_offset += doc_len as u64;
        freq_offset += freq_len as u64;
    }

    offsets_data
}

/// Build the term dictionary FST. Values are ordinals into offsets.bin.
fn build_fst(sorted_terms: &[(String, Vec<(u32, u32)>)]) -> Result<Vec<u8>> {
    let entries = sorted_terms
        .iter()
        .enumerate()
        .map(|(idx, (term, _))| (term.as_str(), idx as u64));
    let fst_map =
        FstMap::from_iter(entries).map_err(|e| EstanteError::Index(e.to_string()))?;
    Ok(fst_map.as_fst().as_bytes().to_vec())
}

/// chunks.bin: `(num_docs + 1)` little-endian u32 offsets followed by the
/// concatenated book-id bytes each doc points into.
fn build_chunks_blob(book_ids: &[String], chunk_to_book: &[u32]) -> Vec<u8> {
    let mut names = Vec::with_capacity(book_ids.iter().map(String::len).sum());
    let mut offsets = Vec::with_capacity(chunk_to_book.len() + 1);

    for &book_idx in chunk_to_book {
        offsets.push(names.len() as u32);
        names.extend_from_slice(book_ids[book_idx as usize].as_bytes());
    }
    offsets.push(names.len() as u32);

    let mut blob = Vec::with_capacity(offsets.len() * 4 + names.len());
    for offset in offsets {
        blob.extend_from_slice(&offset.to_le_bytes());
    }
    blob.extend_from_slice(&names);
    blob
}

fn build_lengths_blob(doc_lengths: &[u32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(doc_lengths.len() * 4);
    for len in doc_lengths {
        blob.extend_from_slice(&len.to_le_bytes());
    }
    blob
}

fn concat_streams(encoded: &[(Vec<u8>, Vec<u8>)]) -> (Vec<u8>, Vec<u8>) {
    let docs_size: usize = encoded.iter().map(|(d, _)| d.len()).sum();
    let freqs_size: usize = encoded.iter().map(|(_, f)| f.len()).sum();

    let mut docs_blob = Vec::with_capacity(docs_size);
    let mut freqs_blob = Vec::with_capacity(freqs_size);
    for (d, f) in encoded {
        docs_blob.extend_from_slice(d);
        freqs_blob.extend_from_slice(f);
    }
    (docs_blob, freqs_blob)
}

/// Build a `BatchData` for a batch of processed documents under `index_dir`.
pub fn batch_for(
    index_dir: &Path,
    segment_id: usize,
    docs: Vec<ProcessedDoc>,
    base_doc_id: u32,
) -> BatchData {
    BatchData {
        segment_id,
        segment_dir: index_dir.join(crate::segment::segment_dir_name(segment_id)),
        docs,
        base_doc_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(book_id: &str, chunks: Vec<Vec<(&str, u32)>>) -> ProcessedDoc {
        ProcessedDoc {
            book_id: book_id.to_string(),
            chunks: chunks
                .into_iter()
                .map(|terms| {
                    let length: u32 = terms.iter().map(|(_, tf)| tf).sum();
                    (
                        length,
                        terms
                            .into_iter()
                            .map(|(t, tf)| (t.to_string(), tf))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_write_segment_files() {
        let dir = TempDir::new().unwrap();
        let batch = batch_for(
            dir.path(),
            0,
            vec![
                doc("alpha", vec![vec![("fox", 2), ("dog", 1)]]),
                doc("beta", vec![vec![("fox", 1)], vec![("cat", 3)]]),
            ],
            0,
        );
        let segment_dir = batch.segment_dir.clone();

        let meta = write_segment(batch).unwrap();
        assert_eq!(meta.num_docs, 3);
        assert_eq!(meta.base_doc_id, 0);
        assert_eq!(meta.total_length, 7);

        for file in [
            "terms.fst",
            "offsets.bin",
            "postings_docs.bin",
            "postings_freqs.bin",
            "chunks.bin",
            "doc_lengths.bin",
            "meta.json",
        ] {
            assert!(segment_dir.join(file).exists(), "missing {}", file);
        }

        // Three distinct terms, one 28-byte record each.
        let offsets = fs::read(segment_dir.join("offsets.bin")).unwrap();
        assert_eq!(offsets.len(), 3 * OFFSET_RECORD_SIZE);
    }

    #[test]
    fn test_fst_is_deterministic() {
        let make = |dir: &Path, id: usize| {
            let batch = batch_for(
                dir,
                id,
                vec![doc("a", vec![vec![("zebra", 1), ("apple", 2), ("mango", 1)]])],
                0,
            );
            let segment_dir = batch.segment_dir.clone();
            write_segment(batch).unwrap();
            fs::read(segment_dir.join("terms.fst")).unwrap()
        };

        let dir = TempDir::new().unwrap();
        let first = make(dir.path(), 0);
        let second = make(dir.path(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_base_doc_id_recorded_in_meta() {
        let dir = TempDir::new().unwrap();
        let batch = batch_for(dir.path(), 3, vec![doc("x", vec![vec![("term", 1)]])], 42);
        let meta = write_segment(batch).unwrap();
        assert_eq!(meta.base_doc_id, 42);
        assert_eq!(meta.num_docs, 1);
    }
}
