//! Memory-mapped segment reader
//!
//! All files are mapped read-only at open; lookups never copy postings.
//! The reader is shareable across threads because nothing is ever
//! mutated after construction.

use bitpacking::{BitPacker, BitPacker4x};
use fst::automaton::Levenshtein;
use fst::{IntoStreamer, Map as FstMap, Streamer};
use memmap2::Mmap;
use std::fs::{self, File};
use std::path::Path;

use crate::codecs::BLOCK_LEN;
use crate::error::{EstanteError, Result};
use crate::segment::types::SegmentMeta;
use crate::segment::writer::OFFSET_RECORD_SIZE;
use crate::segment::META_FILE;

/// Immutable view over one committed segment directory.
#[derive(Debug)]
pub struct SegmentReader {
    terms_fst: FstMap<Mmap>,
    offsets: Mmap,
    postings_docs: Mmap,
    postings_freqs: Mmap,
    chunks: Mmap,
    doc_lengths: Mmap,
    /// First global doc id in this segment
    pub base_doc_id: u32,
    /// Number of documents in this segment
    pub num_docs: u32,
}

/// One term's offsets.bin record.
struct TermEntry {
    doc_offset: u64,
    doc_len: u32,
    freq_offset: u64,
    freq_len: u32,
    doc_count: u32,
}

impl SegmentReader {
    /// Open a committed segment. A directory without `meta.json` is not a
    /// segment; a directory with one must be fully valid.
    pub fn open(segment_dir: &Path) -> Result<Self> {
        let meta_path = segment_dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(EstanteError::Corrupt(format!(
                "missing commit marker {}",
                meta_path.display()
            )));
        }
        let meta: SegmentMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;

        let terms_mmap = map_file(&segment_dir.join("terms.fst"))?;
        let terms_fst = FstMap::new(terms_mmap)
            .map_err(|e| EstanteError::Corrupt(format!("unreadable terms.fst: {}", e)))?;

        let offsets = map_file(&segment_dir.join("offsets.bin"))?;
        if offsets.len() % OFFSET_RECORD_SIZE != 0 {
            return Err(EstanteError::Corrupt(format!(
                "offsets.bin length {} is not a multiple of {}",
                offsets.len(),
                OFFSET_RECORD_SIZE
            )));
        }

        let postings_docs = map_file(&segment_dir.join("postings_docs.bin"))?;
        let postings_freqs = map_file(&segment_dir.join("postings_freqs.bin"))?;

        let chunks = map_file(&segment_dir.join("chunks.bin"))?;
        if chunks.len() < (meta.num_docs as usize + 1) * 4 {
            return Err(EstanteError::Corrupt(
                "chunks.bin shorter than its offset table".to_string(),
            ));
        }

        let doc_lengths = map_file(&segment_dir.join("doc_lengths.bin"))?;
        if doc_lengths.len() != meta.num_docs as usize * 4 {
            return Err(EstanteError::Corrupt(format!(
                "doc_lengths.bin holds {} bytes for {} docs",
                doc_lengths.len(),
                meta.num_docs
            )));
        }

        Ok(Self {
            terms_fst,
            offsets,
            postings_docs,
            postings_freqs,
            chunks,
            doc_lengths,
            base_doc_id: meta.base_doc_id,
            num_docs: meta.num_docs,
        })
    }

    /// Document frequency of an exact term.
    pub fn df(&self, term: &str) -> Option<u32> {
        self.term_entry(term).map(|e| e.doc_count)
    }

    /// Streaming iterator over a term's postings, in doc-id order.
    pub fn postings(&self, term: &str) -> Option<PostingsIter<'_>> {
        let entry = self.term_entry(term)?;

        let doc_end = entry.doc_offset.checked_add(entry.doc_len as u64)? as usize;
        let freq_end = entry.freq_offset.checked_add(entry.freq_len as u64)? as usize;
        if doc_end > self.postings_docs.len() || freq_end > self.postings_freqs.len() {
            return None;
        }

        Some(PostingsIter::new(
            &self.postings_docs[entry.doc_offset as usize..doc_end],
            &self.postings_freqs[entry.freq_offset as usize..freq_end],
            entry.doc_count as usize,
        ))
    }

    /// Terms within `max_distance` edits of `term`, via a Levenshtein
    /// automaton run over the FST.
    pub fn fuzzy_terms(&self, term: &str, max_distance: u32) -> Vec<String> {
        let automaton = match Levenshtein::new(term, max_distance) {
            Ok(a) => a,
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        let mut stream = self.terms_fst.search(&automaton).into_stream();
        while let Some((key, _)) = stream.next() {
            if let Ok(matched) = std::str::from_utf8(key) {
                results.push(matched.to_string());
            }
        }
        results
    }

    /// Token count of a document, by segment-local doc id.
    pub fn doc_length(&self, local_doc_id: u32) -> Option<u32> {
        if local_doc_id >= self.num_docs {
            return None;
        }
        let pos = local_doc_id as usize * 4;
        Some(u32::from_le_bytes(
            self.doc_lengths[pos..pos + 4].try_into().ok()?,
        ))
    }

    /// Book id of a document, by segment-local doc id. Borrows straight
    /// from the mapped file.
    pub fn book_id(&self, local_doc_id: u32) -> Option<&str> {
        if local_doc_id >= self.num_docs {
            return None;
        }
        let table_size = (self.num_docs as usize + 1) * 4;
        let pos = local_doc_id as usize * 4;

        let start = u32::from_le_bytes(self.chunks[pos..pos + 4].try_into().ok()?) as usize;
        let end = u32::from_le_bytes(self.chunks[pos + 4..pos + 8].try_into().ok()?) as usize;

        let data = self.chunks.get(table_size + start..table_size + end)?;
        std::str::from_utf8(data).ok()
    }

    fn term_entry(&self, term: &str) -> Option<TermEntry> {
        let ordinal = self.terms_fst.get(term)? as usize;
        let pos = ordinal * OFFSET_RECORD_SIZE;
        let record = self.offsets.get(pos..pos + OFFSET_RECORD_SIZE)?;

        Some(TermEntry {
            doc_offset: u64::from_le_bytes(record[0..8].try_into().ok()?),
            doc_len: u32::from_le_bytes(record[8..12].try_into().ok()?),
            freq_offset: u64::from_le_bytes(record[12..20].try_into().ok()?),
            freq_len: u32::from_le_bytes(record[20..24].try_into().ok()?),
            doc_count: u32::from_le_bytes(record[24..28].try_into().ok()?),
        })
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // Safety: segment files are immutable once meta.json exists; nothing
    // remaps or truncates them while the reader lives.
    Ok(unsafe { Mmap::map(&file)? })
}

/// Streaming decoder over one term's posting list.
///
/// Decodes one 128-wide block at a time into stack buffers, switching to
/// varint decoding for the tail. Yields exactly `doc_count` pairs with
/// strictly increasing doc ids.
pub struct PostingsIter<'a> {
    doc_data: &'a [u8],
    freq_data: &'a [u8],
    doc_pos: usize,
    freq_pos: usize,
    remaining: usize,
    doc_id: u32,
    docs: [u32; BLOCK_LEN],
    freqs: [u32; BLOCK_LEN],
    buf_len: usize,
    buf_pos: usize,
}

impl<'a> PostingsIter<'a> {
    fn new(doc_data: &'a [u8], freq_data: &'a [u8], doc_count: usize) -> Self {
        Self {
            doc_data,
            freq_data,
            doc_pos: 0,
            freq_pos: 0,
            remaining: doc_count,
            doc_id: 0,
            docs: [0; BLOCK_LEN],
            freqs: [0; BLOCK_LEN],
            buf_len: 0,
            buf_pos: 0,
        }
    }

    /// Number of postings not yet yielded.
    pub fn len(&self) -> usize {
        self.remaining + (self.buf_len - self.buf_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn refill(&mut self) -> bool {
        if self.remaining >= BLOCK_LEN {
            let packer = BitPacker4x::new();
            match (
                unpack(&packer, self.doc_data, self.doc_pos, &mut self.docs),
                unpack(&packer, self.freq_data, self.freq_pos, &mut self.freqs),
            ) {
                (Some(doc_pos), Some(freq_pos)) => {
                    self.doc_pos = doc_pos;
                    self.freq_pos = freq_pos;
                }
                _ => {
                    self.remaining = 0;
                    return false;
                }
            }
            self.buf_len = BLOCK_LEN;
            self.remaining -= BLOCK_LEN;
        } else if self.remaining > 0 {
            let tail = self.remaining;
            for i in 0..tail {
                let (delta, next) = varint(self.doc_data, self.doc_pos);
                self.doc_pos = next;
                self.docs[i] = delta;
                let (tf, next) = varint(self.freq_data, self.freq_pos);
                self.freq_pos = next;
                self.freqs[i] = tf;
            }
            self.buf_len = tail;
            self.remaining = 0;
        } else {
            return false;
        }
        self.buf_pos = 0;
        true
    }
}

impl Iterator for PostingsIter<'_> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        if self.buf_pos >= self.buf_len && !self.refill() {
            return None;
        }
        self.doc_id += self.docs[self.buf_pos];
        let tf = self.freqs[self.buf_pos];
        self.buf_pos += 1;
        Some((self.doc_id, tf))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }
}

fn unpack(
    packer: &BitPacker4x,
    data: &[u8],
    mut pos: usize,
    output: &mut [u32; BLOCK_LEN],
) -> Option<usize> {
    let num_bits = *data.get(pos)?;
    pos += 1;
    let packed_len = num_bits as usize * (BLOCK_LEN / 8);
    let packed = data.get(pos..pos + packed_len)?;
    packer.decompress(packed, output, num_bits);
    Some(pos + packed_len)
}

fn varint(data: &[u8], mut pos: usize) -> (u32, usize) {
    let mut result = 0u32;
    let mut shift = 0;
    while pos < data.len() {
        let byte = data[pos];
        pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    (result, pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::types::ProcessedDoc;
    use crate::segment::writer::{batch_for, write_segment};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_test_segment(dir: &Path, docs: Vec<(&str, Vec<(&str, u32)>)>) -> SegmentReader {
        let processed = docs
            .into_iter()
            .map(|(book_id, terms)| {
                let length: u32 = terms.iter().map(|(_, tf)| tf).sum();
                let map: HashMap<String, u32> = terms
                    .into_iter()
                    .map(|(t, tf)| (t.to_string(), tf))
                    .collect();
                ProcessedDoc {
                    book_id: book_id.to_string(),
                    chunks: vec![(length, map)],
                }
            })
            .collect();
        let batch = batch_for(dir, 0, processed, 0);
        let segment_dir = batch.segment_dir.clone();
        write_segment(batch).unwrap();
        SegmentReader::open(&segment_dir).unwrap()
    }

    #[test]
    fn test_open_missing_marker() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("segment_000000");
        fs::create_dir_all(&bogus).unwrap();
        fs::write(bogus.join("terms.fst"), b"junk").unwrap();

        let err = SegmentReader::open(&bogus).unwrap_err();
        assert!(err.is_segment_local());
    }

    #[test]
    fn test_df_and_postings() {
        let dir = TempDir::new().unwrap();
        let reader = write_test_segment(
            dir.path(),
            vec![
                ("a", vec![("fox", 2)]),
                ("b", vec![("dog", 1)]),
                ("c", vec![("fox", 1), ("dog", 4)]),
            ],
        );

        assert_eq!(reader.df("fox"), Some(2));
        assert_eq!(reader.df("dog"), Some(2));
        assert_eq!(reader.df("cat"), None);

        let postings: Vec<_> = reader.postings("fox").unwrap().collect();
        assert_eq!(postings, vec![(0, 2), (2, 1)]);

        let postings: Vec<_> = reader.postings("dog").unwrap().collect();
        assert_eq!(postings, vec![(1, 1), (2, 4)]);
    }

    #[test]
    fn test_postings_iter_spans_blocks() {
        let dir = TempDir::new().unwrap();
        // 300 single-chunk docs sharing one term: two full blocks + tail.
        let docs: Vec<(String, Vec<(&str, u32)>)> = (0..300)
            .map(|i| (format!("book{:03}", i), vec![("comum", (i % 5) + 1)]))
            .collect();
        let borrowed: Vec<(&str, Vec<(&str, u32)>)> = docs
            .iter()
            .map(|(id, terms)| (id.as_str(), terms.clone()))
            .collect();
        let reader = write_test_segment(dir.path(), borrowed);

        let iter = reader.postings("comum").unwrap();
        assert_eq!(iter.len(), 300);
        let postings: Vec<_> = iter.collect();
        assert_eq!(postings.len(), 300);
        for (i, (doc_id, tf)) in postings.iter().enumerate() {
            assert_eq!(*doc_id, i as u32);
            assert_eq!(*tf, (i as u32 % 5) + 1);
        }
    }

    #[test]
    fn test_doc_length_and_book_id() {
        let dir = TempDir::new().unwrap();
        let reader = write_test_segment(
            dir.path(),
            vec![("livro-um", vec![("fox", 3)]), ("livro-dois", vec![("dog", 5)])],
        );

        assert_eq!(reader.doc_length(0), Some(3));
        assert_eq!(reader.doc_length(1), Some(5));
        assert_eq!(reader.doc_length(2), None);

        assert_eq!(reader.book_id(0), Some("livro-um"));
        assert_eq!(reader.book_id(1), Some("livro-dois"));
        assert_eq!(reader.book_id(2), None);
    }

    #[test]
    fn test_fuzzy_terms() {
        let dir = TempDir::new().unwrap();
        let reader = write_test_segment(
            dir.path(),
            vec![("a", vec![("raposa", 1), ("raposo", 1), ("cachorro", 1)])],
        );

        let mut terms = reader.fuzzy_terms("raposa", 1);
        terms.sort();
        assert_eq!(terms, vec!["raposa", "raposo"]);

        assert!(reader.fuzzy_terms("gato", 1).is_empty());
    }
}
