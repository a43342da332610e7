//! Posting list codecs
//!
//! Two codecs operate jointly on a posting list sorted by doc_id:
//!
//! - a 128-wide bit-packed block codec for complete blocks: one width
//!   byte `w` followed by `16·w` bytes of packed values. Doc ids are
//!   delta-encoded before packing; term frequencies are packed directly.
//! - an unsigned LEB128 varint tail for the remaining `< 128` values.
//!
//! All operations are pure.

use bitpacking::{BitPacker, BitPacker4x};

/// Values per packed block. Matches `BitPacker4x::BLOCK_LEN`.
pub const BLOCK_LEN: usize = 128;

/// Encode a posting list into separate doc-delta and frequency streams.
///
/// Separating the streams lets scoring skip frequency I/O when a posting
/// is filtered out before its tf is needed.
pub fn encode_postings_separated(postings: &[(u32, u32)]) -> (Vec<u8>, Vec<u8>) {
    let mut sorted: Vec<_> = postings.to_vec();
    sorted.sort_unstable_by_key(|p| p.0);

    let mut docs_buf = Vec::with_capacity(sorted.len() * 4);
    let mut freqs_buf = Vec::with_capacity(sorted.len() * 4);

    let bitpacker = BitPacker4x::new();
    let mut block_docs = [0u32; BLOCK_LEN];
    let mut block_freqs = [0u32; BLOCK_LEN];
    let mut packed = [0u8; BLOCK_LEN * 4];

    let mut prev_doc_id = 0u32;
    let mut filled = 0;

    for (doc_id, tf) in sorted {
        block_docs[filled] = doc_id - prev_doc_id;
        block_freqs[filled] = tf;
        prev_doc_id = doc_id;
        filled += 1;

        if filled == BLOCK_LEN {
            pack_block(&bitpacker, &block_docs, &mut docs_buf, &mut packed);
            pack_block(&bitpacker, &block_freqs, &mut freqs_buf, &mut packed);
            filled = 0;
        }
    }

    for i in 0..filled {
        encode_varint(block_docs[i], &mut docs_buf);
        encode_varint(block_freqs[i], &mut freqs_buf);
    }

    (docs_buf, freqs_buf)
}

/// Decode `num_postings` postings from separated doc and frequency streams.
pub fn decode_postings_separated(
    doc_data: &[u8],
    freq_data: &[u8],
    num_postings: usize,
) -> Vec<(u32, u32)> {
    let mut result = Vec::with_capacity(num_postings);
    let bitpacker = BitPacker4x::new();
    let mut docs = [0u32; BLOCK_LEN];
    let mut freqs = [0u32; BLOCK_LEN];

    let mut doc_pos = 0;
    let mut freq_pos = 0;
    let mut doc_id = 0u32;
    let mut decoded = 0;

    while decoded + BLOCK_LEN <= num_postings {
        doc_pos = unpack_block(&bitpacker, doc_data, doc_pos, &mut docs);
        freq_pos = unpack_block(&bitpacker, freq_data, freq_pos, &mut freqs);

        for i in 0..BLOCK_LEN {
            doc_id += docs[i];
            result.push((doc_id, freqs[i]));
        }
        decoded += BLOCK_LEN;
    }

    for _ in decoded..num_postings {
        let (delta, next) = decode_varint(doc_data, doc_pos);
        doc_pos = next;
        let (tf, next) = decode_varint(freq_data, freq_pos);
        freq_pos = next;
        doc_id += delta;
        result.push((doc_id, tf));
    }

    result
}

fn pack_block(
    packer: &BitPacker4x,
    values: &[u32; BLOCK_LEN],
    output: &mut Vec<u8>,
    scratch: &mut [u8; BLOCK_LEN * 4],
) {
    let num_bits = packer.num_bits(values);
    output.push(num_bits);
    let written = packer.compress(values, &mut scratch[..], num_bits);
    output.extend_from_slice(&scratch[..written]);
}

fn unpack_block(
    packer: &BitPacker4x,
    data: &[u8],
    mut pos: usize,
    output: &mut [u32; BLOCK_LEN],
) -> usize {
    let num_bits = data[pos];
    pos += 1;
    let packed_len = (num_bits as usize) * (BLOCK_LEN / 8);
    packer.decompress(&data[pos..pos + packed_len], output, num_bits);
    pos + packed_len
}

/// Encode a posting list as a single interleaved varint stream.
///
/// Record layout per posting: doc-id delta, then tf. This is the compact
/// exchange format of the codec primitives; segment files use the
/// separated block format instead.
pub fn encode_postings(postings: &[(u32, u32)]) -> Vec<u8> {
    let mut sorted: Vec<_> = postings.to_vec();
    sorted.sort_unstable_by_key(|p| p.0);

    let mut buf = Vec::with_capacity(sorted.len() * 4);
    let mut prev_doc_id = 0u32;

    for (doc_id, tf) in sorted {
        encode_varint(doc_id - prev_doc_id, &mut buf);
        encode_varint(tf, &mut buf);
        prev_doc_id = doc_id;
    }
    buf
}

/// Decode an interleaved varint posting stream.
pub fn decode_postings(data: &[u8]) -> Vec<(u32, u32)> {
    let mut result = Vec::new();
    let mut pos = 0;
    let mut doc_id = 0u32;

    while pos < data.len() {
        let (delta, next) = decode_varint(data, pos);
        pos = next;
        if pos >= data.len() {
            break;
        }
        let (tf, next) = decode_varint(data, pos);
        pos = next;
        doc_id += delta;
        result.push((doc_id, tf));
    }
    result
}

/// Merge two encoded posting lists with disjoint doc-id sets.
pub fn merge_postings(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut postings = decode_postings(a);
    postings.extend(decode_postings(b));
    encode_postings(&postings)
}

fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn decode_varint(data: &[u8], mut pos: usize) -> (u32, usize) {
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
