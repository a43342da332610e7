//! Parsers for the three supported corpus formats, plus chunking
//!
//! The format set is closed: txt, epub and pdf, selected by file
//! extension. Parsing is tolerant; a document that cannot be read is
//! skipped by the pipeline rather than failing the batch.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use zip::ZipArchive;

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// EPUB entries whose names contain any of these are boilerplate, not
/// book text.
const EPUB_SKIP_PATTERNS: [&str; 7] = [
    "toc",
    "nav",
    "cover",
    "license",
    "gutenberg",
    "copyright",
    "colophon",
];

/// The closed set of corpus document formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Txt,
    Epub,
    Pdf,
}

impl DocumentFormat {
    /// Select a format by file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "txt" => Some(Self::Txt),
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::from_extension(path.rsplit('.').next()?)
    }

    /// Parse raw bytes into normalized text.
    pub fn parse_bytes(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Txt => {
                simdutf8::basic::from_utf8(bytes).ok()?;
                // Just validated as UTF-8.
                Some(normalize_whitespace(unsafe {
                    std::str::from_utf8_unchecked(bytes)
                }))
            }
            Self::Epub => parse_epub_from_reader(Cursor::new(bytes)),
            Self::Pdf => Some(normalize_whitespace(
                &pdf_extract::extract_text_from_mem(bytes).ok()?,
            )),
        }
    }
}

/// Parse a plain-text file. Non-UTF-8 content is rejected.
pub fn parse_txt(path: &str) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    DocumentFormat::Txt.parse_bytes(&bytes)
}

/// Parse an EPUB archive, concatenating its content documents.
pub fn parse_epub(path: &str) -> Option<String> {
    let file = File::open(path).ok()?;
    parse_epub_from_reader(BufReader::new(file))
}

/// Extract text from a PDF.
pub fn parse_pdf(path: &str) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    DocumentFormat::Pdf.parse_bytes(&bytes)
}

fn parse_epub_from_reader<R: Read + Seek>(reader: R) -> Option<String> {
    let mut archive = ZipArchive::new(reader).ok()?;
    let mut texts = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).ok()?;
        let name = entry.name().to_lowercase();

        if is_html_entry(&name) && !EPUB_SKIP_PATTERNS.iter().any(|p| name.contains(p)) {
            let mut content = String::new();
            entry.read_to_string(&mut content).ok()?;
            let text = extract_html_text(&content);
            if !text.is_empty() {
                texts.push(text);
            }
        }
    }

    Some(texts.join(" "))
}

fn is_html_entry(name: &str) -> bool {
    name.ends_with(".html") || name.ends_with(".xhtml") || name.ends_with(".htm")
}

fn extract_html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    let nodes = document
        .select(&BODY_SELECTOR)
        .next()
        .map(|body| body.text())
        .unwrap_or_else(|| document.root_element().text());

    for node in nodes {
        text.push_str(node);
        text.push(' ');
    }

    normalize_whitespace(&text)
}

/// Collapse whitespace runs to single spaces and trim.
fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = true;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    if result.ends_with(' ') {
        result.pop();
    }
    result
}

/// Split text into overlapping chunks of roughly `chunk_size` characters,
/// snapping each cut back to the nearest space within 100 characters so
/// words stay whole.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let char_indices: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total_chars = char_indices.len();

    if total_chars <= chunk_size {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start_idx = 0;

    while start_idx < total_chars {
        let mut end_idx = (start_idx + chunk_size).min(total_chars);
        if end_idx < total_chars {
            end_idx = snap_to_space(text, &char_indices, start_idx, end_idx);
        }

        let start_byte = char_indices[start_idx];
        let end_byte = if end_idx == total_chars {
            text.len()
        } else {
            char_indices[end_idx]
        };

        let chunk = text[start_byte..end_byte].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end_idx >= total_chars {
            break;
        }

        let advance = if end_idx > overlap {
            end_idx - overlap
        } else {
            end_idx
        };
        start_idx = if advance <= start_idx { end_idx } else { advance };
    }

    chunks
}

fn snap_to_space(text: &str, indices: &[usize], start: usize, end: usize) -> usize {
    let search_limit = end.saturating_sub(100).max(start);

    for i in (search_limit..end).rev() {
        let byte_idx = indices[i];
        if text[byte_idx..].starts_with(' ') {
            return i;
        }
    }
    end
}

/// MD5 content hashes for a batch of files. Unreadable paths are omitted.
pub fn file_hashes_batch(paths: &[String]) -> Vec<(String, String)> {
    paths
        .iter()
        .filter_map(|path| {
            let data = std::fs::read(path).ok()?;
            Some((path.clone(), format!("{:x}", md5::compute(&data))))
        })
        .collect()
}

/// Shard directory for a book's stored chunks: the first two characters
/// of the book id, zero-padded for short ids.
pub fn shard_for(book_id: &str) -> String {
    if book_id.len() < 2 {
        format!("{:0>2}", book_id)
    } else {
        book_id[..2].to_string()
    }
}

/// Path of a book's compressed chunk file under the chunk store.
pub fn chunk_store_path(chunks_dir: &Path, book_id: &str) -> std::path::PathBuf {
    chunks_dir
        .join(shard_for(book_id))
        .join(format!("{}.zst", book_id))
}
