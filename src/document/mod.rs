//! Document ingestion: format detection, parsing and chunking

pub mod parsers;

pub use parsers::{
    chunk_text, file_hashes_batch, parse_epub, parse_pdf, parse_txt, DocumentFormat,
};
