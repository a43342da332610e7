//! Query-side engines: multi-segment BM25 search and WAND top-k pruning

pub mod searcher;
pub mod wand;

pub use searcher::FileSearcher;
pub use wand::WandSearcher;
