//! Near-real-time layer: RAM index, write-ahead log and their federation

pub mod ram;
pub mod realtime;
pub mod wal;

pub use ram::{Document, RamIndex};
pub use realtime::RealTimeIndexer;
pub use wal::Wal;
