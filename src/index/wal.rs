//! Write-ahead log for the RAM index
//!
//! Newline-delimited JSON, one self-contained document record per line.
//! Replay tolerates a torn tail by skipping lines that fail to parse.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::WalDurability;
use crate::error::Result;
use crate::index::ram::Document;

pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    durability: WalDurability,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P, durability: WalDurability) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            durability,
        })
    }

    /// Append one document record and push it to the operating system.
    /// With [`WalDurability::Fsync`] the record is also forced to disk.
    pub fn append(&mut self, doc: &Document) -> Result<()> {
        let line = serde_json::to_string(doc)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        if self.durability == WalDurability::Fsync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Replay every intact record, in append order.
    pub fn read_all(&self) -> Result<Vec<Document>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut docs = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Document>(&line) {
                Ok(doc) => docs.push(doc),
                Err(_) => warn!("skipping unparseable WAL record"),
            }
        }
        Ok(docs)
    }

    /// Drop all records, leaving an empty log open for appends.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
