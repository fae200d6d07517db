//! Snapshot file codec.
//!
//! # Layout (little-endian)
//! ```text
//! magic   b"LOKIS01\0"
//! seq     u64
//! created u64   nanoseconds
//! count   u32
//! count × { id:u64, side:u8, otype:u8, price:i64, qty:i64 }
//! crc32   u32   over all preceding bytes
//! ```
//! The `qty` of each record is the order's remaining quantity, so
//! loading a snapshot and serializing again is byte-identical.
//!
//! Writes are atomic: temp file, fsync, rename.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_MAGIC: [u8; 8] = *b"LOKIS01\0";
pub const SNAPSHOT_FILE: &str = "snapshot.bin";

const HEADER_LEN: usize = 8 + 8 + 8 + 4;
const RECORD_LEN: usize = 8 + 1 + 1 + 8 + 8;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("bad snapshot magic")]
    BadMagic,

    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("truncated snapshot: {0}")]
    Truncated(String),
}

/// One Active order in the snapshot. `side` and `order_type` are the
/// wire codes from `types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: u64,
    pub side: u8,
    pub order_type: u8,
    pub price: i64,
    /// Remaining quantity at capture time.
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Last seq captured.
    pub seq: u64,
    pub created_ns: u64,
    /// Deterministic walk order: bids descending, then asks ascending.
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotFile {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.entries.len() * RECORD_LEN + 4);
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.created_ns.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.id.to_le_bytes());
            buf.push(entry.side);
            buf.push(entry.order_type);
            buf.extend_from_slice(&entry.price.to_le_bytes());
            buf.extend_from_slice(&entry.qty.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_LEN + 4 {
            return Err(SnapshotError::Truncated(format!(
                "{} bytes is below the minimum",
                data.len()
            )));
        }
        if data[0..8] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let body = &data[..data.len() - 4];
        let stored = u32::from_le_bytes(
            data[data.len() - 4..]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("crc".into()))?,
        );
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(SnapshotError::ChecksumMismatch { stored, computed });
        }

        let seq = u64::from_le_bytes(
            data[8..16]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("seq".into()))?,
        );
        let created_ns = u64::from_le_bytes(
            data[16..24]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("created".into()))?,
        );
        let count = u32::from_le_bytes(
            data[24..28]
                .try_into()
                .map_err(|_| SnapshotError::Truncated("count".into()))?,
        ) as usize;

        let records = &body[HEADER_LEN..];
        if records.len() != count * RECORD_LEN {
            return Err(SnapshotError::Truncated(format!(
                "{} record bytes for {} records",
                records.len(),
                count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for chunk in records.chunks_exact(RECORD_LEN) {
            entries.push(SnapshotEntry {
                id: u64::from_le_bytes(
                    chunk[0..8]
                        .try_into()
                        .map_err(|_| SnapshotError::Truncated("record id".into()))?,
                ),
                side: chunk[8],
                order_type: chunk[9],
                price: i64::from_le_bytes(
                    chunk[10..18]
                        .try_into()
                        .map_err(|_| SnapshotError::Truncated("record price".into()))?,
                ),
                qty: i64::from_le_bytes(
                    chunk[18..26]
                        .try_into()
                        .map_err(|_| SnapshotError::Truncated("record qty".into()))?,
                ),
            });
        }

        Ok(Self {
            seq,
            created_ns,
            entries,
        })
    }
}

/// Write atomically into `dir/snapshot.bin`.
pub fn write(dir: &Path, snapshot: &SnapshotFile) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(SNAPSHOT_FILE);
    let tmp_path = dir.join(format!("{SNAPSHOT_FILE}.tmp"));

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&snapshot.encode())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// Load `dir/snapshot.bin`; `None` when no snapshot exists yet.
pub fn load(dir: &Path) -> Result<Option<SnapshotFile>, SnapshotError> {
    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let mut data = Vec::new();
    File::open(&path)?.read_to_end(&mut data)?;
    Ok(Some(SnapshotFile::decode(&data)?))
}
