//! Entry WAL — segmented append-only log of accepted intents.
//!
//! # Frame format (big-endian)
//! ```text
//! [type:u8][seq:u64][time:u64][len:u32][payload:len][crc32:u32]
//! ```
//! CRC32 (IEEE) covers header + payload. Segments are named
//! `segment-NNNNNN.wal`; a segment seals and rotates once its size
//! reaches `segment_size`, appending a line to the segment index.
//!
//! Appends may buffer according to the flush/fsync policies; the place
//! pipeline calls [`EntryWal::sync`] explicitly on the critical path,
//! and rotation always fsyncs the sealed segment.

use crate::index::{self, SegmentIndexEntry};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes before the payload: type + seq + time + len.
pub const FRAME_HEADER_LEN: usize = 1 + 8 + 8 + 4;
/// Trailing CRC32.
pub const FRAME_TRAILER_LEN: usize = 4;
/// Upper bound on payload length; larger values are treated as corruption.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt WAL frame in {segment} at offset {offset}: {detail}")]
    Corruption {
        segment: String,
        offset: u64,
        detail: String,
    },

    #[error("non-monotonic seq {seq} after {prev}")]
    NonMonotonicSeq { prev: u64, seq: u64 },

    #[error("invalid record type: {0}")]
    InvalidRecordType(u8),

    #[error("replay apply failed: {0}")]
    Apply(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Place,
    Cancel,
}

impl RecordType {
    pub fn as_u8(&self) -> u8 {
        match self {
            RecordType::Place => 0,
            RecordType::Cancel => 1,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, WalError> {
        match code {
            0 => Ok(RecordType::Place),
            1 => Ok(RecordType::Cancel),
            other => Err(WalError::InvalidRecordType(other)),
        }
    }
}

/// One log record: an accepted intent.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub record_type: RecordType,
    pub seq: u64,
    /// Nanoseconds since the Unix epoch at append time.
    pub time_ns: u64,
    pub payload: Vec<u8>,
}

impl WalRecord {
    pub fn new(record_type: RecordType, seq: u64, time_ns: u64, payload: Vec<u8>) -> Self {
        Self {
            record_type,
            seq,
            time_ns,
            payload,
        }
    }

    /// Serialize to the on-disk frame.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len() as u32;
        let mut buf =
            Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len() + FRAME_TRAILER_LEN);
        buf.push(self.record_type.as_u8());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.time_ns.to_be_bytes());
        buf.extend_from_slice(&payload_len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }
}

/// Controls when buffered data is pushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// Controls when `fsync` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    OnRotation,
}

#[derive(Debug, Clone)]
pub struct WalConfig {
    pub dir: PathBuf,
    /// Rotation threshold in bytes.
    pub segment_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 64 * 1024 * 1024,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::OnRotation,
        }
    }
}

/// Append side of the entry WAL.
pub struct EntryWal {
    config: WalConfig,
    writer: BufWriter<File>,
    segment_index: u64,
    segment_path: PathBuf,
    segment_offset: u64,
    segment_first_seq: Option<u64>,
    segment_last_seq: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl EntryWal {
    /// Open the WAL directory, resuming the highest existing segment.
    pub fn open(config: WalConfig) -> Result<Self, WalError> {
        fs::create_dir_all(&config.dir)?;

        let segment_index = Self::latest_segment_index(&config.dir)?;
        let segment_path = segment_path(&config.dir, segment_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)?;
        let segment_offset = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            segment_index,
            segment_path,
            segment_offset,
            segment_first_seq: None,
            segment_last_seq: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn current_segment_path(&self) -> &Path {
        &self.segment_path
    }

    /// Append one record. Rotates once the segment reaches its size
    /// threshold (after the write, so frames never split).
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let frame = record.encode();
        self.writer.write_all(&frame)?;
        self.segment_offset += frame.len() as u64;
        self.segment_first_seq.get_or_insert(record.seq);
        self.segment_last_seq = record.seq;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;

        if self.segment_offset >= self.config.segment_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Flush buffers and fsync the current segment. The place pipeline
    /// calls this before acknowledging a client.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Delete sealed segments whose highest seq is `<= seq`. Uses the
    /// segment index where available and falls back to scanning
    /// unindexed segments. Returns the number of segments removed.
    pub fn truncate_before(&mut self, seq: u64) -> Result<usize, WalError> {
        let indexed = index::load_entries(&self.config.dir)?;
        let mut removed = 0usize;

        for path in crate::replay::discover_segments(&self.config.dir)? {
            if path == self.segment_path {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let max_seq = match indexed.iter().find(|e| e.file == name) {
                Some(entry) => Some(entry.last_seq),
                None => crate::replay::segment_max_seq(&path)?,
            };
            match max_seq {
                Some(max) if max <= seq => {
                    fs::remove_file(&path)?;
                    removed += 1;
                    tracing::info!(segment = %name, max_seq = max, "truncated WAL segment");
                }
                // Empty sealed segments hold no records worth keeping.
                None => {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
                _ => {}
            }
        }

        if removed > 0 {
            let keep: Vec<SegmentIndexEntry> = indexed
                .into_iter()
                .filter(|e| self.config.dir.join(&e.file).exists())
                .collect();
            index::rewrite(&self.config.dir, &keep)?;
        }
        Ok(removed)
    }

    // ── internal ────────────────────────────────────────────────────

    fn rotate(&mut self) -> Result<(), WalError> {
        self.sync()?;

        if let Some(first_seq) = self.segment_first_seq {
            let entry = SegmentIndexEntry {
                file: self
                    .segment_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                first_seq,
                last_seq: self.segment_last_seq,
                sealed_at_ns: unix_now_ns(),
            };
            index::append_entry(&self.config.dir, &entry)?;
        }

        self.segment_index += 1;
        self.segment_path = segment_path(&self.config.dir, self.segment_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.segment_path)?;
        self.writer = BufWriter::new(file);
        self.segment_offset = 0;
        self.segment_first_seq = None;
        self.segment_last_seq = 0;
        Ok(())
    }

    fn apply_flush_policy(&mut self) -> Result<(), WalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), WalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn latest_segment_index(dir: &Path) -> Result<u64, WalError> {
        let mut latest = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(idx) = parse_segment_index(&name) {
                latest = latest.max(idx);
            }
        }
        Ok(latest)
    }
}

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("segment-{:06}.wal", index))
}

pub(crate) fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix("segment-")?
        .strip_suffix(".wal")?
        .parse()
        .ok()
}

pub(crate) fn unix_now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
