//! Segment index — one JSON line per sealed segment.
//!
//! The index accelerates snapshot-driven truncation: a segment whose
//! `last_seq` falls at or below the snapshot seq can be deleted without
//! scanning its frames. Unindexed segments fall back to a scan, so the
//! index is an optimization, never a source of truth.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

pub const INDEX_FILE: &str = "wal_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndexEntry {
    pub file: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub sealed_at_ns: u64,
}

/// Append one entry as a JSON line.
pub fn append_entry(dir: &Path, entry: &SegmentIndexEntry) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(INDEX_FILE))?;
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    file.write_all(&line)
}

/// All index entries; unparseable lines are skipped.
pub fn load_entries(dir: &Path) -> io::Result<Vec<SegmentIndexEntry>> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Ok(entry) = serde_json::from_str::<SegmentIndexEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Replace the index contents (after truncation).
pub fn rewrite(dir: &Path, entries: &[SegmentIndexEntry]) -> io::Result<()> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&serde_json::to_vec(entry)?);
        buf.push(b'\n');
    }
    std::fs::write(dir.join(INDEX_FILE), buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(file: &str, first: u64, last: u64) -> SegmentIndexEntry {
        SegmentIndexEntry {
            file: file.to_string(),
            first_seq: first,
            last_seq: last,
            sealed_at_ns: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn test_append_and_load() {
        let tmp = TempDir::new().unwrap();
        append_entry(tmp.path(), &entry("segment-000000.wal", 1, 10)).unwrap();
        append_entry(tmp.path(), &entry("segment-000001.wal", 11, 20)).unwrap();

        let entries = load_entries(tmp.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file, "segment-000000.wal");
        assert_eq!(entries[1].last_seq, 20);
    }

    #[test]
    fn test_load_missing_index() {
        let tmp = TempDir::new().unwrap();
        assert!(load_entries(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        append_entry(tmp.path(), &entry("segment-000000.wal", 1, 5)).unwrap();
        let path = tmp.path().join(INDEX_FILE);
        let mut data = std::fs::read(&path).unwrap();
        data.extend_from_slice(b"{not json\n");
        std::fs::write(&path, data).unwrap();
        append_entry(tmp.path(), &entry("segment-000001.wal", 6, 9)).unwrap();

        let entries = load_entries(tmp.path()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        append_entry(tmp.path(), &entry("segment-000000.wal", 1, 5)).unwrap();
        append_entry(tmp.path(), &entry("segment-000001.wal", 6, 9)).unwrap();

        rewrite(tmp.path(), &[entry("segment-000001.wal", 6, 9)]).unwrap();
        let entries = load_entries(tmp.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, "segment-000001.wal");
    }
}
