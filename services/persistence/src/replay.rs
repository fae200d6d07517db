//! Entry WAL replay — sequential frame reader with corruption checks.
//!
//! Segments are visited in lexicographic (= numeric) order and frames
//! are decoded one at a time. A CRC mismatch, a truncated frame, or a
//! non-increasing seq aborts replay with an error: corruption is an
//! operator problem, never silently truncated.

use crate::wal::{
    RecordType, WalError, WalRecord, FRAME_HEADER_LEN, FRAME_TRAILER_LEN, MAX_PAYLOAD_LEN,
};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Replay every record under `dir`, invoking `visit` per record.
/// Returns the highest seq seen (0 for an empty log).
pub fn replay(
    dir: &Path,
    mut visit: impl FnMut(&WalRecord) -> Result<(), WalError>,
) -> Result<u64, WalError> {
    let mut last_seq = 0u64;

    for path in discover_segments(dir)? {
        let segment = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut reader = BufReader::new(File::open(&path)?);
        let mut offset = 0u64;

        while let Some((record, frame_len)) = read_frame(&mut reader, &segment, offset)? {
            if record.seq <= last_seq {
                return Err(WalError::NonMonotonicSeq {
                    prev: last_seq,
                    seq: record.seq,
                });
            }
            last_seq = record.seq;
            visit(&record)?;
            offset += frame_len;
        }
    }

    Ok(last_seq)
}

/// Segment files under `dir`, sorted by name.
pub fn discover_segments(dir: &Path) -> Result<Vec<PathBuf>, WalError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let name = n.to_string_lossy();
                    name.starts_with("segment-") && name.ends_with(".wal")
                })
                .unwrap_or(false)
        })
        .collect();
    segments.sort();
    Ok(segments)
}

/// Highest seq in one segment, `None` when the segment holds no frames.
/// Used by truncation when the index lacks an entry.
pub(crate) fn segment_max_seq(path: &Path) -> Result<Option<u64>, WalError> {
    let segment = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut reader = BufReader::new(File::open(path)?);
    let mut offset = 0u64;
    let mut max_seq = None;

    while let Some((record, frame_len)) = read_frame(&mut reader, &segment, offset)? {
        max_seq = Some(record.seq);
        offset += frame_len;
    }
    Ok(max_seq)
}

/// Decode one frame. `Ok(None)` on clean EOF at a frame boundary;
/// anything short of a full, checksum-valid frame is corruption.
fn read_frame(
    reader: &mut impl Read,
    segment: &str,
    offset: u64,
) -> Result<Option<(WalRecord, u64)>, WalError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if !read_fully(reader, &mut header, segment, offset, "frame header")? {
        return Ok(None);
    }

    let record_type = RecordType::from_u8(header[0])?;
    let seq = u64::from_be_bytes(header[1..9].try_into().map_err(|_| corrupt(segment, offset, "header slice"))?);
    let time_ns = u64::from_be_bytes(header[9..17].try_into().map_err(|_| corrupt(segment, offset, "header slice"))?);
    let payload_len = u32::from_be_bytes(header[17..21].try_into().map_err(|_| corrupt(segment, offset, "header slice"))?);

    if payload_len > MAX_PAYLOAD_LEN {
        return Err(corrupt(
            segment,
            offset,
            &format!("implausible payload length {}", payload_len),
        ));
    }

    let mut rest = vec![0u8; payload_len as usize + FRAME_TRAILER_LEN];
    let mut filled = 0usize;
    while filled < rest.len() {
        let n = reader.read(&mut rest[filled..])?;
        if n == 0 {
            return Err(corrupt(segment, offset, "truncated frame"));
        }
        filled += n;
    }

    let payload = &rest[..payload_len as usize];
    let stored_crc = u32::from_be_bytes(
        rest[payload_len as usize..]
            .try_into()
            .map_err(|_| corrupt(segment, offset, "trailer slice"))?,
    );

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(corrupt(
            segment,
            offset,
            &format!("crc mismatch for seq {}", seq),
        ));
    }

    let frame_len = (FRAME_HEADER_LEN + payload_len as usize + FRAME_TRAILER_LEN) as u64;
    Ok(Some((
        WalRecord {
            record_type,
            seq,
            time_ns,
            payload: payload.to_vec(),
        },
        frame_len,
    )))
}

/// Fill `buf` completely. `Ok(false)` on EOF before the first byte;
/// a partial read is corruption.
fn read_fully(
    reader: &mut impl Read,
    buf: &mut [u8],
    segment: &str,
    offset: u64,
    what: &str,
) -> Result<bool, WalError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(corrupt(segment, offset, &format!("truncated {}", what)));
        }
        filled += n;
    }
    Ok(true)
}

fn corrupt(segment: &str, offset: u64, detail: &str) -> WalError {
    WalError::Corruption {
        segment: segment.to_string(),
        offset,
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{EntryWal, WalConfig};
    use tempfile::TempDir;

    fn write_records(dir: &Path, seqs: &[u64]) {
        let mut wal = EntryWal::open(WalConfig::new(dir)).unwrap();
        for &seq in seqs {
            wal.append(&WalRecord::new(
                RecordType::Place,
                seq,
                seq * 10,
                vec![seq as u8; 4],
            ))
            .unwrap();
        }
        wal.sync().unwrap();
    }

    #[test]
    fn test_empty_dir_replays_to_zero() {
        let tmp = TempDir::new().unwrap();
        let last = replay(tmp.path(), |_| Ok(())).unwrap();
        assert_eq!(last, 0);
    }

    #[test]
    fn test_missing_dir_replays_to_zero() {
        let tmp = TempDir::new().unwrap();
        let last = replay(&tmp.path().join("absent"), |_| Ok(())).unwrap();
        assert_eq!(last, 0);
    }

    #[test]
    fn test_crc_mismatch_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), &[1, 2, 3]);

        let path = discover_segments(tmp.path()).unwrap().remove(0);
        let mut data = fs::read(&path).unwrap();
        // Flip a payload byte of the second frame
        let frame_len = FRAME_HEADER_LEN + 4 + FRAME_TRAILER_LEN;
        data[frame_len + FRAME_HEADER_LEN] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let err = replay(tmp.path(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, WalError::Corruption { .. }));
    }

    #[test]
    fn test_truncated_tail_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), &[1, 2]);

        let path = discover_segments(tmp.path()).unwrap().remove(0);
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 3]).unwrap();

        let err = replay(tmp.path(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, WalError::Corruption { .. }));
    }

    #[test]
    fn test_non_monotonic_seq_is_fatal() {
        let tmp = TempDir::new().unwrap();
        // Write seq 5 then seq 3 by hand
        let mut wal = EntryWal::open(WalConfig::new(tmp.path())).unwrap();
        wal.append(&WalRecord::new(RecordType::Place, 5, 0, vec![]))
            .unwrap();
        wal.append(&WalRecord::new(RecordType::Place, 3, 0, vec![]))
            .unwrap();
        wal.sync().unwrap();

        let err = replay(tmp.path(), |_| Ok(())).unwrap_err();
        match err {
            WalError::NonMonotonicSeq { prev, seq } => {
                assert_eq!(prev, 5);
                assert_eq!(seq, 3);
            }
            other => panic!("expected NonMonotonicSeq, got {other:?}"),
        }
    }

    #[test]
    fn test_gaps_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), &[1, 2, 7, 9]);

        let mut seqs = Vec::new();
        let last = replay(tmp.path(), |rec| {
            seqs.push(rec.seq);
            Ok(())
        })
        .unwrap();
        assert_eq!(last, 9);
        assert_eq!(seqs, vec![1, 2, 7, 9]);
    }

    #[test]
    fn test_visitor_error_aborts() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), &[1, 2, 3]);

        let mut count = 0;
        let err = replay(tmp.path(), |_| {
            count += 1;
            if count == 2 {
                Err(WalError::Apply("boom".into()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert!(matches!(err, WalError::Apply(_)));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cancel_records_replay() {
        let tmp = TempDir::new().unwrap();
        let mut wal = EntryWal::open(WalConfig::new(tmp.path())).unwrap();
        wal.append(&WalRecord::new(RecordType::Place, 1, 0, vec![1]))
            .unwrap();
        wal.append(&WalRecord::new(RecordType::Cancel, 2, 0, vec![2]))
            .unwrap();
        wal.sync().unwrap();

        let mut types = Vec::new();
        replay(tmp.path(), |rec| {
            types.push(rec.record_type);
            Ok(())
        })
        .unwrap();
        assert_eq!(types, vec![RecordType::Place, RecordType::Cancel]);
    }

    #[test]
    fn test_segment_max_seq() {
        let tmp = TempDir::new().unwrap();
        write_records(tmp.path(), &[4, 5, 6]);
        let path = discover_segments(tmp.path()).unwrap().remove(0);
        assert_eq!(segment_max_seq(&path).unwrap(), Some(6));
    }
}
