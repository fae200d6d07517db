//! Exit log — durable keyed outbox over an embedded ordered KV (sled).
//!
//! Keys are `outbox/` plus a 20-digit zero-padded decimal seq, so a
//! lexicographic scan is a seq-order scan. Values are
//! `[state:u8][retries:u32 BE][last_attempt_ns:u64 BE][payload…]`.
//!
//! State machine: New → Sent → Acked, with Sent → Failed → Sent on
//! retryable failure. Acked is terminal and regression is refused.
//! Every write is flushed; a crashed publisher re-observes exactly the
//! states it had made durable.

use std::path::Path;
use thiserror::Error;

pub const KEY_PREFIX: &str = "outbox/";
const VALUE_HEADER_LEN: usize = 1 + 4 + 8;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("outbox store error: {0}")]
    Store(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid outbox record: {0}")]
    InvalidRecord(String),

    #[error("illegal state transition for seq {seq}: {from} -> {to}")]
    IllegalTransition {
        seq: u64,
        from: OutboxState,
        to: OutboxState,
    },

    #[error("no outbox entry for seq {seq}")]
    NotFound { seq: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    New,
    Sent,
    Acked,
    Failed,
}

impl OutboxState {
    pub fn as_u8(&self) -> u8 {
        match self {
            OutboxState::New => 0,
            OutboxState::Sent => 1,
            OutboxState::Acked => 2,
            OutboxState::Failed => 3,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, OutboxError> {
        match code {
            0 => Ok(OutboxState::New),
            1 => Ok(OutboxState::Sent),
            2 => Ok(OutboxState::Acked),
            3 => Ok(OutboxState::Failed),
            other => Err(OutboxError::InvalidRecord(format!(
                "unknown state code {other}"
            ))),
        }
    }

    /// Legal edges of the outbox DAG. Sent → Sent is a permitted
    /// re-attempt: the publisher marks Sent before publishing and may
    /// crash in between.
    pub fn can_transition(self, to: OutboxState) -> bool {
        use OutboxState::*;
        matches!(
            (self, to),
            (New, Sent) | (Failed, Sent) | (Sent, Sent) | (Sent, Acked) | (Sent, Failed)
        )
    }
}

impl std::fmt::Display for OutboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutboxState::New => "NEW",
            OutboxState::Sent => "SENT",
            OutboxState::Acked => "ACKED",
            OutboxState::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub state: OutboxState,
    pub retries: u32,
    pub last_attempt_ns: u64,
    pub payload: Vec<u8>,
}

impl OutboxRecord {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VALUE_HEADER_LEN + self.payload.len());
        buf.push(self.state.as_u8());
        buf.extend_from_slice(&self.retries.to_be_bytes());
        buf.extend_from_slice(&self.last_attempt_ns.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, OutboxError> {
        if buf.len() < VALUE_HEADER_LEN {
            return Err(OutboxError::InvalidRecord(format!(
                "value is {} bytes, need at least {}",
                buf.len(),
                VALUE_HEADER_LEN
            )));
        }
        let state = OutboxState::from_u8(buf[0])?;
        let retries = u32::from_be_bytes(
            buf[1..5]
                .try_into()
                .map_err(|_| OutboxError::InvalidRecord("retries slice".into()))?,
        );
        let last_attempt_ns = u64::from_be_bytes(
            buf[5..13]
                .try_into()
                .map_err(|_| OutboxError::InvalidRecord("last_attempt slice".into()))?,
        );
        Ok(Self {
            state,
            retries,
            last_attempt_ns,
            payload: buf[VALUE_HEADER_LEN..].to_vec(),
        })
    }
}

/// The durable outbox. Cheap to clone; safe to share with the
/// publisher thread.
#[derive(Clone)]
pub struct Outbox {
    db: sled::Db,
}

impl Outbox {
    pub fn open(dir: &Path) -> Result<Self, OutboxError> {
        let db = sled::open(dir)?;
        Ok(Self { db })
    }

    /// Insert a fresh entry in state New. Called by the place pipeline
    /// after matching.
    pub fn put_new(&self, seq: u64, payload: Vec<u8>) -> Result<(), OutboxError> {
        let record = OutboxRecord {
            state: OutboxState::New,
            retries: 0,
            last_attempt_ns: 0,
            payload,
        };
        self.db.insert(key_for(seq), record.encode())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get(&self, seq: u64) -> Result<Option<OutboxRecord>, OutboxError> {
        match self.db.get(key_for(seq))? {
            Some(value) => Ok(Some(OutboxRecord::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Transition an entry, refusing edges outside the DAG.
    pub fn mark(
        &self,
        seq: u64,
        state: OutboxState,
        retries: u32,
        attempted_at_ns: u64,
    ) -> Result<(), OutboxError> {
        let current = self.get(seq)?.ok_or(OutboxError::NotFound { seq })?;
        if !current.state.can_transition(state) {
            return Err(OutboxError::IllegalTransition {
                seq,
                from: current.state,
                to: state,
            });
        }
        let record = OutboxRecord {
            state,
            retries,
            last_attempt_ns: attempted_at_ns,
            payload: current.payload,
        };
        self.db.insert(key_for(seq), record.encode())?;
        self.db.flush()?;
        Ok(())
    }

    /// Visit entries whose state is not Acked, in seq order.
    pub fn scan_pending(
        &self,
        mut visit: impl FnMut(u64, &OutboxRecord) -> Result<(), OutboxError>,
    ) -> Result<(), OutboxError> {
        for item in self.db.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (key, value) = item?;
            let record = OutboxRecord::decode(&value)?;
            if record.state == OutboxState::Acked {
                continue;
            }
            let seq = parse_key(&key)?;
            visit(seq, &record)?;
        }
        Ok(())
    }

    /// Delete Acked entries with seq `<=` the given bound. Returns the
    /// number removed.
    pub fn truncate_acked_up_to(&self, seq: u64) -> Result<usize, OutboxError> {
        let mut removed = 0usize;
        for item in self.db.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (key, value) = item?;
            let entry_seq = parse_key(&key)?;
            if entry_seq > seq {
                break;
            }
            let record = OutboxRecord::decode(&value)?;
            if record.state == OutboxState::Acked {
                self.db.remove(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.flush()?;
        }
        Ok(removed)
    }

    /// Number of entries currently stored (any state).
    pub fn len(&self) -> usize {
        self.db.scan_prefix(KEY_PREFIX.as_bytes()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_for(seq: u64) -> Vec<u8> {
    format!("{KEY_PREFIX}{seq:020}").into_bytes()
}

fn parse_key(key: &[u8]) -> Result<u64, OutboxError> {
    let text = std::str::from_utf8(key)
        .map_err(|_| OutboxError::InvalidRecord("non-utf8 key".into()))?;
    text.strip_prefix(KEY_PREFIX)
        .and_then(|digits| digits.parse::<u64>().ok())
        .ok_or_else(|| OutboxError::InvalidRecord(format!("malformed key {text:?}")))
}
