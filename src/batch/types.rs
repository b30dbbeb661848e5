use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

/// One trade document exactly as the client sent it.
///
/// The raw JSON text is kept and written back out untouched; nothing here
/// looks inside the object.
#[derive(Debug, Clone)]
pub struct TradeRecord(Box<RawValue>);

impl TradeRecord {
    /// Accepts a JSON object body. Anything else (arrays, scalars, malformed
    /// text) is rejected.
    pub fn from_json_bytes(body: &[u8]) -> Result<Self, RecordError> {
        let raw: Box<RawValue> =
            serde_json::from_slice(body).map_err(|e| RecordError::Malformed(e.to_string()))?;
        if !raw.get().starts_with('{') {
            return Err(RecordError::NotAnObject);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for TradeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for TradeRecord {}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("trade must be a JSON object")]
    NotAnObject,
}

/// Records captured by one drain, plus the window they cover.
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<TradeRecord>,
    pub captured_at: DateTime<Utc>,
    pub start_time: u64,
    pub end_time: u64,
}

impl Batch {
    /// `end_time` is pushed to `start_time + 1` if the clock has not moved a
    /// whole second since the window opened.
    pub fn new(records: Vec<TradeRecord>, captured_at: DateTime<Utc>, start_time: u64) -> Self {
        let now = captured_at.timestamp().max(0) as u64;
        let end_time = now.max(start_time + 1);
        Self { records, captured_at, start_time, end_time }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compact JSON array of the raw records in ingestion order, newline
    /// terminated. This is the byte form that goes to disk and to the store.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let capacity = self.records.iter().map(|r| r.as_str().len() + 1).sum::<usize>() + 3;
        let mut out = Vec::with_capacity(capacity);
        out.push(b'[');
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(record.as_str().as_bytes());
        }
        out.extend_from_slice(b"]\n");
        out
    }

    pub fn into_records(self) -> Vec<TradeRecord> {
        self.records
    }
}

/// Content identifier handed back by the store. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cid(String);

impl Cid {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PublishedBatch {
    pub batch: Batch,
    pub cid: Cid,
}

impl PublishedBatch {
    pub fn commit_record(&self) -> LedgerCommitRecord {
        LedgerCommitRecord {
            start_time: self.batch.start_time,
            end_time: self.batch.end_time,
            cid: self.cid.clone(),
        }
    }
}

/// The `(startTime, endTime, cid)` tuple written on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommitRecord {
    pub start_time: u64,
    pub end_time: u64,
    pub cid: Cid,
}
