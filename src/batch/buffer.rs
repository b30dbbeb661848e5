use parking_lot::Mutex;

use crate::batch::types::TradeRecord;

/// Pending trades waiting for the next batch cycle.
///
/// Every mutation goes through one lock that is only ever held for in-memory
/// list operations, so ingestion never waits on the network.
pub trait TradeBuffer: Send + Sync {
    fn append(&self, record: TradeRecord);

    /// Takes every buffered record, leaving the buffer empty. `None` when
    /// there was nothing to take.
    fn drain_all(&self) -> Option<Vec<TradeRecord>>;

    /// Puts records from a failed cycle back in front of anything that
    /// arrived after they were drained.
    fn requeue(&self, records: Vec<TradeRecord>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryTradeBuffer {
    pending: Mutex<Vec<TradeRecord>>,
}

impl MemoryTradeBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeBuffer for MemoryTradeBuffer {
    fn append(&self, record: TradeRecord) {
        self.pending.lock().push(record);
    }

    fn drain_all(&self) -> Option<Vec<TradeRecord>> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *pending))
    }

    fn requeue(&self, mut records: Vec<TradeRecord>) {
        if records.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        records.append(&mut pending);
        *pending = records;
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}
