use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::types::MplexError;
use super::record::{Direction, StreamRecord};
use super::StreamId;

/// Stream id -> record, plus ids observed from the peer but not yet accepted.
///
/// Not synchronized itself; the multiplexer keeps it behind one mutex.
#[derive(Debug, Default)]
pub struct StreamTable {
    records: HashMap<StreamId, Arc<StreamRecord>>,
    pending: VecDeque<StreamId>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get(&self, id: StreamId) -> Option<Arc<StreamRecord>> {
        self.records.get(&id).cloned()
    }

    /// Lookup that fails with `StreamNotFound`.
    pub fn lookup(&self, id: StreamId) -> Result<Arc<StreamRecord>, MplexError> {
        self.get(id).ok_or(MplexError::StreamNotFound(id))
    }

    /// Register a locally opened stream.
    pub fn insert_local(&mut self, id: StreamId, capacity: usize) -> Arc<StreamRecord> {
        let record = Arc::new(StreamRecord::new(id, Direction::Initiator, capacity));
        self.records.insert(id, record.clone());
        record
    }

    /// Return the record for a peer-observed id, creating it (and queueing the
    /// id for acceptance) on first sight. The flag reports creation.
    pub fn observe_remote(&mut self, id: StreamId, capacity: usize) -> (Arc<StreamRecord>, bool) {
        if let Some(record) = self.records.get(&id) {
            return (record.clone(), false);
        }
        let record = Arc::new(StreamRecord::new(id, Direction::Receiver, capacity));
        self.records.insert(id, record.clone());
        self.pending.push_back(id);
        (record, true)
    }

    /// Take `id` out of the pending queue. False if it was not pending.
    pub fn take_pending(&mut self, id: StreamId) -> bool {
        match self.pending.iter().position(|p| *p == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Arc<StreamRecord>> {
        self.pending.retain(|p| *p != id);
        self.records.remove(&id)
    }

    /// Remove `id` if it is terminal with an empty queue.
    pub fn evict_if_drained(&mut self, id: StreamId) -> bool {
        let drained = match self.records.get(&id) {
            Some(r) => r.state().is_terminal() && r.is_drained(),
            None => return false,
        };
        if drained {
            self.remove(id);
        }
        drained
    }

    /// Empty the table, handing back every record (connection teardown).
    pub fn drain_all(&mut self) -> Vec<Arc<StreamRecord>> {
        self.pending.clear();
        self.records.drain().map(|(_, r)| r).collect()
    }
}
