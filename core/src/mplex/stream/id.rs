use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::MAX_STREAM_ID;
use crate::types::MplexError;
use super::StreamId;

/// Lock-free, connection-wide stream id counter.
///
/// The initiator hands out even ids and the listener odd ids, so ids opened
/// by the two peers never collide in the shared table.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicU64,
}

impl StreamIdAllocator {
    const STEP: u64 = 2;

    pub fn new(initiator: bool) -> Self {
        Self {
            next: AtomicU64::new(if initiator { 0 } else { 1 }),
        }
    }

    /// Allocate the next id. Safe to call from any number of threads.
    pub fn allocate(&self) -> Result<StreamId, MplexError> {
        let id = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > MAX_STREAM_ID {
                    None
                } else {
                    Some(n.saturating_add(Self::STEP))
                }
            })
            .map_err(|_| MplexError::StreamIdsExhausted)?;
        Ok(id)
    }

    /// Whether `id` has the parity this side allocates from.
    pub fn is_local(&self, id: StreamId) -> bool {
        // Every allocation steps by two, so the counter keeps its parity.
        id % Self::STEP == self.next.load(Ordering::Relaxed) % Self::STEP
    }

    #[cfg(test)]
    fn starting_at(next: u64) -> Self {
        Self { next: AtomicU64::new(next) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_follows_role() {
        let dialer = StreamIdAllocator::new(true);
        let listener = StreamIdAllocator::new(false);

        assert_eq!(dialer.allocate().unwrap(), 0);
        assert_eq!(dialer.allocate().unwrap(), 2);
        assert_eq!(listener.allocate().unwrap(), 1);
        assert_eq!(listener.allocate().unwrap(), 3);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let alloc = StreamIdAllocator::starting_at(MAX_STREAM_ID);
        assert_eq!(alloc.allocate().unwrap(), MAX_STREAM_ID);
        assert!(matches!(alloc.allocate(), Err(MplexError::StreamIdsExhausted)));
    }

    #[test]
    fn locality_is_decided_by_parity() {
        let dialer = StreamIdAllocator::new(true);
        assert!(dialer.is_local(0));
        assert!(dialer.is_local(42));
        assert!(!dialer.is_local(7));

        let listener = StreamIdAllocator::new(false);
        listener.allocate().unwrap();
        assert!(listener.is_local(3));
        assert!(!listener.is_local(0));
    }
}
