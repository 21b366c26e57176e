use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;
use parking_lot::Mutex;

use crate::constants::LOG_TARGET;
use crate::types::ConnectionError;
use super::RawConnection;

/// State both ends of a pair can see.
#[derive(Debug, Default)]
struct PairState {
    closed: [AtomicBool; 2],
    reset: AtomicBool,
}

/// In-memory transport: two ends joined by a pair of channels.
///
/// Every `write` is one channel message, so concurrent writers can never
/// interleave inside a frame.
pub struct MemoryConnection {
    side: usize,
    tx: Mutex<Option<Sender<Bytes>>>,
    rx: Receiver<Bytes>,
    leftover: Mutex<BytesMut>,
    state: Arc<PairState>,
}

impl MemoryConnection {
    /// Build a connected pair. The first end is the initiator.
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        let (a_tx, b_rx) = unbounded::<Bytes>();
        let (b_tx, a_rx) = unbounded::<Bytes>();
        let state = Arc::new(PairState::default());

        let a = MemoryConnection {
            side: 0,
            tx: Mutex::new(Some(a_tx)),
            rx: a_rx,
            leftover: Mutex::new(BytesMut::new()),
            state: state.clone(),
        };
        let b = MemoryConnection {
            side: 1,
            tx: Mutex::new(Some(b_tx)),
            rx: b_rx,
            leftover: Mutex::new(BytesMut::new()),
            state,
        };
        (a, b)
    }

    /// Simulate an abrupt reset: both ends see `ConnectionError::Reset`.
    pub fn reset(&self) {
        debug!(target: LOG_TARGET, "memory transport side {} reset", self.side);
        self.state.reset.store(true, Ordering::SeqCst);
        self.tx.lock().take();
    }

    fn peer_closed(&self) -> bool {
        self.state.closed[1 - self.side].load(Ordering::SeqCst)
    }
}

impl RawConnection for MemoryConnection {
    fn is_initiator(&self) -> bool {
        self.side == 0
    }

    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Option<Bytes>, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.state.reset.load(Ordering::SeqCst) {
            return Err(ConnectionError::Reset);
        }
        let max_bytes = max_bytes.max(1);

        {
            let mut leftover = self.leftover.lock();
            if !leftover.is_empty() {
                let n = leftover.len().min(max_bytes);
                return Ok(Some(leftover.split_to(n).freeze()));
            }
        }

        match self.rx.recv_timeout(timeout) {
            Ok(chunk) if chunk.len() > max_bytes => {
                self.leftover.lock().extend_from_slice(&chunk[max_bytes..]);
                Ok(Some(chunk.slice(..max_bytes)))
            }
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if self.state.reset.load(Ordering::SeqCst) {
                    Err(ConnectionError::Reset)
                } else {
                    Err(ConnectionError::Closed)
                }
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.state.reset.load(Ordering::SeqCst) || self.peer_closed() {
            return Err(ConnectionError::Reset);
        }
        if data.is_empty() {
            return Ok(());
        }

        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(ConnectionError::Closed)?;
        tx.send(Bytes::copy_from_slice(data))
            .map_err(|_| ConnectionError::Reset)
    }

    fn close(&self) -> Result<(), ConnectionError> {
        if self.state.closed[self.side].swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(target: LOG_TARGET, "memory transport side {} closed", self.side);
        self.tx.lock().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.closed[self.side].load(Ordering::SeqCst)
    }
}
