use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, RecvError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;

use crate::mplex::framing::Flag;
use super::StreamId;

/// Which side opened the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Opened locally via `open_stream`.
    Initiator,
    /// Discovered from an inbound frame.
    Receiver,
}

impl Direction {
    pub const fn message_flag(self) -> Flag {
        match self {
            Direction::Initiator => Flag::MessageInitiator,
            Direction::Receiver => Flag::MessageReceiver,
        }
    }

    pub const fn close_flag(self) -> Flag {
        match self {
            Direction::Initiator => Flag::CloseInitiator,
            Direction::Receiver => Flag::CloseReceiver,
        }
    }

    pub const fn reset_flag(self) -> Flag {
        match self {
            Direction::Initiator => Flag::ResetInitiator,
            Direction::Receiver => Flag::ResetReceiver,
        }
    }
}

/// Stream lifecycle. `Closed` and `Reset` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Open,
    Closed,
    Reset,
}

impl StreamState {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, StreamState::Open)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Open => "open",
            StreamState::Closed => "closed",
            StreamState::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Result of handing an inbound chunk to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue at capacity; the chunk was not queued.
    Full,
    /// Stream already terminal; the chunk was dropped.
    Terminal,
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryRead {
    Data(Bytes),
    Empty,
    /// Terminal and fully drained.
    Finished,
}

/// Per-stream state shared by the table, the demux loop and stream handles.
///
/// The record owns the sending half of the inbound queue. A terminal
/// transition drops it, which is the end-of-stream marker: readers drain
/// what is queued, then observe disconnection.
///
/// The queue grows on demand and `capacity` is enforced on push, so an idle
/// stream costs no buffer space.
pub struct StreamRecord {
    id: StreamId,
    direction: Direction,
    capacity: usize,
    state: Mutex<StreamState>,
    inbound_tx: Mutex<Option<Sender<Bytes>>>,
    inbound_rx: Receiver<Bytes>,
    /// Set when the whole connection went away under this stream.
    severed: AtomicBool,
}

impl StreamRecord {
    pub fn new(id: StreamId, direction: Direction, capacity: usize) -> Self {
        let (tx, rx) = unbounded::<Bytes>();
        Self {
            id,
            direction,
            capacity: capacity.max(1),
            state: Mutex::new(StreamState::Open),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: rx,
            severed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }

    /// Chunks waiting to be read.
    pub fn queued(&self) -> usize {
        self.inbound_rx.len()
    }

    pub fn is_drained(&self) -> bool {
        self.inbound_rx.is_empty()
    }

    /// Enqueue an inbound chunk without ever blocking.
    ///
    /// Holding the sender lock makes the length check and the send atomic
    /// with respect to other pushers.
    pub fn push(&self, chunk: Bytes) -> PushOutcome {
        let tx = self.inbound_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return PushOutcome::Terminal;
        };
        if tx.len() >= self.capacity {
            return PushOutcome::Full;
        }
        match tx.try_send(chunk) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => PushOutcome::Full,
            Err(TrySendError::Disconnected(_)) => PushOutcome::Terminal,
        }
    }

    /// Move `Open -> state`. Returns false if already terminal.
    pub fn finish(&self, state: StreamState) -> bool {
        debug_assert!(state.is_terminal());
        let mut current = self.state.lock();
        if current.is_terminal() {
            return false;
        }
        *current = state;
        self.inbound_tx.lock().take();
        true
    }

    /// Connection teardown: force `Reset` and remember why.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
        let mut current = self.state.lock();
        if !current.is_terminal() {
            *current = StreamState::Reset;
        }
        self.inbound_tx.lock().take();
    }

    /// Block until a chunk arrives. `None` once terminal and drained.
    pub fn recv(&self) -> Option<Bytes> {
        match self.inbound_rx.recv() {
            Ok(chunk) => Some(chunk),
            Err(RecvError) => None,
        }
    }

    pub fn try_recv(&self) -> TryRead {
        match self.inbound_rx.try_recv() {
            Ok(chunk) => TryRead::Data(chunk),
            Err(TryRecvError::Empty) => TryRead::Empty,
            Err(TryRecvError::Disconnected) => TryRead::Finished,
        }
    }
}

impl fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRecord")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .field("severed", &self.is_severed())
            .finish()
    }
}
