//! mplex/core.rs
//! Multiplexer core: open/accept/close orchestration and the send path.
//!
//! Responsibilities:
//! - Own the stream table, id allocator and handler for one connection
//! - Serialize nothing itself: every frame is one `RawConnection::write`
//! - Tear the connection down exactly once, from whichever thread notices
//!
//! Non-responsibilities:
//! - Reading the transport (see `demux`)
//! - Interpreting payloads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::constants::{LOG_TARGET, MPLEX_PROTOCOL_ID};
use crate::mplex::config::MplexConfig;
use crate::mplex::demux;
use crate::mplex::framing::{encode_frame, Flag};
use crate::mplex::stream::{
    PushOutcome, StreamHandle, StreamId, StreamIdAllocator, StreamRecord, StreamState, StreamTable, TryRead,
};
use crate::telemetry::{MuxCounters, TelemetrySnapshot};
use crate::transport::RawConnection;
use crate::types::{ConnectionError, MplexError};

/// Callback receiving every stream the peer opens. Runs on its own thread.
pub type StreamHandler = Arc<dyn Fn(StreamHandle) + Send + Sync + 'static>;

/// Why an inbound frame was not bound to a stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum RemoteRefusal {
    #[error("connection is shutting down")]
    Closed,

    /// Unknown id from this side's own id space, e.g. a stream already evicted.
    #[error("id belongs to a local stream that no longer exists")]
    LocalId,

    #[error("too many unannounced peer streams")]
    TooManyPending,
}

// ============================================================
// Shared core
// ============================================================

/// State shared by the façade, the demux thread and every stream handle.
pub struct MuxCore {
    conn: Arc<dyn RawConnection>,
    streams: Mutex<StreamTable>,
    ids: StreamIdAllocator,
    handler: StreamHandler,
    config: MplexConfig,
    closed: AtomicBool,
    counters: Mutex<MuxCounters>,
    started: Instant,
}

impl MuxCore {
    fn new(conn: Arc<dyn RawConnection>, handler: StreamHandler, config: MplexConfig) -> Self {
        let ids = StreamIdAllocator::new(conn.is_initiator());
        Self {
            conn,
            streams: Mutex::new(StreamTable::new()),
            ids,
            handler,
            config,
            closed: AtomicBool::new(false),
            counters: Mutex::new(MuxCounters::default()),
            started: Instant::now(),
        }
    }

    pub(crate) fn conn(&self) -> &Arc<dyn RawConnection> {
        &self.conn
    }

    pub(crate) fn config(&self) -> &MplexConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.conn.is_closed()
    }

    // ---- Send path ----

    /// Encode one frame and write it. Returns the frame's wire length.
    ///
    /// A transport failure tears the whole connection down before the
    /// error is handed back to the caller.
    pub fn send_message(&self, flag: u8, data: &[u8], stream_id: StreamId) -> Result<usize, MplexError> {
        let wire = encode_frame(stream_id, flag, data)?;

        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        match self.conn.write(&wire) {
            Ok(()) => {
                self.counters.lock().add_outbound(data.len(), wire.len());
                trace!(target: LOG_TARGET, "sent flag={} stream={} len={}", flag, stream_id, data.len());
                Ok(wire.len())
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "write on stream {} failed: {}", stream_id, e);
                self.teardown(&format!("write failed: {e}"));
                Err(e.into())
            }
        }
    }

    // ---- Open / accept ----

    pub(crate) fn open_stream(self: &Arc<Self>, protocol_id: Option<String>) -> Result<StreamHandle, MplexError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }

        let id = self.ids.allocate()?;
        let record = self.streams.lock().insert_local(id, self.config.max_buffered_chunks);

        // The record exists before the peer can answer on it.
        if let Err(e) = self.send_message(Flag::NewStream.to_u8(), &[], id) {
            self.streams.lock().remove(id);
            return Err(e);
        }

        self.counters.lock().add_opened();
        debug!(
            target: LOG_TARGET,
            "opened stream {} ({})",
            id,
            protocol_id.as_deref().unwrap_or("-")
        );
        Ok(StreamHandle::new(record, Arc::clone(self), protocol_id))
    }

    /// Hand a peer-announced stream to the handler on its own thread.
    ///
    /// Returns `Ok(false)` when `id` was not awaiting acceptance (a repeated
    /// NewStream, or one naming a locally opened stream).
    pub(crate) fn accept_stream(self: &Arc<Self>, id: StreamId) -> Result<bool, MplexError> {
        let record = {
            let mut table = self.streams.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(ConnectionError::Closed.into());
            }
            if !table.take_pending(id) {
                return Ok(false);
            }
            table.lookup(id)?
        };

        self.counters.lock().add_accepted();
        debug!(target: LOG_TARGET, "accepted stream {}", id);

        let handle = StreamHandle::new(record, Arc::clone(self), None);
        let handler = Arc::clone(&self.handler);
        thread::Builder::new()
            .name(format!("mplex-stream-{id}"))
            .spawn(move || handler(handle))?;
        Ok(true)
    }

    // ---- Demux-side routing ----

    /// Bind an inbound frame to its record, creating one for a new peer id.
    ///
    /// `announced` is true for a NewStream frame. Ids first seen on a data
    /// frame count against `max_pending_streams` until they are announced.
    pub(crate) fn observe_remote(
        &self,
        id: StreamId,
        announced: bool,
    ) -> Result<(Arc<StreamRecord>, bool), RemoteRefusal> {
        let mut table = self.streams.lock();
        // Teardown sets `closed` before it drains the table.
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteRefusal::Closed);
        }
        if let Some(record) = table.get(id) {
            return Ok((record, false));
        }
        if self.ids.is_local(id) {
            return Err(RemoteRefusal::LocalId);
        }
        if !announced && table.pending_len() >= self.config.max_pending_streams {
            return Err(RemoteRefusal::TooManyPending);
        }
        Ok(table.observe_remote(id, self.config.max_buffered_chunks))
    }

    /// Queue an inbound payload without ever blocking the demux thread.
    pub(crate) fn deliver(&self, record: &Arc<StreamRecord>, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        match record.push(payload) {
            PushOutcome::Queued => {}
            PushOutcome::Full => {
                warn!(
                    target: LOG_TARGET,
                    "stream {} inbound queue full ({} chunks); resetting",
                    record.id(),
                    self.config.max_buffered_chunks
                );
                if let Err(e) = self.reset_record(record) {
                    debug!(target: LOG_TARGET, "reset of stream {} not sent: {}", record.id(), e);
                }
            }
            PushOutcome::Terminal => {
                debug!(
                    target: LOG_TARGET,
                    "dropping data for {} stream {}",
                    record.state(),
                    record.id()
                );
                self.counters.lock().add_ignored();
            }
        }
    }

    /// Apply a Close or Reset frame from the peer.
    pub(crate) fn remote_finish(&self, id: StreamId, state: StreamState) {
        let Some(record) = self.streams.lock().get(id) else {
            debug!(target: LOG_TARGET, "ignoring {} for unknown stream {}", state, id);
            self.counters.lock().add_ignored();
            return;
        };

        if !record.finish(state) {
            self.counters.lock().add_ignored();
            return;
        }
        self.count_finish(state);
        debug!(target: LOG_TARGET, "stream {} {} by peer", id, state);
        self.streams.lock().evict_if_drained(id);
    }

    pub(crate) fn record_inbound(&self, payload_len: usize, frame_len: usize) {
        self.counters.lock().add_inbound(payload_len, frame_len);
    }

    pub(crate) fn record_ignored(&self) {
        self.counters.lock().add_ignored();
    }

    fn count_finish(&self, state: StreamState) {
        let mut counters = self.counters.lock();
        match state {
            StreamState::Closed => counters.add_closed(),
            StreamState::Reset => counters.add_reset(),
            StreamState::Open => {}
        }
    }

    // ---- Per-stream operations (called through StreamHandle) ----

    pub(crate) fn write_record(&self, record: &StreamRecord, data: &[u8]) -> Result<usize, MplexError> {
        if self.is_closed() || record.is_severed() {
            return Err(ConnectionError::Closed.into());
        }
        match record.state() {
            StreamState::Open => self.send_message(record.direction().message_flag().to_u8(), data, record.id()),
            StreamState::Closed => Err(MplexError::StreamClosed(record.id())),
            StreamState::Reset => Err(MplexError::StreamReset(record.id())),
        }
    }

    pub(crate) fn close_record(&self, record: &StreamRecord) -> Result<(), MplexError> {
        self.finish_local(record, StreamState::Closed, record.direction().close_flag())
    }

    pub(crate) fn reset_record(&self, record: &StreamRecord) -> Result<(), MplexError> {
        self.finish_local(record, StreamState::Reset, record.direction().reset_flag())
    }

    fn finish_local(&self, record: &StreamRecord, state: StreamState, flag: Flag) -> Result<(), MplexError> {
        if record.is_severed() {
            return Err(ConnectionError::Closed.into());
        }
        // Only the first terminal transition sends a frame.
        if !record.finish(state) {
            return Ok(());
        }
        self.count_finish(state);
        debug!(target: LOG_TARGET, "stream {} {} locally", record.id(), state);

        let sent = self.send_message(flag.to_u8(), &[], record.id()).map(|_| ());
        self.streams.lock().evict_if_drained(record.id());
        sent
    }

    pub(crate) fn read_record(&self, record: &StreamRecord) -> Result<Option<Bytes>, MplexError> {
        match record.recv() {
            Some(chunk) => Ok(Some(chunk)),
            None => self.end_of_stream(record),
        }
    }

    pub(crate) fn try_read_record(&self, record: &StreamRecord) -> Result<Option<Bytes>, MplexError> {
        match record.try_recv() {
            TryRead::Data(chunk) => Ok(Some(chunk)),
            TryRead::Empty => Ok(None),
            TryRead::Finished => self.end_of_stream(record),
        }
    }

    /// The queue is terminal and drained: evict, then report why it ended.
    fn end_of_stream(&self, record: &StreamRecord) -> Result<Option<Bytes>, MplexError> {
        self.streams.lock().evict_if_drained(record.id());

        if record.is_severed() {
            return Err(ConnectionError::Closed.into());
        }
        match record.state() {
            StreamState::Reset => Err(MplexError::StreamReset(record.id())),
            StreamState::Closed | StreamState::Open => Ok(None),
        }
    }

    /// A handle went away; a terminal record has no reader left.
    pub(crate) fn release_record(&self, record: &StreamRecord) {
        if record.state().is_terminal() {
            let mut table = self.streams.lock();
            if table.get(record.id()).is_some_and(|r| std::ptr::eq(Arc::as_ptr(&r), record)) {
                table.remove(record.id());
            }
        }
    }

    // ---- Lookups by id ----

    pub(crate) fn lookup(&self, id: StreamId) -> Result<Arc<StreamRecord>, MplexError> {
        self.streams.lock().lookup(id)
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    // ---- Teardown ----

    /// Close the transport and sever every stream. Runs once.
    pub(crate) fn teardown(&self, cause: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: LOG_TARGET, "tearing down connection: {}", cause);

        if let Err(e) = self.conn.close() {
            debug!(target: LOG_TARGET, "transport close failed: {}", e);
        }

        let records = self.streams.lock().drain_all();
        let severed = records.len();
        for record in records {
            record.sever();
        }
        debug!(target: LOG_TARGET, "severed {} streams", severed);
    }

    pub(crate) fn telemetry(&self) -> TelemetrySnapshot {
        let counters = self.counters.lock().clone();
        TelemetrySnapshot::from(&counters, self.started.elapsed(), self.stream_count())
    }
}

// ============================================================
// Public façade
// ============================================================

/// One multiplexed connection.
///
/// Owns the demultiplex thread. Dropping it closes the connection.
pub struct Mplex {
    core: Arc<MuxCore>,
    demux: Mutex<Option<JoinHandle<()>>>,
}

impl Mplex {
    /// Start multiplexing over `conn`.
    ///
    /// `handler` receives each stream the peer opens, on a dedicated thread.
    pub fn new<F>(conn: Arc<dyn RawConnection>, handler: F, config: MplexConfig) -> Result<Self, MplexError>
    where
        F: Fn(StreamHandle) + Send + Sync + 'static,
    {
        config.validate()?;

        let core = Arc::new(MuxCore::new(conn, Arc::new(handler), config));
        let demux = demux::spawn(Arc::clone(&core))?;
        info!(
            target: LOG_TARGET,
            "{} started (initiator={})",
            MPLEX_PROTOCOL_ID,
            core.conn.is_initiator()
        );

        Ok(Self {
            core,
            demux: Mutex::new(Some(demux)),
        })
    }

    pub fn with_defaults<F>(conn: Arc<dyn RawConnection>, handler: F) -> Result<Self, MplexError>
    where
        F: Fn(StreamHandle) + Send + Sync + 'static,
    {
        Self::new(conn, handler, MplexConfig::default())
    }

    /// Identifier negotiated for this multiplexer.
    pub fn protocol_id() -> &'static str {
        MPLEX_PROTOCOL_ID
    }

    pub fn is_initiator(&self) -> bool {
        self.core.conn.is_initiator()
    }

    pub fn config(&self) -> &MplexConfig {
        &self.core.config
    }

    /// Open a new outbound stream. Safe to call from many threads at once.
    pub fn open_stream(&self, protocol_id: Option<&str>) -> Result<StreamHandle, MplexError> {
        self.core.open_stream(protocol_id.map(str::to_owned))
    }

    /// Raw send path: one frame with an explicit flag.
    pub fn send_message(&self, flag: Flag, data: &[u8], stream_id: StreamId) -> Result<usize, MplexError> {
        self.core.send_message(flag.to_u8(), data, stream_id)
    }

    /// Blocking read on a stream by id.
    pub fn read_buffer(&self, id: StreamId) -> Result<Option<Bytes>, MplexError> {
        let record = self.core.lookup(id)?;
        self.core.read_record(&record)
    }

    pub fn read_buffer_nonblocking(&self, id: StreamId) -> Result<Option<Bytes>, MplexError> {
        let record = self.core.lookup(id)?;
        self.core.try_read_record(&record)
    }

    /// Close the connection, sever every stream and stop the demux thread. Idempotent.
    pub fn close(&self) {
        self.core.teardown("closed locally");

        let Some(demux) = self.demux.lock().take() else {
            return;
        };
        if demux.thread().id() == thread::current().id() {
            return;
        }
        if demux.join().is_err() {
            error!(target: LOG_TARGET, "demux thread panicked");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Streams currently tracked (open, or terminal with unread data).
    pub fn stream_count(&self) -> usize {
        self.core.stream_count()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.core.telemetry()
    }
}

impl Drop for Mplex {
    fn drop(&mut self) {
        self.close();
    }
}
