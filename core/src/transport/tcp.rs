use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::constants::{LOG_TARGET, MIN_READ_TIMEOUT};
use crate::types::ConnectionError;
use super::RawConnection;

/// Socket-backed transport.
///
/// Writers append whole frames to `pending` under a short lock, then drain
/// through `drain_gate`. Only one thread writes to the socket at a time, so
/// frames from concurrent writers never interleave on the wire.
pub struct TcpConnection {
    initiator: bool,
    reader: Mutex<ReadHalf>,
    pending: Mutex<BytesMut>,
    drain_gate: Mutex<TcpStream>,
    /// Unlocked handle so `close` never waits behind a blocked writer.
    control: TcpStream,
    closed: AtomicBool,
    broken: AtomicBool,
}

/// Socket plus a receive buffer reused across reads. Each returned chunk is
/// split off the front; the allocation is reclaimed once readers drop it.
struct ReadHalf {
    stream: TcpStream,
    buf: BytesMut,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, initiator: bool) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self {
            initiator,
            reader: Mutex::new(ReadHalf { stream, buf: BytesMut::new() }),
            pending: Mutex::new(BytesMut::new()),
            drain_gate: Mutex::new(writer),
            control,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        })
    }

    /// Dial `addr`; the dialing side is the initiator.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::new(stream, true)
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.control.peer_addr()
    }

    fn mark_broken(&self, err: &ConnectionError) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            warn!(target: LOG_TARGET, "tcp transport failed: {}", err);
        }
    }
}

impl RawConnection for TcpConnection {
    fn is_initiator(&self) -> bool {
        self.initiator
    }

    fn read(&self, max_bytes: usize, timeout: Duration) -> Result<Option<Bytes>, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        let mut half = self.reader.lock();
        let ReadHalf { stream, buf } = &mut *half;
        // A zero timeout means "block forever" to the OS; never pass it through.
        stream.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;

        let want = max_bytes.max(1);
        if buf.len() < want {
            buf.resize(want, 0);
        }
        match stream.read(&mut buf[..want]) {
            Ok(0) => Err(ConnectionError::Closed),
            Ok(n) => Ok(Some(buf.split_to(n).freeze())),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                let err = ConnectionError::from(e);
                self.mark_broken(&err);
                Err(err)
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(ConnectionError::Reset);
        }

        // ---- Buffer fill (not serialized against other fills' drains) ----
        self.pending.lock().extend_from_slice(data);

        // ---- Drain: one writer at a time ----
        let mut sock = self.drain_gate.lock();
        let chunk = self.pending.lock().split().freeze();
        if !chunk.is_empty() {
            let mut res = sock.write_all(&chunk);
            if res.is_ok() {
                res = sock.flush();
            }
            if let Err(e) = res {
                let err = ConnectionError::from(e);
                self.mark_broken(&err);
                return Err(err);
            }
        }

        // Our bytes may have been drained by another writer that then failed.
        if self.broken.load(Ordering::SeqCst) {
            return Err(ConnectionError::Reset);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(target: LOG_TARGET, "closing tcp transport");
        match self.control.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(ConnectionError::from(e)),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
