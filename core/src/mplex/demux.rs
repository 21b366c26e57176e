//! mplex/demux.rs
//! The demultiplex loop: sole reader of the transport.
//!
//! Each iteration decodes at most one frame (bounded wait), routes it to its
//! stream record, then yields. The loop never waits on a stream consumer:
//! full queues get their stream reset instead.
//!
//! Any decode or transport error ends the loop and tears the connection down.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace, warn};

use crate::constants::LOG_TARGET;
use crate::mplex::core::{MuxCore, RemoteRefusal};
use crate::mplex::framing::{Flag, Frame, FrameReader};
use crate::mplex::stream::{StreamId, StreamState};
use crate::types::MplexError;

pub(crate) fn spawn(core: Arc<MuxCore>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mplex-demux".into())
        .spawn(move || run(core))
}

fn run(core: Arc<MuxCore>) {
    let config = core.config().clone();
    let mut reader = FrameReader::new(Arc::clone(core.conn()), config.max_frame_len, config.read_chunk_size);
    debug!(target: LOG_TARGET, "demux loop started");

    let failure: Option<MplexError> = loop {
        if core.is_closed() {
            break None;
        }

        match reader.next_frame(config.read_timeout) {
            Ok(Some(frame)) => dispatch(&core, frame),
            Ok(None) => {}
            Err(e) => break Some(e),
        }

        thread::yield_now();
    };

    match failure {
        Some(e) if core.is_closed() => {
            debug!(target: LOG_TARGET, "demux loop stopped after close: {}", e);
        }
        Some(e) => {
            match &e {
                MplexError::FrameDecode(_) => error!(target: LOG_TARGET, "malformed frame from peer: {}", e),
                _ => warn!(target: LOG_TARGET, "transport failed: {}", e),
            }
            core.teardown(&e.to_string());
        }
        None => {}
    }
    info!(target: LOG_TARGET, "demux loop stopped");
}

fn dispatch(core: &Arc<MuxCore>, frame: Frame) {
    let (payload_len, frame_len) = (frame.payload.len(), frame.wire_len());
    route(core, frame);
    core.record_inbound(payload_len, frame_len);
}

fn route(core: &Arc<MuxCore>, frame: Frame) {
    let id = frame.stream_id;
    let Some(flag) = frame.kind() else {
        warn!(target: LOG_TARGET, "ignoring frame with reserved flag {} on stream {}", frame.flag, id);
        core.record_ignored();
        return;
    };
    trace!(target: LOG_TARGET, "recv {} stream={} len={}", flag.as_str(), id, frame.payload.len());

    match flag {
        Flag::NewStream => {
            let record = match core.observe_remote(id, true) {
                Ok((record, _)) => record,
                Err(refusal) => return refuse(core, id, flag, refusal),
            };
            match core.accept_stream(id) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(target: LOG_TARGET, "ignoring repeated new-stream for stream {}", id);
                    core.record_ignored();
                }
                Err(e) if e.is_connection_error() => {
                    debug!(target: LOG_TARGET, "stream {} not dispatched: {}", id, e);
                }
                Err(e) => {
                    error!(target: LOG_TARGET, "failed to dispatch stream {}: {}", id, e);
                    if let Err(e) = core.reset_record(&record) {
                        debug!(target: LOG_TARGET, "reset of stream {} not sent: {}", id, e);
                    }
                }
            }
            core.deliver(&record, frame.payload);
        }
        Flag::MessageReceiver | Flag::MessageInitiator => match core.observe_remote(id, false) {
            Ok((record, created)) => {
                if created {
                    debug!(target: LOG_TARGET, "data before new-stream for stream {}; pending", id);
                }
                core.deliver(&record, frame.payload);
            }
            Err(refusal) => refuse(core, id, flag, refusal),
        },
        Flag::CloseReceiver | Flag::CloseInitiator => core.remote_finish(id, StreamState::Closed),
        Flag::ResetReceiver | Flag::ResetInitiator => core.remote_finish(id, StreamState::Reset),
    }
}

/// Drop a frame that has no record to land on. An unannounced stream over
/// the pending limit is also reset toward the peer.
fn refuse(core: &MuxCore, id: StreamId, flag: Flag, refusal: RemoteRefusal) {
    match refusal {
        RemoteRefusal::TooManyPending => {
            warn!(target: LOG_TARGET, "refusing stream {}: {}", id, refusal);
            if let Err(e) = core.send_message(Flag::ResetReceiver.to_u8(), &[], id) {
                debug!(target: LOG_TARGET, "reset of stream {} not sent: {}", id, e);
            }
        }
        RemoteRefusal::Closed | RemoteRefusal::LocalId => {
            debug!(target: LOG_TARGET, "ignoring {} for stream {}: {}", flag.as_str(), id, refusal);
        }
    }
    core.record_ignored();
}
