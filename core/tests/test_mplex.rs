// End-to-end multiplexer behavior over the in-memory transport.
//
// Two flavors of peer:
// - `pair()`: two `Mplex` instances talking to each other
// - `raw_peer()`: one `Mplex` against a bare `MemoryConnection` that the
//   test drives frame by frame

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam::channel::{unbounded, Receiver};

    use mplex_core::constants::MPLEX_PROTOCOL_ID;
    use mplex_core::mplex::framing::{encode_frame, FrameReader};
    use mplex_core::prelude::*;

    const RECV_WAIT: Duration = Duration::from_secs(3);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fast_config() -> MplexConfig {
        MplexConfig::default().with_read_timeout(Duration::from_millis(10))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + RECV_WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    /// One side of a connection; accepted streams land on `accepted`.
    struct Peer {
        mux: Mplex,
        accepted: Receiver<StreamHandle>,
    }

    impl Peer {
        fn new(conn: Arc<dyn RawConnection>, config: MplexConfig) -> Self {
            let (tx, rx) = unbounded();
            let mux = Mplex::new(
                conn,
                move |stream| {
                    let _ = tx.send(stream);
                },
                config,
            )
            .unwrap();
            Self { mux, accepted: rx }
        }

        fn accept(&self) -> StreamHandle {
            self.accepted.recv_timeout(RECV_WAIT).expect("no stream accepted")
        }
    }

    fn pair_with(config_a: MplexConfig, config_b: MplexConfig) -> (Peer, Peer) {
        init_logger();
        let (a, b) = MemoryConnection::pair();
        (Peer::new(Arc::new(a), config_a), Peer::new(Arc::new(b), config_b))
    }

    fn pair() -> (Peer, Peer) {
        pair_with(fast_config(), fast_config())
    }

    fn raw_peer() -> (Peer, MemoryConnection) {
        init_logger();
        let (a, raw) = MemoryConnection::pair();
        (Peer::new(Arc::new(a), fast_config()), raw)
    }

    fn read_all(stream: &StreamHandle) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.read().unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    // ---- Open / accept ----

    #[test]
    fn protocol_id_is_versioned() {
        assert_eq!(Mplex::protocol_id(), "/mplex/6.7.0");
        assert_eq!(Mplex::protocol_id(), MPLEX_PROTOCOL_ID);
    }

    #[test]
    fn open_dispatches_exactly_one_accept() {
        let (a, b) = pair();

        let local = a.mux.open_stream(Some("/echo/1.0.0")).unwrap();
        assert_eq!(local.id(), 0);
        assert_eq!(local.direction(), Direction::Initiator);
        assert_eq!(local.protocol_id(), Some("/echo/1.0.0"));

        let remote = b.accept();
        assert_eq!(remote.id(), 0);
        assert_eq!(remote.direction(), Direction::Receiver);
        assert_eq!(remote.protocol_id(), None);
        assert_eq!(remote.state(), StreamState::Open);

        assert!(b.accepted.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn ids_follow_connection_role() {
        let (a, b) = pair();
        assert!(a.mux.is_initiator());
        assert!(!b.mux.is_initiator());

        let ids_a: Vec<_> = (0..3).map(|_| a.mux.open_stream(None).unwrap().id()).collect();
        let ids_b: Vec<_> = (0..3).map(|_| b.mux.open_stream(None).unwrap().id()).collect();
        assert_eq!(ids_a, vec![0, 2, 4]);
        assert_eq!(ids_b, vec![1, 3, 5]);
    }

    #[test]
    fn concurrent_opens_never_share_an_id() {
        let (a, _b) = pair();

        let ids: Vec<StreamId> = thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..25)
                            .map(|_| a.mux.open_stream(None).unwrap().id())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 200);
        assert!(ids.iter().all(|id| id % 2 == 0));
    }

    // ---- Data path ----

    #[test]
    fn write_reports_wire_bytes() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();

        // header 0x02, length 0x05, then the payload
        assert_eq!(stream.write(b"hello").unwrap(), 7);
        assert_eq!(&b.accept().read().unwrap().unwrap()[..], b"hello");
    }

    #[test]
    fn per_stream_order_is_preserved() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();

        let chunks: Vec<Vec<u8>> = (0..100u32).map(|i| format!("chunk-{i};").into_bytes()).collect();
        for chunk in &chunks {
            stream.write(chunk).unwrap();
        }
        stream.close().unwrap();

        let remote = b.accept();
        assert_eq!(read_all(&remote), chunks.concat());
    }

    #[test]
    fn streams_echo_in_both_directions() {
        let (a, b) = pair();

        let echo = thread::spawn(move || {
            let stream = b.accept();
            while let Ok(Some(chunk)) = stream.read() {
                if stream.write(&chunk).is_err() {
                    break;
                }
            }
            b
        });

        let stream = a.mux.open_stream(Some("/echo/1.0.0")).unwrap();
        let msgs: [&[u8]; 3] = [b"ping", b"pong", b""];
        for msg in msgs {
            stream.write(msg).unwrap();
        }
        assert_eq!(&stream.read().unwrap().unwrap()[..], b"ping");
        assert_eq!(&stream.read().unwrap().unwrap()[..], b"pong");

        // Empty payloads are never queued.
        assert_eq!(stream.read_nonblocking().unwrap(), None);

        stream.close().unwrap();
        let _b = echo.join().unwrap();
    }

    #[test]
    fn interleaved_streams_stay_separate() {
        let (a, b) = pair();
        let s0 = a.mux.open_stream(None).unwrap();
        let s2 = a.mux.open_stream(None).unwrap();

        for i in 0..20u8 {
            s0.write(&[b'a', i]).unwrap();
            s2.write(&[b'b', i]).unwrap();
        }
        s0.close().unwrap();
        s2.close().unwrap();

        let mut remotes = vec![b.accept(), b.accept()];
        remotes.sort_by_key(|s| s.id());

        let expect = |tag: u8| -> Vec<u8> { (0..20u8).flat_map(|i| [tag, i]).collect() };
        assert_eq!(read_all(&remotes[0]), expect(b'a'));
        assert_eq!(read_all(&remotes[1]), expect(b'b'));
    }

    #[test]
    fn nonblocking_read_never_waits() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        assert_eq!(remote.read_nonblocking().unwrap(), None);

        stream.write(b"later").unwrap();
        let mut got = None;
        assert!(wait_until(|| {
            got = remote.read_nonblocking().unwrap();
            got.is_some()
        }));
        assert_eq!(&got.unwrap()[..], b"later");
    }

    #[test]
    fn read_buffer_by_id() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        stream.write(b"by-id").unwrap();
        assert_eq!(&b.mux.read_buffer(remote.id()).unwrap().unwrap()[..], b"by-id");
        assert_eq!(b.mux.read_buffer_nonblocking(remote.id()).unwrap(), None);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (a, _b) = pair();
        assert!(matches!(a.mux.read_buffer(42), Err(MplexError::StreamNotFound(42))));
        assert!(matches!(a.mux.read_buffer_nonblocking(7), Err(MplexError::StreamNotFound(7))));
    }

    #[test]
    fn raw_send_message_reaches_stream() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();

        let n = a.mux.send_message(Flag::MessageInitiator, b"raw", stream.id()).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&b.accept().read().unwrap().unwrap()[..], b"raw");
    }

    // ---- Stream lifecycle ----

    #[test]
    fn close_ends_stream_after_draining() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        stream.write(b"bye").unwrap();
        stream.close().unwrap();
        stream.close().unwrap();

        assert_eq!(stream.state(), StreamState::Closed);
        assert!(matches!(stream.write(b"more"), Err(MplexError::StreamClosed(0))));
        assert!(matches!(a.mux.read_buffer(0), Err(MplexError::StreamNotFound(0))));

        let remote = b.accept();
        assert_eq!(&remote.read().unwrap().unwrap()[..], b"bye");
        assert_eq!(remote.read().unwrap(), None);
        assert_eq!(remote.state(), StreamState::Closed);
        assert!(matches!(remote.write(b"late"), Err(MplexError::StreamClosed(0))));

        // Drained and terminal: gone from the table.
        assert!(matches!(b.mux.read_buffer(0), Err(MplexError::StreamNotFound(0))));
    }

    #[test]
    fn reset_fails_reads_on_the_peer() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        remote.reset().unwrap();
        assert!(matches!(stream.read(), Err(MplexError::StreamReset(0))));
        assert_eq!(stream.state(), StreamState::Reset);
        assert!(matches!(stream.write(b"x"), Err(MplexError::StreamReset(0))));
        assert!(matches!(remote.write(b"x"), Err(MplexError::StreamReset(0))));
    }

    #[test]
    fn dropping_a_terminal_handle_evicts_it() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        stream.write(b"unread").unwrap();
        stream.close().unwrap();
        assert!(wait_until(|| remote.state() == StreamState::Closed));
        assert_eq!(b.mux.stream_count(), 1);

        drop(remote);
        assert_eq!(b.mux.stream_count(), 0);
    }

    #[test]
    fn full_queue_resets_only_that_stream() {
        let (a, b) = pair_with(fast_config(), fast_config().with_max_buffered_chunks(4));
        let flooded = a.mux.open_stream(None).unwrap();
        let quiet = a.mux.open_stream(None).unwrap();

        for i in 0..16u8 {
            let _ = flooded.write(&[i]);
        }
        assert!(matches!(flooded.read(), Err(MplexError::StreamReset(0))));

        let mut remotes = vec![b.accept(), b.accept()];
        remotes.sort_by_key(|s| s.id());
        let (flooded_remote, quiet_remote) = (&remotes[0], &remotes[1]);

        // What was queued before the overflow is still readable.
        for i in 0..4u8 {
            assert_eq!(&flooded_remote.read().unwrap().unwrap()[..], &[i]);
        }
        assert!(matches!(flooded_remote.read(), Err(MplexError::StreamReset(0))));

        quiet.write(b"still fine").unwrap();
        assert_eq!(&quiet_remote.read().unwrap().unwrap()[..], b"still fine");
        assert!(!b.mux.is_closed());
        assert!(b.mux.telemetry().streams_reset >= 1);
    }

    // ---- Connection teardown ----

    #[test]
    fn close_cascades_to_every_stream() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        a.mux.close();
        a.mux.close();
        assert!(a.mux.is_closed());
        assert_eq!(a.mux.stream_count(), 0);

        assert!(matches!(stream.write(b"x"), Err(MplexError::Connection(ConnectionError::Closed))));
        assert!(matches!(stream.read(), Err(MplexError::Connection(ConnectionError::Closed))));
        assert!(matches!(a.mux.open_stream(None), Err(MplexError::Connection(_))));

        // The peer notices and unblocks its readers.
        assert!(matches!(remote.read(), Err(MplexError::Connection(ConnectionError::Closed))));
        assert!(wait_until(|| b.mux.is_closed()));
    }

    #[test]
    fn queued_data_survives_teardown_until_drained() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        stream.write(b"in-flight").unwrap();
        assert!(wait_until(|| b.mux.telemetry().bytes_in >= 9));
        b.mux.close();

        assert_eq!(&remote.read().unwrap().unwrap()[..], b"in-flight");
        assert!(remote.read().unwrap_err().is_connection_error());
    }

    #[test]
    fn transport_reset_tears_down_both_sides() {
        init_logger();
        let (a_conn, b_conn) = MemoryConnection::pair();
        let a_conn = Arc::new(a_conn);
        let a = Peer::new(a_conn.clone(), fast_config());
        let b = Peer::new(Arc::new(b_conn), fast_config());

        let stream = a.mux.open_stream(None).unwrap();
        let remote = b.accept();

        a_conn.reset();
        assert!(stream.read().unwrap_err().is_connection_error());
        assert!(remote.read().unwrap_err().is_connection_error());
        assert!(wait_until(|| a.mux.is_closed() && b.mux.is_closed()));
    }

    #[test]
    fn malformed_frame_tears_down_connection() {
        let (peer, raw) = raw_peer();
        let stream = peer.mux.open_stream(None).unwrap();

        raw.write(&[0xff; 11]).unwrap();
        assert!(wait_until(|| peer.mux.is_closed()));
        assert!(matches!(stream.read(), Err(MplexError::Connection(ConnectionError::Closed))));
    }

    #[test]
    fn oversized_frame_tears_down_connection() {
        init_logger();
        let (a, raw) = MemoryConnection::pair();
        let peer = Peer::new(Arc::new(a), fast_config().with_max_frame_len(16));

        raw.write(&encode_frame(1, Flag::MessageInitiator.to_u8(), &[0u8; 17]).unwrap()).unwrap();
        assert!(wait_until(|| peer.mux.is_closed()));
    }

    // ---- Inbound edge cases ----

    #[test]
    fn reserved_flag_is_ignored() {
        let (peer, raw) = raw_peer();

        raw.write(&encode_frame(1, 7, b"reserved").unwrap()).unwrap();
        raw.write(&encode_frame(1, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();
        raw.write(&encode_frame(1, Flag::MessageInitiator.to_u8(), b"after").unwrap()).unwrap();

        let stream = peer.accept();
        assert_eq!(stream.id(), 1);
        assert_eq!(&stream.read().unwrap().unwrap()[..], b"after");
        assert!(!peer.mux.is_closed());
        assert!(peer.mux.telemetry().frames_ignored >= 1);
    }

    #[test]
    fn data_before_new_stream_is_kept() {
        let (peer, raw) = raw_peer();

        raw.write(&encode_frame(3, Flag::MessageInitiator.to_u8(), b"early").unwrap()).unwrap();
        raw.write(&encode_frame(3, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();

        let stream = peer.accept();
        assert_eq!(stream.id(), 3);
        assert_eq!(&stream.read().unwrap().unwrap()[..], b"early");
    }

    #[test]
    fn new_stream_binds_its_own_id() {
        let (peer, raw) = raw_peer();

        // Two ids observed first, then announced in the opposite order.
        raw.write(&encode_frame(5, Flag::MessageInitiator.to_u8(), b"five").unwrap()).unwrap();
        raw.write(&encode_frame(7, Flag::MessageInitiator.to_u8(), b"seven").unwrap()).unwrap();
        raw.write(&encode_frame(7, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();

        let stream = peer.accept();
        assert_eq!(stream.id(), 7);
        assert_eq!(&stream.read().unwrap().unwrap()[..], b"seven");
    }

    #[test]
    fn repeated_new_stream_is_accepted_once() {
        let (peer, raw) = raw_peer();

        raw.write(&encode_frame(9, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();
        raw.write(&encode_frame(9, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();

        assert_eq!(peer.accept().id(), 9);
        assert!(peer.accepted.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(wait_until(|| peer.mux.telemetry().frames_ignored >= 1));
    }

    #[test]
    fn close_for_unknown_stream_is_ignored() {
        let (peer, raw) = raw_peer();

        raw.write(&encode_frame(99, Flag::CloseInitiator.to_u8(), b"").unwrap()).unwrap();
        raw.write(&encode_frame(99, Flag::ResetInitiator.to_u8(), b"").unwrap()).unwrap();

        assert!(wait_until(|| peer.mux.telemetry().frames_ignored >= 2));
        assert!(!peer.mux.is_closed());
        assert_eq!(peer.mux.stream_count(), 0);
    }

    #[test]
    fn late_frames_for_an_evicted_local_stream_are_dropped() {
        let (peer, raw) = raw_peer();
        let stream = peer.mux.open_stream(None).unwrap();
        let id = stream.id();
        stream.close().unwrap();
        drop(stream);
        assert_eq!(peer.mux.stream_count(), 0);

        raw.write(&encode_frame(id, Flag::MessageReceiver.to_u8(), b"late").unwrap()).unwrap();
        raw.write(&encode_frame(id, Flag::CloseReceiver.to_u8(), b"").unwrap()).unwrap();
        // Never-opened id from the local id space.
        raw.write(&encode_frame(id + 2, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();

        assert!(wait_until(|| peer.mux.telemetry().frames_ignored >= 3));
        assert_eq!(peer.mux.stream_count(), 0);
        assert!(matches!(peer.mux.read_buffer(id), Err(MplexError::StreamNotFound(_))));
        assert!(peer.accepted.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!peer.mux.is_closed());
    }

    #[test]
    fn unannounced_streams_beyond_the_limit_are_reset() {
        init_logger();
        let (a, raw) = MemoryConnection::pair();
        let raw = Arc::new(raw);
        let peer = Peer::new(Arc::new(a), fast_config().with_max_pending_streams(4));

        for id in [1u64, 3, 5, 7, 9, 11] {
            raw.write(&encode_frame(id, Flag::MessageInitiator.to_u8(), b"x").unwrap()).unwrap();
        }
        assert!(wait_until(|| peer.mux.telemetry().frames_in >= 6));
        assert_eq!(peer.mux.stream_count(), 4);
        assert_eq!(peer.mux.telemetry().frames_ignored, 2);
        assert!(!peer.mux.is_closed());

        let mut reader = FrameReader::new(raw.clone(), 1024, 512);
        let mut refused = Vec::new();
        let deadline = Instant::now() + RECV_WAIT;
        while refused.len() < 2 && Instant::now() < deadline {
            if let Some(frame) = reader.next_frame(Duration::from_millis(20)).unwrap() {
                assert_eq!(frame.kind(), Some(Flag::ResetReceiver));
                refused.push(frame.stream_id);
            }
        }
        assert_eq!(refused, vec![9, 11]);

        // Announcing a pending id frees its slot; announced ids are not capped.
        raw.write(&encode_frame(1, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();
        let first = peer.accept();
        assert_eq!(first.id(), 1);
        assert_eq!(&first.read().unwrap().unwrap()[..], b"x");

        raw.write(&encode_frame(13, Flag::NewStream.to_u8(), b"").unwrap()).unwrap();
        assert_eq!(peer.accept().id(), 13);
        assert!(peer.mux.telemetry().sanity_check());
    }

    // ---- Config + telemetry ----

    #[test]
    fn invalid_config_is_rejected() {
        init_logger();
        let (a, _b) = MemoryConnection::pair();
        let config = MplexConfig::default().with_max_buffered_chunks(0);
        let res = Mplex::new(Arc::new(a), |_stream| {}, config);
        assert!(matches!(res, Err(MplexError::Config(_))));
    }

    #[test]
    fn telemetry_tracks_traffic() {
        let (a, b) = pair();
        let stream = a.mux.open_stream(None).unwrap();
        stream.write(b"hello").unwrap();
        let remote = b.accept();
        assert_eq!(&remote.read().unwrap().unwrap()[..], b"hello");
        stream.close().unwrap();

        let sent = a.mux.telemetry();
        assert_eq!(sent.streams_opened, 1);
        assert_eq!(sent.streams_closed, 1);
        assert_eq!(sent.frames_out, 3);
        assert_eq!(sent.bytes_out, 5);
        assert_eq!(sent.bytes_overhead, 6);
        assert!(sent.sanity_check());

        let seen = b.mux.telemetry();
        assert_eq!(seen.streams_accepted, 1);
        assert!(seen.frames_in >= 2);

        let json = serde_json::to_value(&sent).unwrap();
        assert_eq!(json["frames_out"], 3);
        assert_eq!(json["open_streams"], 0);
    }
}
