// src/io/downstream.rs
//
// Serial -> TCP.
//
// serial data format : '0xAD 0xDE len csum <len bytes EVENT>'
// forwarded to the tcp client : just the '<len bytes EVENT>' payloads
//
// The parser (producer) runs on the calling thread and fills an accumulator
// from the buffer pool. Whenever the accumulator holds at least one complete
// event it is handed to the ready set and the sender thread (consumer) is
// signalled over a bounded channel. The sender writes ready buffers to TCP in
// arrival order and returns them to the free set.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, Receiver, SyncSender};

use super::pool::BufferPool;
use super::serial::{EventFramer, FeedStats};
use super::{is_timeout, IoError};

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Debug)]
pub struct DownstreamOptions {
    /// Buffer pool cap, also used as the ready-signal channel capacity
    pub pool_limit: usize,
    pub read_chunk_size: usize,
    /// Report dropped noise bytes per read
    pub verbose: bool,
    pub serial_label: String,
    pub tcp_label: String,
}

/// Totals for one serial -> TCP session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownstreamStats {
    pub bytes_read: u64,
    pub bytes_forwarded: u64,
    pub framing: FeedStats,
    pub buffers_allocated: usize,
}

impl fmt::Display for DownstreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes read, {} bytes forwarded, {} events, {} checksum errors, {} noise bytes, {} buffers",
            self.bytes_read,
            self.bytes_forwarded,
            self.framing.frames,
            self.framing.checksum_errors,
            self.framing.dropped,
            self.buffers_allocated
        )
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the serial -> TCP pipeline until the serial side ends, the sender
/// fails, or `stop` is raised by someone else.
///
/// `stop` is raised on the way out of any failure so the opposite direction
/// of the session can wind down too. When the producer fails, `abort` is
/// called before the sender is joined; it must unblock a sender stuck in a
/// write to a peer that stopped reading (for a socket: shut it down).
pub fn run_downstream<R, W, A>(
    serial: &mut R,
    tcp: W,
    options: &DownstreamOptions,
    stop: &AtomicBool,
    abort: A,
) -> Result<DownstreamStats, IoError>
where
    R: Read,
    W: Write + Send,
    A: Fn(),
{
    let pool = BufferPool::new(options.pool_limit);
    let forwarded = AtomicU64::new(0);
    let mut stats = DownstreamStats::default();

    // Buffered channel, capacity same as the pool limit
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<()>(options.pool_limit);

    let (produced, sent) = std::thread::scope(|scope| {
        let pool = &pool;
        let forwarded = &forwarded;
        let tcp_label = options.tcp_label.as_str();

        let sender =
            scope.spawn(move || run_sender(pool, ready_rx, tcp, tcp_label, stop, forwarded));

        // Returning drops ready_tx, which lets the sender drain and exit
        let produced = run_producer(serial, pool, ready_tx, options, stop, &mut stats.framing);
        if let Err(e) = &produced {
            twarn!("[ser2tcp] Aborting session: {}", e);
            stop.store(true, Ordering::SeqCst);
            abort();
        }

        let sent = sender
            .join()
            .unwrap_or_else(|_| Err(IoError::write(tcp_label, "sender thread panicked")));
        (produced, sent)
    });

    stats.bytes_read = produced?;
    sent?;

    stats.bytes_forwarded = forwarded.load(Ordering::SeqCst);
    stats.buffers_allocated = pool.allocated();
    Ok(stats)
}

/// Parse serial input into pooled accumulators. Returns the number of bytes read.
fn run_producer<R: Read>(
    serial: &mut R,
    pool: &BufferPool,
    ready_tx: SyncSender<()>,
    options: &DownstreamOptions,
    stop: &AtomicBool,
    framing: &mut FeedStats,
) -> Result<u64, IoError> {
    let label = options.serial_label.as_str();
    let mut framer = EventFramer::new();
    let mut chunk = vec![0u8; options.read_chunk_size];
    let mut bytes_read: u64 = 0;

    let mut event_buf = pool.acquire_free().ok_or(IoError::PoolExhausted {
        limit: pool.limit(),
    })?;

    while !stop.load(Ordering::SeqCst) {
        let n = match serial.read(&mut chunk) {
            Ok(0) => {
                tlog!("[ser2tcp] {} reached end of stream", label);
                break;
            }
            Ok(n) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(IoError::read(label, e.to_string())),
        };
        bytes_read += n as u64;

        let feed = framer.feed(&chunk[..n], &mut event_buf);
        framing.merge(feed);
        if options.verbose && feed.dropped > 0 {
            tlog!("[ser2tcp] Dropped {} byte(s) while looking for marker", feed.dropped);
        }

        // Forward once at least one complete event is buffered
        let pending = framer.pending_len();
        if event_buf.len() > pending {
            let mut next_buf = pool.acquire_free().ok_or(IoError::PoolExhausted {
                limit: pool.limit(),
            })?;

            // The unfinished event seeds the next buffer
            if pending > 0 {
                let split = event_buf.len() - pending;
                next_buf.extend_from_slice(&event_buf[split..]);
                event_buf.truncate(split);
            }

            pool.release_to_ready(std::mem::replace(&mut event_buf, next_buf));

            if ready_tx.send(()).is_err() {
                tlog!("[ser2tcp] Sender has stopped, leaving");
                break;
            }
        }
    }

    pool.release_to_free(event_buf);
    tlog!("[ser2tcp] Leaving");
    Ok(bytes_read)
}

/// Write ready buffers to TCP until the producer hangs up or a write fails.
fn run_sender<W: Write>(
    pool: &BufferPool,
    ready_rx: Receiver<()>,
    mut tcp: W,
    label: &str,
    stop: &AtomicBool,
    forwarded: &AtomicU64,
) -> Result<(), IoError> {
    while ready_rx.recv().is_ok() {
        let Some(event_buf) = pool.acquire_ready() else {
            continue;
        };

        let result = tcp.write_all(&event_buf).and_then(|_| tcp.flush());
        let len = event_buf.len() as u64;
        pool.release_to_free(event_buf);

        if let Err(e) = result {
            twarn!("[ser2tcp] TCP send to {} failed: {}", label, e);
            stop.store(true, Ordering::SeqCst);
            return Err(IoError::write(label, e.to_string()));
        }
        forwarded.fetch_add(len, Ordering::SeqCst);
    }

    tlog!("[ser2tcp] TCP forwarding leaving");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::encode_event;
    use std::collections::VecDeque;
    use std::io;

    /// Serial stand-in that replays scripted reads, then reports end of stream.
    struct ScriptedSerial {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedSerial {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
            }
        }

        fn chunks(chunks: Vec<Vec<u8>>) -> Self {
            Self::new(chunks.into_iter().map(Ok).collect())
        }
    }

    impl Read for ScriptedSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(data)) => {
                    // Scripts never exceed the chunk size used in these tests
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
            }
        }
    }

    struct FailingTcp;

    impl Write for FailingTcp {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn options(pool_limit: usize) -> DownstreamOptions {
        DownstreamOptions {
            pool_limit,
            read_chunk_size: 1024,
            verbose: true,
            serial_label: "serial(test)".to_string(),
            tcp_label: "tcp(test)".to_string(),
        }
    }

    fn run(serial: &mut ScriptedSerial, pool_limit: usize) -> (Result<DownstreamStats, IoError>, Vec<u8>) {
        let mut out = Vec::new();
        let stop = AtomicBool::new(false);
        let result = run_downstream(serial, &mut out, &options(pool_limit), &stop, || {});
        (result, out)
    }

    #[test]
    fn test_single_event_forwarded() {
        let mut serial = ScriptedSerial::chunks(vec![vec![0xAD, 0xDE, 0x03, 0x06, 0x01, 0x02, 0x05]]);
        let (result, out) = run(&mut serial, 10);

        let stats = result.unwrap();
        assert_eq!(out, vec![0x01, 0x02, 0x05]);
        assert_eq!(stats.bytes_read, 7);
        assert_eq!(stats.bytes_forwarded, 3);
        assert_eq!(stats.framing.frames, 1);
        assert_eq!(stats.framing.checksum_errors, 0);
    }

    #[test]
    fn test_bad_checksum_not_forwarded_next_event_is() {
        let mut serial = ScriptedSerial::chunks(vec![
            vec![0xAD, 0xDE, 0x03, 0xFF, 0x01, 0x02, 0x05],
            vec![0xAD, 0xDE, 0x01, 0x09, 0x09],
        ]);
        let (result, out) = run(&mut serial, 10);

        let stats = result.unwrap();
        assert_eq!(out, vec![0x09]);
        assert_eq!(stats.framing.checksum_errors, 1);
        assert_eq!(stats.framing.frames, 1);
    }

    #[test]
    fn test_noise_is_not_forwarded() {
        let mut serial = ScriptedSerial::chunks(vec![vec![0x00, 0xAD, 0xDE, 0x01, 0x09, 0x09]]);
        let (result, out) = run(&mut serial, 10);

        assert_eq!(out, vec![0x09]);
        assert_eq!(result.unwrap().framing.dropped, 1);
    }

    #[test]
    fn test_partial_event_carried_into_next_buffer() {
        // First read completes one event and starts another
        let first = encode_event(b"one").unwrap();
        let second = encode_event(b"second").unwrap();
        let mut read1 = first.clone();
        read1.extend_from_slice(&second[..6]);
        let read2 = second[6..].to_vec();

        let mut serial = ScriptedSerial::chunks(vec![read1, read2]);
        let (result, out) = run(&mut serial, 10);

        assert_eq!(out, b"onesecond".to_vec());
        assert_eq!(result.unwrap().framing.frames, 2);
    }

    #[test]
    fn test_many_events_arrive_in_order() {
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        for n in 0..200u32 {
            let payload: Vec<u8> = (0..(n % 17) as u8).map(|b| b.wrapping_mul(31) ^ n as u8).collect();
            wire.extend(encode_event(&payload).unwrap());
            expected.extend_from_slice(&payload);
        }

        // Uneven read sizes so events straddle reads
        let mut chunks = Vec::new();
        let mut offset = 0;
        let mut size = 1;
        while offset < wire.len() {
            let end = (offset + size).min(wire.len());
            chunks.push(wire[offset..end].to_vec());
            offset = end;
            size = size % 37 + 3;
        }
        let reads = chunks.len();

        let mut serial = ScriptedSerial::chunks(chunks);
        // One buffer per read is enough that the sender can never fall behind the cap
        let (result, out) = run(&mut serial, reads + 2);

        let stats = result.unwrap();
        assert_eq!(out, expected);
        assert_eq!(stats.framing.frames, 200);
        assert!(stats.buffers_allocated <= reads + 2);
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        let mut serial = ScriptedSerial::new(vec![
            Err(io::Error::new(io::ErrorKind::TimedOut, "quiet line")),
            Ok(encode_event(&[0x42]).unwrap()),
            Err(io::Error::new(io::ErrorKind::TimedOut, "quiet line")),
        ]);
        let (result, out) = run(&mut serial, 10);

        assert!(result.is_ok());
        assert_eq!(out, vec![0x42]);
    }

    #[test]
    fn test_serial_error_ends_session_after_draining() {
        let mut serial = ScriptedSerial::new(vec![
            Ok(encode_event(&[0x01, 0x02]).unwrap()),
            Err(io::Error::new(io::ErrorKind::Other, "device unplugged")),
        ]);
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        let result = run_downstream(&mut serial, &mut out, &options(10), &stop, || {});

        assert!(matches!(result, Err(IoError::Read { .. })));
        assert_eq!(out, vec![0x01, 0x02]);
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pool_exhaustion_is_fatal() {
        // The parser holds the only buffer, so the first flush has nowhere to go
        let mut serial = ScriptedSerial::chunks(vec![encode_event(&[0x42]).unwrap()]);
        let (result, out) = run(&mut serial, 1);

        assert!(matches!(result, Err(IoError::PoolExhausted { limit: 1 })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_tcp_write_failure_stops_pipeline() {
        let mut serial = ScriptedSerial::chunks(vec![encode_event(&[0x42]).unwrap()]);
        let stop = AtomicBool::new(false);
        let result = run_downstream(&mut serial, FailingTcp, &options(10), &stop, || {});

        assert!(matches!(result, Err(IoError::Write { .. })));
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_flag_prevents_reading() {
        let mut serial = ScriptedSerial::chunks(vec![encode_event(&[0x42]).unwrap()]);
        let stop = AtomicBool::new(true);
        let mut out = Vec::new();
        let stats = run_downstream(&mut serial, &mut out, &options(10), &stop, || {}).unwrap();

        assert_eq!(stats.bytes_read, 0);
        assert!(out.is_empty());
        assert_eq!(serial.reads.len(), 1);
    }

    #[test]
    fn test_stats_display() {
        let stats = DownstreamStats {
            bytes_read: 12,
            bytes_forwarded: 4,
            framing: FeedStats {
                frames: 2,
                checksum_errors: 1,
                dropped: 3,
            },
            buffers_allocated: 2,
        };
        assert_eq!(
            stats.to_string(),
            "12 bytes read, 4 bytes forwarded, 2 events, 1 checksum errors, 3 noise bytes, 2 buffers"
        );
    }

    /// Serial stand-in that never runs dry: back-to-back valid 200 byte events.
    struct EndlessSerial {
        wire: Vec<u8>,
        offset: usize,
    }

    impl Read for EndlessSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            for b in buf.iter_mut() {
                *b = self.wire[self.offset];
                self.offset = (self.offset + 1) % self.wire.len();
            }
            Ok(buf.len())
        }
    }

    #[test]
    fn test_pool_exhaustion_with_stalled_peer_unblocks_sender() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        // Connected, but never reads, so the sender ends up stuck in write_all
        let peer = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let server_shutdown = server.try_clone().unwrap();

        let (done_tx, done_rx) = std_mpsc::channel();
        std::thread::spawn(move || {
            let mut serial = EndlessSerial {
                wire: encode_event(&[0x5A; 200]).unwrap(),
                offset: 0,
            };
            let mut opts = options(10);
            opts.read_chunk_size = 65536;
            opts.verbose = false;
            let stop = AtomicBool::new(false);

            let result = run_downstream(&mut serial, server, &opts, &stop, || {
                let _ = server_shutdown.shutdown(std::net::Shutdown::Both);
            });
            let _ = done_tx.send((result, stop.load(Ordering::SeqCst)));
        });

        let (result, stopped) = done_rx
            .recv_timeout(std::time::Duration::from_secs(20))
            .expect("downstream did not return with a stalled peer");

        assert!(matches!(result, Err(IoError::PoolExhausted { limit: 10 })));
        assert!(stopped);
        drop(peer);
    }
}
