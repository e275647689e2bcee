// src/io/upstream.rs
//
// TCP -> Serial. No framing: bytes are copied verbatim.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{is_timeout, IoError};

#[derive(Clone, Debug)]
pub struct UpstreamOptions {
    pub chunk_size: usize,
    /// Hex-dump every chunk received from the client
    pub verbose: bool,
    pub tcp_label: String,
    pub serial_label: String,
}

/// Copy client bytes to the serial port until the client disconnects or
/// either side fails. Returns the number of bytes written to serial.
///
/// `stop` is raised on exit so the downstream half of the session follows.
pub fn run_upstream<R: Read, W: Write>(
    mut tcp: R,
    mut serial: W,
    options: &UpstreamOptions,
    stop: &AtomicBool,
) -> Result<u64, IoError> {
    let result = copy_loop(&mut tcp, &mut serial, options, stop);
    stop.store(true, Ordering::SeqCst);
    tlog!("[tcp2ser] Leaving");
    result
}

fn copy_loop<R: Read, W: Write>(
    tcp: &mut R,
    serial: &mut W,
    options: &UpstreamOptions,
    stop: &AtomicBool,
) -> Result<u64, IoError> {
    let mut buf = vec![0u8; options.chunk_size];
    let mut total: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        let n = match tcp.read(&mut buf) {
            Ok(0) => {
                tlog!("[tcp2ser] {} disconnected", options.tcp_label);
                break;
            }
            Ok(n) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(IoError::read(&options.tcp_label, e.to_string())),
        };

        if options.verbose {
            tlog!("[tcp2ser] Tcp received {} byte(s): {}", n, hex::encode(&buf[..n]));
        }

        serial
            .write_all(&buf[..n])
            .and_then(|_| serial.flush())
            .map_err(|e| IoError::write(&options.serial_label, e.to_string()))?;
        total += n as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn options() -> UpstreamOptions {
        UpstreamOptions {
            chunk_size: 4,
            verbose: true,
            tcp_label: "tcp(test)".to_string(),
            serial_label: "serial(test)".to_string(),
        }
    }

    struct BrokenSerial;

    impl Write for BrokenSerial {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "port closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bytes_copied_verbatim() {
        // Framing markers upstream are just data
        let input: Vec<u8> = vec![0xAD, 0xDE, 0x00, 0x01, 0x02, 0x03, 0xFF, 0x10, 0x20];
        let mut serial = Vec::new();
        let stop = AtomicBool::new(false);

        let copied = run_upstream(io::Cursor::new(input.clone()), &mut serial, &options(), &stop).unwrap();

        assert_eq!(copied, input.len() as u64);
        assert_eq!(serial, input);
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_serial_write_failure() {
        let stop = AtomicBool::new(false);
        let result = run_upstream(io::Cursor::new(vec![1, 2, 3]), BrokenSerial, &options(), &stop);

        assert!(matches!(result, Err(IoError::Write { .. })));
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_flag_ends_copy() {
        let stop = AtomicBool::new(true);
        let mut serial = Vec::new();
        let copied = run_upstream(io::Cursor::new(vec![1, 2, 3]), &mut serial, &options(), &stop).unwrap();

        assert_eq!(copied, 0);
        assert!(serial.is_empty());
    }
}
