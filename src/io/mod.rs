// src/io/mod.rs
//
// Endpoint plumbing for the bridge: the buffer pool, the serial framer and
// port helpers, and the two copy directions of a session.

mod downstream;
mod error;
pub mod pool;
pub mod serial;
mod upstream;

pub use downstream::{run_downstream, DownstreamOptions, DownstreamStats};
pub use error::IoError;
pub use pool::BufferPool;
pub use serial::Parity;
pub use upstream::{run_upstream, UpstreamOptions};

/// Read errors that only mean "no data yet" on a port opened with a timeout.
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
