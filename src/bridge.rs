// src/bridge.rs
//
// TCP listener and per-client session lifecycle.
//
// The serial port is opened once. Clients are served one at a time: each
// session runs the downstream pipeline and the upstream copy loop on blocking
// threads, and when either side ends the socket is shut down so the other
// unblocks. The listener then goes back to accepting.

use std::future::Future;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serialport::SerialPort;
use tokio::net::TcpListener;

use crate::io::serial::{device_label, open_port};
use crate::io::{
    run_downstream, run_upstream, DownstreamOptions, DownstreamStats, IoError, UpstreamOptions,
};
use crate::settings::BridgeSettings;

/// Serial device that can hand out independent handles, one per direction.
pub trait SerialLink {
    type Handle: Read + Write + Send + 'static;

    fn try_clone_handle(&self) -> std::io::Result<Self::Handle>;
}

impl SerialLink for Box<dyn SerialPort> {
    type Handle = Box<dyn SerialPort>;

    fn try_clone_handle(&self) -> std::io::Result<Self::Handle> {
        self.try_clone().map_err(std::io::Error::from)
    }
}

pub struct Bridge {
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self { settings }
    }

    pub fn listen_addr(&self) -> String {
        format!(
            "{}:{}",
            self.settings.tcp.bind_address, self.settings.tcp.listen_port
        )
    }

    /// Open the serial port and serve clients until Ctrl-C or a listener failure.
    pub async fn run(&self) -> Result<(), IoError> {
        let serial = open_port(&self.settings.serial)?;

        let addr = self.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IoError::connection(&format!("tcp({})", addr), e.to_string()))?;
        tlog!("[bridge] Listening on {}", addr);

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        self.serve(&serial, listener, ctrl_c).await
    }

    /// Accept loop over an already bound listener. Returns once `shutdown`
    /// completes, closing the active session first.
    pub async fn serve<S, F>(
        &self,
        serial: &S,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), IoError>
    where
        S: SerialLink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted
                    .map_err(|e| IoError::connection("tcp", format!("accept failed: {}", e)))?,
                _ = &mut shutdown => {
                    tlog!("[bridge] Shutting down");
                    return Ok(());
                }
            };
            tlog!("[bridge] Tcp client connected: {}", peer);

            let session = match Session::open(stream, peer) {
                Ok(s) => s,
                Err(e) => {
                    tlog!("[bridge] Could not set up session for {}: {}", peer, e);
                    continue;
                }
            };

            let run = session.run(serial, &self.settings);
            tokio::pin!(run);

            let interrupted = tokio::select! {
                result = &mut run => {
                    session.report(result);
                    false
                }
                _ = &mut shutdown => true,
            };

            if interrupted {
                tlog!("[bridge] Shutting down, closing session with {}", peer);
                session.shutdown();
                session.report(run.await);
                return Ok(());
            }
            tlog!("[bridge] Waiting for a new client");
        }
    }
}

/// One connected client.
struct Session {
    peer: SocketAddr,
    tcp: std::net::TcpStream,
    /// Raised by whichever direction ends first
    stop: Arc<AtomicBool>,
}

impl Session {
    fn open(stream: tokio::net::TcpStream, peer: SocketAddr) -> Result<Self, IoError> {
        let label = format!("tcp({})", peer);
        let tcp = stream
            .into_std()
            .and_then(|s| s.set_nonblocking(false).map(|_| s))
            .map_err(|e| IoError::connection(&label, e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        Ok(Self {
            peer,
            tcp,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    fn label(&self) -> String {
        format!("tcp({})", self.peer)
    }

    /// Tear down both directions. Safe to call more than once.
    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.tcp.shutdown(Shutdown::Both);
    }

    async fn run<S: SerialLink>(
        &self,
        serial: &S,
        settings: &BridgeSettings,
    ) -> Result<DownstreamStats, IoError> {
        let tcp_label = self.label();
        let serial_label = device_label(&settings.serial.port);

        let clone_tcp = || {
            self.tcp
                .try_clone()
                .map_err(|e| IoError::connection(&tcp_label, e.to_string()))
        };
        let clone_serial = || {
            serial
                .try_clone_handle()
                .map_err(|e| IoError::connection(&serial_label, e.to_string()))
        };

        let tcp_reader = clone_tcp()?;
        let tcp_writer = clone_tcp()?;
        let tcp_abort = clone_tcp()?;
        let serial_writer = clone_serial()?;
        let mut serial_reader = clone_serial()?;

        let up_options = UpstreamOptions {
            chunk_size: settings.pipeline.upstream_chunk_size,
            verbose: settings.verbose,
            tcp_label: tcp_label.clone(),
            serial_label: serial_label.clone(),
        };
        let down_options = DownstreamOptions {
            pool_limit: settings.pipeline.pool_limit,
            read_chunk_size: settings.pipeline.read_chunk_size,
            verbose: settings.verbose,
            serial_label,
            tcp_label,
        };

        let up_stop = self.stop.clone();
        let upstream = tokio::task::spawn_blocking(move || {
            run_upstream(tcp_reader, serial_writer, &up_options, &up_stop)
        });

        let down_stop = self.stop.clone();
        let downstream = tokio::task::spawn_blocking(move || {
            // A sender stuck writing to a client that stopped reading only
            // wakes up once the socket is shut down
            let abort = || {
                let _ = tcp_abort.shutdown(Shutdown::Both);
            };
            run_downstream(&mut serial_reader, tcp_writer, &down_options, &down_stop, abort)
        });

        let down_result = downstream.await;
        self.shutdown();
        let up_result = upstream.await;

        match up_result {
            Ok(Ok(copied)) => tlog!("[bridge] {} upstream bytes from {}", copied, self.peer),
            Ok(Err(e)) => twarn!("[bridge] Upstream from {} failed: {}", self.peer, e),
            Err(e) => twarn!("[bridge] Upstream task panicked: {:?}", e),
        }

        down_result
            .map_err(|e| IoError::write(&self.label(), format!("downstream task panicked: {:?}", e)))?
    }

    fn report(&self, result: Result<DownstreamStats, IoError>) {
        match result {
            Ok(stats) => tlog!("[bridge] Session with {} ended: {}", self.peer, stats),
            Err(e) => twarn!("[bridge] Session with {} ended with error: {}", self.peer, e),
        }
    }
}
