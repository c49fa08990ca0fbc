//! TCP server for the byte-bump protocol.
//!
//! Accepts connections and hands each one to a worker pool; the
//! worker greets the peer, then transforms the inbound byte stream
//! until the peer disconnects.

use crate::config::Config;
use crate::pool::ThreadPool;
use crate::protocol::{StreamTransformer, GREETING};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Listen backlog, matching the original deployment.
const BACKLOG: i32 = 15;

/// Read buffer size for the per-connection loop.
const READ_BUFFER_SIZE: usize = 1024;

/// Set by the signal handler; checked by the accept loop.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Server instance.
pub struct Server {
    config: Config,
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket from the configuration.
    pub fn bind(config: Config) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = create_listener(addr)?;
        Ok(Self { config, listener })
    }

    /// Address the server is actually listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until an interrupt signal arrives.
    ///
    /// Each accepted connection is dispatched to the worker pool and
    /// the loop returns to `accept` immediately. On SIGINT/SIGTERM the
    /// loop stops accepting, closes the listener, and waits for
    /// in-flight connections to finish.
    pub fn run(self) -> io::Result<()> {
        install_signal_handler()?;

        info!(addr = %self.local_addr()?, "Server listening");

        let mut pool = ThreadPool::new(self.config.workers)?;

        loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                info!("Interrupt received, shutting down");
                break;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "Peer connected");
                    pool.execute(move || serve_connection(stream, peer));
                }
                // The signal handler installs without SA_RESTART, so a
                // blocking accept returns EINTR and we re-check the flag.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        // Stop listening first; in-flight workers then run to their
        // natural completion.
        drop(self.listener);
        pool.join();
        info!("Server shutdown complete");
        Ok(())
    }
}

/// Serve one connection to completion.
///
/// Peer close and read/write errors are both normal completion:
/// logged, never retried or escalated. The socket is closed exactly
/// once, when it is dropped here.
pub fn serve_connection(mut stream: TcpStream, peer: SocketAddr) {
    match transform_stream(&mut stream) {
        Ok(()) => info!(peer = %peer, "Peer disconnected"),
        Err(e) => debug!(peer = %peer, error = %e, "Connection ended with error"),
    }
}

/// Greet the peer, then echo the transformed byte stream.
///
/// Output bytes are written one at a time, in the order the
/// corresponding input bytes were processed.
fn transform_stream(stream: &mut TcpStream) -> io::Result<()> {
    stream.write_all(&[GREETING])?;

    let mut transformer = StreamTransformer::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            return Ok(());
        }

        for &byte in &buffer[..n] {
            if let Some(echoed) = transformer.advance(byte) {
                stream.write_all(&[echoed])?;
            }
        }
    }
}

/// Create the listening socket with `SO_REUSEADDR` and a fixed backlog.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

extern "C" fn on_signal(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that request shutdown.
///
/// SA_RESTART is deliberately left out: a blocking `accept` must
/// return EINTR so the accept loop can observe the flag.
fn install_signal_handler() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        for signum in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
