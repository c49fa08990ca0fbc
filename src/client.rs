//! Scripted client for the byte-bump protocol.
//!
//! Each session opens one connection, reads the one-byte greeting,
//! then runs a writer (the fixed message script) and a reader (which
//! accumulates responses until the sentinel appears) concurrently on
//! the same socket. A driver fans out any number of independent
//! sessions and waits for all of them.

use crate::protocol::{contains_sentinel, GREETING};
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Read chunk size for the response reader.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One scripted send: a payload followed by a pause.
#[derive(Debug, Clone, Copy)]
pub struct ScriptStep {
    /// Bytes to send.
    pub payload: &'static [u8],
    /// How long to wait after sending.
    pub pause: Duration,
}

/// The fixed message script every session sends.
///
/// The `0000` framed inside the final payload comes back from the
/// server as `1111`, which is the reader's cue to terminate.
pub const SCRIPT: &[ScriptStep] = &[
    ScriptStep {
        payload: b"^abc$de^abte$f",
        pause: Duration::from_millis(1000),
    },
    ScriptStep {
        payload: b"xyz^123",
        pause: Duration::from_millis(1000),
    },
    ScriptStep {
        payload: b"25$^ab0000$abab",
        pause: Duration::from_millis(200),
    },
];

/// One client session: a connection plus its writer and reader.
pub struct Session {
    name: String,
    host: String,
    port: u16,
    script: &'static [ScriptStep],
}

impl Session {
    /// Create a session that will send the default script.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::with_script(name, host, port, SCRIPT)
    }

    /// Create a session with a custom script.
    pub fn with_script(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        script: &'static [ScriptStep],
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            script,
        }
    }

    /// Run the session to completion.
    ///
    /// Connects, performs the handshake read, starts the reader
    /// thread, sends the script, then joins the reader before the
    /// socket is closed (once, on drop).
    pub fn run(&self) -> io::Result<()> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;

        let mut greeting = [0u8; 1];
        stream.read_exact(&mut greeting)?;
        if greeting[0] != GREETING {
            // Deliberately non-fatal: log and carry on.
            error!(
                session = %self.name,
                byte = greeting[0],
                "Did not receive server greeting"
            );
        }
        info!(session = %self.name, "Connected");

        let reader_name = self.name.clone();
        let reader_stream = stream.try_clone()?;
        let reader = thread::Builder::new()
            .name(format!("{}-reader", self.name))
            .spawn(move || read_responses(&reader_name, reader_stream))?;

        for step in self.script {
            debug!(
                session = %self.name,
                payload = %String::from_utf8_lossy(step.payload),
                "Sending"
            );
            stream.write_all(step.payload)?;
            thread::sleep(step.pause);
        }

        match reader.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(session = %self.name, error = %e, "Reader failed"),
            Err(_) => error!(session = %self.name, "Reader thread panicked"),
        }

        info!(session = %self.name, "Disconnecting");
        Ok(())
    }
}

/// Read responses until the sentinel appears in the accumulated stream.
///
/// The containment check runs against the full accumulated buffer
/// after every chunk, so a sentinel straddling two reads is still
/// found. There is no timeout: absent the sentinel, the reader blocks
/// until data arrives or the server closes the connection.
fn read_responses(name: &str, mut stream: TcpStream) -> io::Result<BytesMut> {
    let mut accumulated = BytesMut::new();
    let mut chunk = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            warn!(session = %name, "Server closed connection before sentinel");
            break;
        }

        debug!(
            session = %name,
            received = %String::from_utf8_lossy(&chunk[..n]),
            "Received"
        );
        accumulated.extend_from_slice(&chunk[..n]);

        if contains_sentinel(&accumulated) {
            debug!(session = %name, total = accumulated.len(), "Sentinel received");
            break;
        }
    }

    Ok(accumulated)
}

/// Run `count` independent sessions concurrently and wait for all.
///
/// Returns the elapsed wall-clock time. Sessions do not interact;
/// a failed session is logged and does not abort the others.
pub fn run_sessions(host: &str, port: u16, count: usize) -> io::Result<Duration> {
    let start = Instant::now();

    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("conn{i}");
        let session = Session::new(name.clone(), host, port);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Err(e) = session.run() {
                error!(session = %name, error = %e, "Session failed");
            }
        })?;
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.join();
    }

    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SENTINEL;
    use crate::server::serve_connection;
    use std::net::{SocketAddr, TcpListener};

    /// A script with the production payloads but without the long
    /// pauses, so session tests finish quickly.
    const FAST_SCRIPT: &[ScriptStep] = &[
        ScriptStep {
            payload: b"^abc$de^abte$f",
            pause: Duration::from_millis(10),
        },
        ScriptStep {
            payload: b"xyz^123",
            pause: Duration::from_millis(10),
        },
        ScriptStep {
            payload: b"25$^ab0000$abab",
            pause: Duration::from_millis(10),
        },
    ];

    fn spawn_echo_server(connections: usize) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut handles = Vec::new();
            for _ in 0..connections {
                let (stream, peer) = listener.accept().unwrap();
                handles.push(thread::spawn(move || serve_connection(stream, peer)));
            }
            for handle in handles {
                handle.join().unwrap();
            }
        });

        (addr, handle)
    }

    #[test]
    fn test_reader_detects_sentinel_split_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"ab11").unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(100));
            stream.write_all(b"11cd").unwrap();
            // Keep the socket open: the reader must stop on the
            // sentinel, not on EOF.
            thread::sleep(Duration::from_millis(200));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let accumulated = read_responses("test", stream).unwrap();
        assert!(contains_sentinel(&accumulated));

        server.join().unwrap();
    }

    #[test]
    fn test_reader_stops_on_eof_without_sentinel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"no sentinel here").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let accumulated = read_responses("test", stream).unwrap();
        assert_eq!(&accumulated[..], b"no sentinel here");

        server.join().unwrap();
    }

    #[test]
    fn test_session_against_live_server() {
        let (addr, server) = spawn_echo_server(1);

        let session = Session::with_script("conn0", "127.0.0.1", addr.port(), FAST_SCRIPT);
        session.run().unwrap();

        server.join().unwrap();
    }

    #[test]
    fn test_script_response_is_exactly_the_transform() {
        let (addr, server) = spawn_echo_server(1);

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut greeting = [0u8; 1];
        stream.read_exact(&mut greeting).unwrap();
        assert_eq!(greeting[0], GREETING);

        for step in SCRIPT {
            stream.write_all(step.payload).unwrap();
        }
        stream.shutdown(std::net::Shutdown::Write).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"bcdbcuf23436bc1111");
        assert!(response.ends_with(SENTINEL));

        server.join().unwrap();
    }

    #[test]
    fn test_driver_fans_out_sessions() {
        let (addr, server) = spawn_echo_server(3);

        let start = Instant::now();
        let mut handles = Vec::new();
        for i in 0..3 {
            let port = addr.port();
            handles.push(thread::spawn(move || {
                let session =
                    Session::with_script(format!("conn{i}"), "127.0.0.1", port, FAST_SCRIPT);
                session.run().unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Sessions ran concurrently, not back to back.
        assert!(start.elapsed() < Duration::from_secs(5));
        server.join().unwrap();
    }
}
