//! Reliable line-oriented TCP transport.
//!
//! The socket runs a background worker that keeps the connection alive:
//! on read or connect errors it reconnects with a bounded retry interval.
//! Incoming lines are timestamped and queued on a bounded channel that
//! drops the oldest entry on overflow; outgoing lines are queued and
//! flushed by the worker. Reconnection preserves neither in-flight writes
//! nor ordering.

use crate::error::{Error, Result};
use crate::protocol::messages::TimedLine;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capacity of the incoming line queue.
const LINE_QUEUE_CAPACITY: usize = 256;
/// Capacity of the outgoing line queue.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Local wall clock (ms since epoch).
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub read_timeout: Duration,
}

impl SocketConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(3),
            read_timeout: Duration::from_millis(100),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection state changes observable by the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Closed,
}

/// Retrying TCP client exposing timed incoming lines and an outgoing sink.
pub struct ReliableSocket {
    lines: Receiver<TimedLine>,
    events: Receiver<ConnectionEvent>,
    outgoing: Sender<String>,
    closed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReliableSocket {
    /// Creates the socket and starts the connection worker.
    pub fn connect(config: SocketConfig) -> Result<Self> {
        let (lines_tx, lines_rx) = bounded(LINE_QUEUE_CAPACITY);
        let (events_tx, events_rx) = bounded(16);
        let (out_tx, out_rx) = bounded(WRITE_QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let worker_closed = Arc::clone(&closed);
        let worker_lines = lines_rx.clone();
        let worker = std::thread::Builder::new()
            .name("robot-socket".to_string())
            .spawn(move || {
                run_worker(
                    config,
                    lines_tx,
                    worker_lines,
                    events_tx,
                    out_rx,
                    worker_closed,
                );
            })?;

        Ok(Self {
            lines: lines_rx,
            events: events_rx,
            outgoing: out_tx,
            closed,
            worker: Some(worker),
        })
    }

    /// Reads the next timed line, waiting at most `timeout`.
    pub fn read_line(&self, timeout: Duration) -> Option<TimedLine> {
        self.lines.recv_timeout(timeout).ok()
    }

    /// Reads a line without waiting.
    pub fn try_read_line(&self) -> Option<TimedLine> {
        self.lines.try_recv().ok()
    }

    /// Queues a line for transmission.
    pub fn send_line(&self, line: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.outgoing
            .send(line.to_string())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Polls the next connection event, if any.
    pub fn poll_event(&self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    /// True when the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the socket and joins the worker.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ReliableSocket {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(
    config: SocketConfig,
    lines_tx: Sender<TimedLine>,
    lines_rx: Receiver<TimedLine>,
    events_tx: Sender<ConnectionEvent>,
    out_rx: Receiver<String>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::Acquire) {
        match open_stream(&config) {
            Ok(stream) => {
                log::info!("connected to {}", config.address());
                let _ = events_tx.try_send(ConnectionEvent::Connected);
                if let Err(e) = serve(stream, &lines_tx, &lines_rx, &out_rx, &closed) {
                    log::warn!("connection lost: {}", e);
                }
                if !closed.load(Ordering::Acquire) {
                    let _ = events_tx.try_send(ConnectionEvent::Disconnected);
                }
            }
            Err(e) => {
                log::warn!("connect to {} failed: {}", config.address(), e);
            }
        }
        wait_retry(&config.retry_interval, &closed);
    }
    let _ = events_tx.try_send(ConnectionEvent::Closed);
}

fn open_stream(config: &SocketConfig) -> Result<TcpStream> {
    let address = config
        .address()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::NotFound, "no address")))?;
    let stream = TcpStream::connect_timeout(&address, config.connect_timeout)?;
    stream.set_read_timeout(Some(config.read_timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Serves one live connection until error, EOF or close.
fn serve(
    stream: TcpStream,
    lines_tx: &Sender<TimedLine>,
    lines_rx: &Receiver<TimedLine>,
    out_rx: &Receiver<String>,
    closed: &Arc<AtomicBool>,
) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut buffer = String::new();

    while !closed.load(Ordering::Acquire) {
        // Flush pending writes first
        for line in out_rx.try_iter() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        buffer.clear();
        match reader.read_line(&mut buffer) {
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "peer closed",
                )));
            }
            Ok(_) => {
                let line = TimedLine::new(buffer.trim_end_matches(['\r', '\n']), now_millis());
                log::trace!("<-- {:?}", line.line);
                push_drop_oldest(lines_tx, lines_rx, line);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

/// Pushes a line on the bounded queue, discarding the oldest on overflow.
fn push_drop_oldest(tx: &Sender<TimedLine>, rx: &Receiver<TimedLine>, line: TimedLine) {
    match tx.try_send(line) {
        Ok(()) => {}
        Err(TrySendError::Full(line)) => {
            let _ = rx.try_recv();
            if tx.try_send(line).is_err() {
                log::warn!("line queue overflow, dropping line");
            }
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn wait_retry(interval: &Duration, closed: &Arc<AtomicBool>) {
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < *interval && !closed.load(Ordering::Acquire) {
        std::thread::sleep(step);
        waited += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn test_config(port: u16) -> SocketConfig {
        let mut config = SocketConfig::new("127.0.0.1", port);
        config.retry_interval = Duration::from_millis(50);
        config.read_timeout = Duration::from_millis(20);
        config
    }

    #[test]
    fn test_receive_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"st 1 0 0 0 0 0 0 1 0 0 0 0\npx 1 0 0 0 0 0\n")
                .unwrap();
            peer.flush().unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut socket = ReliableSocket::connect(test_config(port)).unwrap();
        let first = socket.read_line(Duration::from_secs(2)).unwrap();
        assert!(first.line.starts_with("st "));
        let second = socket.read_line(Duration::from_secs(2)).unwrap();
        assert!(second.line.starts_with("px "));
        assert!(second.local_time >= first.local_time);

        socket.close();
        server.join().unwrap();
    }

    #[test]
    fn test_send_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(peer);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            line
        });

        let mut socket = ReliableSocket::connect(test_config(port)).unwrap();
        socket.send_line("qs").unwrap();
        let received = server.join().unwrap();
        assert_eq!(received, "qs\n");
        socket.close();
    }

    #[test]
    fn test_closed_rejects_send() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut socket = ReliableSocket::connect(test_config(port)).unwrap();
        socket.close();
        assert!(matches!(
            socket.send_line("qs"),
            Err(Error::ConnectionClosed)
        ));
        drop(listener);
    }
}
