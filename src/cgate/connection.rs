// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of cgate-connection.js

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::framing::LineFramer;
use crate::protocol::CgateCommand;

/// Which C-Gate channel this socket speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Command port: handshake is `EVENT ON` plus an optional `LOGIN`.
    Command,
    /// Event port: no handshake, receive-only.
    Event,
}

/// Everything a connection needs to dial and keep dialing.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub kind: ChannelKind,
    /// Pool slot index; 0 for the singular event connection.
    pub index: usize,
    pub login: Option<(String, String)>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before the connection gives up for good.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub connect_timeout: Duration,
}

/// Events a connection delivers to its owner.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Up { index: usize },
    Down { index: usize, had_error: bool },
    Line { index: usize, line: String },
    /// The retry budget is spent; the connection is terminally closed.
    Exhausted { index: usize },
}

/// One TCP link to C-Gate with supervised reconnection.
///
/// The lifecycle is Idle → Connecting → Connected → Backoff → Connecting …
/// until either `disconnect()` is called or the attempt budget runs out,
/// both of which are terminal.
pub struct CgateConnection {
    index: usize,
    kind: ChannelKind,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    connected: Arc<AtomicBool>,
    last_activity: Arc<std::sync::Mutex<Instant>>,
    shutdown: watch::Sender<bool>,
}

impl CgateConnection {
    /// Spawn the connection supervisor. Link events (including every framed
    /// line received) are delivered on `events`.
    pub fn spawn(opts: ConnectOptions, events: mpsc::Sender<LinkEvent>) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let conn = Arc::new(Self {
            index: opts.index,
            kind: opts.kind,
            writer: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(std::sync::Mutex::new(Instant::now())),
            shutdown,
        });

        tokio::spawn(supervise(opts, conn.clone(), events, shutdown_rx));
        conn
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Time since the socket last sent or received anything.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Write one line (newline appended). Returns false when the socket is
    /// not writable; the caller decides what that means.
    pub async fn send_line(&self, line: &str) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        match writer.write_all(&bytes).await {
            Ok(()) => {
                *self.last_activity.lock().unwrap() = Instant::now();
                true
            }
            Err(e) => {
                warn!("cgate[{}]: write failed: {}", self.index, e);
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Terminal disconnect: stops the supervisor, cancels any pending
    /// backoff, closes the socket. The connection will not reconnect.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn supervise(
    opts: ConnectOptions,
    conn: Arc<CgateConnection>,
    events: mpsc::Sender<LinkEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let label = match opts.kind {
        ChannelKind::Command => "command",
        ChannelKind::Event => "event",
    };
    let mut attempts: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        debug!("cgate[{}]: connecting to {}:{} ({})", opts.index, opts.host, opts.port, label);
        let dial = TcpStream::connect((opts.host.as_str(), opts.port));
        match timeout(opts.connect_timeout, dial).await {
            Ok(Ok(stream)) => {
                attempts = 0;
                info!("cgate[{}]: {} channel connected", opts.index, label);
                let (read_half, write_half) = stream.into_split();
                *conn.writer.lock().await = Some(write_half);
                *conn.last_activity.lock().unwrap() = Instant::now();
                conn.connected.store(true, Ordering::SeqCst);

                if opts.kind == ChannelKind::Command {
                    handshake(&conn, &opts).await;
                }
                if events.send(LinkEvent::Up { index: opts.index }).await.is_err() {
                    break;
                }

                let had_error =
                    read_loop(read_half, &conn, &events, &mut shutdown_rx, opts.index).await;

                conn.connected.store(false, Ordering::SeqCst);
                *conn.writer.lock().await = None;
                let _ = events
                    .send(LinkEvent::Down { index: opts.index, had_error })
                    .await;
                if *shutdown_rx.borrow() {
                    break;
                }
                warn!("cgate[{}]: {} channel closed", opts.index, label);
            }
            Ok(Err(e)) => {
                warn!("cgate[{}]: connect failed: {}", opts.index, e);
            }
            Err(_) => {
                warn!(
                    "cgate[{}]: connect timed out after {:?}",
                    opts.index, opts.connect_timeout
                );
            }
        }

        attempts += 1;
        if let Some(max) = opts.max_attempts
            && attempts >= max
        {
            error!(
                "cgate[{}]: giving up on {} channel after {} attempts",
                opts.index, label, attempts
            );
            let _ = events.send(LinkEvent::Exhausted { index: opts.index }).await;
            break;
        }

        let exponent = attempts.saturating_sub(1).min(16);
        let delay = opts
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(opts.max_delay);
        debug!("cgate[{}]: retrying in {:?}", opts.index, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    conn.connected.store(false, Ordering::SeqCst);
    *conn.writer.lock().await = None;
    debug!("cgate[{}]: supervisor stopped", opts.index);
}

/// Command-channel handshake: `EVENT ON`, then `LOGIN` when credentials are
/// configured.
async fn handshake(conn: &CgateConnection, opts: &ConnectOptions) {
    if !conn.send_line(&CgateCommand::EventOn.to_wire_string()).await {
        return;
    }
    if let Some((user, password)) = &opts.login {
        let login = CgateCommand::Login { user: user.clone(), password: password.clone() };
        conn.send_line(&login.to_wire_string()).await;
    }
}

/// Pump the socket through the line framer until it closes. Returns whether
/// the close was caused by an error.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    conn: &CgateConnection,
    events: &mpsc::Sender<LinkEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    index: usize,
) -> bool {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            result = read_half.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("cgate[{index}]: peer closed the connection");
                    return false;
                }
                Ok(n) => {
                    *conn.last_activity.lock().unwrap() = Instant::now();
                    let mut lines = Vec::new();
                    if let Err(e) = framer.feed(&buf[..n], |line| lines.push(line)) {
                        error!("cgate[{index}]: {e}");
                        return true;
                    }
                    for line in lines {
                        if events.send(LinkEvent::Line { index, line }).await.is_err() {
                            return false;
                        }
                    }
                }
                Err(e) => {
                    error!("cgate[{index}]: read error: {e}");
                    return true;
                }
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn opts(port: u16, kind: ChannelKind, login: Option<(String, String)>) -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port,
            kind,
            index: 0,
            login,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_command_handshake_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::channel(64);
        let conn = CgateConnection::spawn(
            opts(port, ChannelKind::Command, Some(("admin".into(), "pw".into()))),
            tx,
        );

        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = tokio::io::BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "EVENT ON\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "LOGIN admin pw\n");

        // Up event observed.
        loop {
            match rx.recv().await.unwrap() {
                LinkEvent::Up { index: 0 } => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(conn.is_connected());
        assert!(conn.send_line("GET //HOME/254/56/4 level").await);
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "GET //HOME/254/56/4 level\n");

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_event_channel_receives_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::channel(64);
        let conn = CgateConnection::spawn(opts(port, ChannelKind::Event, None), tx);

        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"lighting on 254/56/4\n").await.unwrap();

        let mut saw_up = false;
        let mut saw_line = false;
        while let Some(event) = rx.recv().await {
            match event {
                LinkEvent::Up { .. } => saw_up = true,
                LinkEvent::Line { line, .. } => {
                    assert_eq!(line, "lighting on 254/56/4");
                    saw_line = true;
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_up && saw_line);
        conn.disconnect();
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::channel(64);
        let conn = CgateConnection::spawn(opts(port, ChannelKind::Event, None), tx);

        // First connect, then drop the server side.
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        // The supervisor must come back for a second connect.
        let (_stream2, _) = listener.accept().await.unwrap();

        let mut ups = 0;
        let mut downs = 0;
        while ups < 2 {
            match rx.recv().await.unwrap() {
                LinkEvent::Up { .. } => ups += 1,
                LinkEvent::Down { .. } => downs += 1,
                _ => {}
            }
        }
        assert_eq!(downs, 1);
        conn.disconnect();
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal() {
        // Nothing listens on this port; grab one and release it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut o = opts(port, ChannelKind::Command, None);
        o.max_attempts = Some(2);
        let (tx, mut rx) = mpsc::channel(64);
        let conn = CgateConnection::spawn(o, tx);

        loop {
            match rx.recv().await {
                Some(LinkEvent::Exhausted { index: 0 }) => break,
                Some(_) => {}
                None => panic!("channel closed before Exhausted"),
            }
        }
        assert!(!conn.is_connected());
        assert!(!conn.send_line("EVENT ON").await);
    }
}
