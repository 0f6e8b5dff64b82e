// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of cgate-connection-pool.js

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cgate::connection::{CgateConnection, ChannelKind, ConnectOptions, LinkEvent};
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventSender};
use crate::protocol::CgateCommand;
use crate::settings::Settings;

/// Slot rebuild backoff: 1s doubling per retry, capped at 30s.
const SLOT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const SLOT_BACKOFF_MAX: Duration = Duration::from_secs(30);
/// How long `stop()` waits for each connection to close.
const STOP_WAIT: Duration = Duration::from_secs(1);

/// Events the pool delivers to the orchestrator.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A response line from any pool member. Connections are not
    /// demultiplexed; all members fan into this single stream.
    Line(String),
    /// The healthy set changed size.
    Healthy { healthy: usize, total: usize },
}

/// Pool of command-channel connections with round-robin dispatch.
pub struct CommandPool {
    connections: Arc<Vec<Arc<CgateConnection>>>,
    healthy: Arc<StdMutex<BTreeSet<usize>>>,
    cursor: AtomicUsize,
    stopping: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommandPool {
    /// Bring up `poolSize` command connections concurrently. Resolves once
    /// at least one is healthy; fails if none connects within the
    /// per-connection timeout.
    pub async fn start(
        settings: &Settings,
        out: mpsc::Sender<PoolEvent>,
        events: EventSender,
    ) -> Result<Arc<Self>> {
        let total = settings.pool_size as usize;
        let login = settings
            .cgate_user
            .clone()
            .map(|user| (user, settings.cgate_password.clone().unwrap_or_default()));

        let (link_tx, link_rx) = mpsc::channel::<LinkEvent>(256);
        let mut connections = Vec::with_capacity(total);
        for index in 0..total {
            connections.push(CgateConnection::spawn(
                ConnectOptions {
                    host: settings.cgate_host.clone(),
                    port: settings.cgate_command_port,
                    kind: ChannelKind::Command,
                    index,
                    login: login.clone(),
                    initial_delay: SLOT_BACKOFF_INITIAL,
                    max_delay: SLOT_BACKOFF_MAX,
                    max_attempts: Some(settings.max_retries),
                    connect_timeout: settings.connection_timeout,
                },
                link_tx.clone(),
            ));
        }
        drop(link_tx);

        let pool = Arc::new(Self {
            connections: Arc::new(connections),
            healthy: Arc::new(StdMutex::new(BTreeSet::new())),
            cursor: AtomicUsize::new(0),
            stopping: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        });

        let (healthy_tx, mut healthy_rx) = watch::channel(0usize);
        let supervisor = tokio::spawn(supervise(
            link_rx,
            pool.healthy.clone(),
            pool.stopping.clone(),
            healthy_tx,
            out,
            events.clone(),
            total,
        ));

        let keep_alive = tokio::spawn(keep_alive_loop(
            pool.connections.clone(),
            pool.healthy.clone(),
            settings.keep_alive_interval,
        ));
        let health = tokio::spawn(health_check_loop(
            pool.connections.clone(),
            pool.healthy.clone(),
            settings.keep_alive_interval,
            settings.health_check_interval,
            events.clone(),
        ));
        pool.tasks.lock().await.extend([supervisor, keep_alive, health]);

        // Started once at least one member is healthy.
        let wait = timeout(settings.connection_timeout, healthy_rx.wait_for(|&h| h >= 1)).await;
        match wait {
            Ok(Ok(_)) => {
                let healthy = pool.healthy_count();
                info!("command pool started ({healthy}/{total} healthy)");
                let _ = events.send(BridgeEvent::PoolStarted { healthy, total });
                Ok(pool)
            }
            _ => {
                warn!("command pool failed to start: no connection became healthy");
                pool.stop().await;
                Err(BridgeError::ConnectionTimeout)
            }
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy.lock().unwrap().len()
    }

    pub fn total(&self) -> usize {
        self.connections.len()
    }

    /// Send one command line on the next healthy connection (round-robin).
    ///
    /// A failed write marks the connection suspect and surfaces the error;
    /// the command is never retried on another connection, so ordering with
    /// follow-up queries is preserved.
    pub async fn execute(&self, line: &str) -> Result<()> {
        let snapshot: Vec<usize> = {
            let healthy = self.healthy.lock().unwrap();
            healthy.iter().copied().collect()
        };
        if snapshot.is_empty() {
            return Err(BridgeError::NoHealthyConnection);
        }
        let pick = self.cursor.fetch_add(1, Ordering::SeqCst) % snapshot.len();
        let index = snapshot[pick];
        debug!("pool: dispatching on connection {index}: {line}");
        if self.connections[index].send_line(line).await {
            Ok(())
        } else {
            warn!("pool: connection {index} not writable, marking suspect");
            self.healthy.lock().unwrap().remove(&index);
            Err(BridgeError::NotConnected)
        }
    }

    /// Cancel timers, disconnect every member and wait (bounded) for each
    /// to close.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        for conn in self.connections.iter() {
            conn.disconnect();
        }
        for conn in self.connections.iter() {
            let deadline = tokio::time::Instant::now() + STOP_WAIT;
            while conn.is_connected() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        self.healthy.lock().unwrap().clear();
        info!("command pool stopped");
    }
}

/// Consume link events from every member: track the healthy set, fan lines
/// out to the orchestrator, raise the all-down alarm on the non-empty →
/// empty transition.
async fn supervise(
    mut link_rx: mpsc::Receiver<LinkEvent>,
    healthy: Arc<StdMutex<BTreeSet<usize>>>,
    stopping: Arc<AtomicBool>,
    healthy_tx: watch::Sender<usize>,
    out: mpsc::Sender<PoolEvent>,
    events: EventSender,
    total: usize,
) {
    while let Some(event) = link_rx.recv().await {
        match event {
            LinkEvent::Up { index } => {
                let count = {
                    let mut set = healthy.lock().unwrap();
                    set.insert(index);
                    set.len()
                };
                let _ = healthy_tx.send(count);
                let _ = out.send(PoolEvent::Healthy { healthy: count, total }).await;
            }
            LinkEvent::Down { index, .. } | LinkEvent::Exhausted { index } => {
                let (count, was_emptied) = {
                    let mut set = healthy.lock().unwrap();
                    let removed = set.remove(&index);
                    (set.len(), removed && set.is_empty())
                };
                let _ = healthy_tx.send(count);
                if was_emptied && !stopping.load(Ordering::SeqCst) {
                    warn!("pool: all command connections are down");
                    let _ = events.send(BridgeEvent::AllCommandLinksDown);
                }
                let _ = out.send(PoolEvent::Healthy { healthy: count, total }).await;
            }
            LinkEvent::Line { line, .. } => {
                if out.send(PoolEvent::Line(line)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Write a keep-alive comment to every healthy connection each interval.
/// C-Gate ignores `#` lines; the write keeps NAT/idle timers from reaping
/// quiet sockets and refreshes `last_activity`.
async fn keep_alive_loop(
    connections: Arc<Vec<Arc<CgateConnection>>>,
    healthy: Arc<StdMutex<BTreeSet<usize>>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot: Vec<usize> = healthy.lock().unwrap().iter().copied().collect();
        let stamp = chrono::Utc::now().timestamp_millis();
        let line = CgateCommand::Comment { text: format!("keep-alive {stamp}") }.to_wire_string();
        for index in snapshot {
            connections[index].send_line(&line).await;
        }
    }
}

/// Periodic sweep: evict dead sockets from the healthy set and probe the
/// ones that have been silent for more than twice the keep-alive interval.
async fn health_check_loop(
    connections: Arc<Vec<Arc<CgateConnection>>>,
    healthy: Arc<StdMutex<BTreeSet<usize>>>,
    keep_alive_interval: Duration,
    interval: Duration,
    events: EventSender,
) {
    let probe = CgateCommand::Comment { text: "health check ping".to_string() }.to_wire_string();
    let idle_limit = keep_alive_interval * 2;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for (index, conn) in connections.iter().enumerate() {
            if !conn.is_connected() {
                healthy.lock().unwrap().remove(&index);
            } else if conn.idle_for() > idle_limit {
                debug!("pool: probing idle connection {index}");
                conn.send_line(&probe).await;
            }
        }
        let count = healthy.lock().unwrap().len();
        let _ = events.send(BridgeEvent::HealthCheck { healthy: count, total: connections.len() });
    }
}
