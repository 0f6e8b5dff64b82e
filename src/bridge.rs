// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of the cgateweb bridge orchestration

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cgate::connection::{CgateConnection, ChannelKind, ConnectOptions, LinkEvent};
use crate::cgate::pool::{CommandPool, PoolEvent};
use crate::commands;
use crate::discovery::DiscoveryPublisher;
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventReceiver, EventSender, event_channel};
use crate::mqtt::{MqttClient, MqttEvent, MqttPublication};
use crate::protocol::{Address, CbusEvent};
use crate::publisher::EventPublisher;
use crate::queue::{QueueHandler, ThrottledQueue};
use crate::response::{ResponseAction, ResponseProcessor};
use crate::router::{CommandRouter, RouteOutcome};
use crate::settings::Settings;
use crate::tracker::{LevelTracker, RAMP_STEP_TIMEOUT};

/// Internal timer ticks delivered into the orchestrator loop.
#[derive(Debug)]
enum Tick {
    Refresh,
    StepExpired { address: Address, generation: u64 },
}

/// Clonable trigger that asks a running [`Bridge`] to shut down.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// Dispatches paced C-Gate command lines onto the pool.
struct PoolDispatch(Arc<CommandPool>);

impl QueueHandler<String> for PoolDispatch {
    async fn handle(&mut self, line: String) -> Result<()> {
        self.0.execute(&line).await
    }
}

/// Dispatches paced MQTT publications onto the broker session.
struct MqttDispatch(Arc<MqttClient>);

impl QueueHandler<MqttPublication> for MqttDispatch {
    async fn handle(&mut self, publication: MqttPublication) -> Result<()> {
        // publish() already logs its own failures.
        self.0.publish(publication).await;
        Ok(())
    }
}

/// The bridge orchestrator: owns every component and coordinates readiness,
/// the startup/periodic refresh, discovery and shutdown.
///
/// Readiness requires all three endpoints at once: an MQTT session, at
/// least one healthy pool connection, and the event channel. Entry actions
/// re-run each time readiness is regained.
pub struct Bridge {
    settings: Arc<Settings>,
    events: EventSender,
    shutdown: Arc<Notify>,
}

impl Bridge {
    pub fn new(settings: Settings) -> Self {
        let (events, _) = event_channel(64);
        Self { settings: Arc::new(settings), events, shutdown: Arc::new(Notify::new()) }
    }

    /// Subscribe to bridge lifecycle events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { notify: self.shutdown.clone() }
    }

    /// Run the bridge until shutdown is requested or a fatal error occurs.
    pub async fn run(&mut self) -> Result<()> {
        let settings = self.settings.clone();
        info!(
            "starting bridge: C-Gate {} (command :{}, event :{}), MQTT {}:{}",
            settings.cgate_host,
            settings.cgate_command_port,
            settings.cgate_event_port,
            settings.mqtt_host,
            settings.mqtt_port
        );

        let mqtt_queue =
            ThrottledQueue::<MqttPublication>::new(settings.message_interval, "mqtt queue");
        let cgate_queue = ThrottledQueue::<String>::new(settings.message_interval, "cgate queue");

        let (mqtt_tx, mut mqtt_rx) = mpsc::channel::<MqttEvent>(256);
        let (pool_tx, mut pool_rx) = mpsc::channel::<PoolEvent>(256);
        let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(256);
        let (tick_tx, mut tick_rx) = mpsc::channel::<Tick>(64);

        let mqtt = Arc::new(MqttClient::connect(&settings, mqtt_tx, self.events.clone()));
        let pool = CommandPool::start(&settings, pool_tx, self.events.clone()).await?;
        let event_link = CgateConnection::spawn(
            ConnectOptions {
                host: settings.cgate_host.clone(),
                port: settings.cgate_event_port,
                kind: ChannelKind::Event,
                index: 0,
                login: None,
                initial_delay: settings.reconnect_initial_delay,
                max_delay: settings.reconnect_max_delay,
                max_attempts: Some(settings.max_reconnect_attempts),
                connect_timeout: settings.connection_timeout,
            },
            link_tx,
        );

        let cgate_worker = cgate_queue.spawn(PoolDispatch(pool.clone()));
        let mqtt_worker = mqtt_queue.spawn(MqttDispatch(mqtt.clone()));

        let mut runtime = Runtime {
            settings: settings.clone(),
            events: self.events.clone(),
            cgate_queue: cgate_queue.clone(),
            publisher: EventPublisher::new(settings.clone(), mqtt_queue.clone()),
            router: CommandRouter::new(settings.clone(), cgate_queue.clone()),
            discovery: DiscoveryPublisher::new(settings.clone(), mqtt_queue.clone()),
            tracker: LevelTracker::new(),
            response: ResponseProcessor::new(),
            tick_tx,
            mqtt_up: false,
            pool_up: pool.healthy_count() > 0,
            event_up: false,
            ready: false,
            periodic: None,
        };

        let result = loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("shutdown requested");
                    break Ok(());
                }
                Some(event) = mqtt_rx.recv() => match event {
                    MqttEvent::Connected => {
                        runtime.mqtt_up = true;
                        runtime.update_ready().await;
                    }
                    MqttEvent::Disconnected => {
                        runtime.mqtt_up = false;
                        runtime.update_ready().await;
                    }
                    MqttEvent::AuthFailure => {
                        error!("fatal: MQTT authentication failed");
                        break Err(BridgeError::MqttAuth);
                    }
                    MqttEvent::Message { topic, payload } => {
                        runtime.on_mqtt_message(&topic, &payload).await;
                    }
                },
                Some(event) = pool_rx.recv() => match event {
                    PoolEvent::Healthy { healthy, .. } => {
                        runtime.pool_up = healthy > 0;
                        runtime.update_ready().await;
                    }
                    PoolEvent::Line(line) => runtime.on_command_line(&line).await,
                },
                Some(event) = link_rx.recv() => match event {
                    LinkEvent::Up { .. } => {
                        let _ = runtime.events.send(BridgeEvent::EventLinkUp);
                        runtime.event_up = true;
                        runtime.update_ready().await;
                    }
                    LinkEvent::Down { .. } => {
                        let _ = runtime.events.send(BridgeEvent::EventLinkDown);
                        runtime.event_up = false;
                        runtime.update_ready().await;
                    }
                    LinkEvent::Exhausted { .. } => {
                        error!("fatal: event channel gave up reconnecting; bridge stays not-ready");
                        runtime.event_up = false;
                        runtime.update_ready().await;
                    }
                    LinkEvent::Line { line, .. } => runtime.on_event_line(&line).await,
                },
                Some(tick) = tick_rx.recv() => match tick {
                    Tick::Refresh => runtime.router.refresh_all().await,
                    Tick::StepExpired { address, generation } => {
                        runtime.tracker.expire(&address, generation);
                    }
                },
                else => break Ok(()),
            }
        };

        // Teardown, regardless of how the loop ended.
        runtime.stop_periodic();
        cgate_queue.clear().await;
        mqtt_queue.clear().await;
        cgate_worker.abort();
        mqtt_worker.abort();
        event_link.disconnect();
        pool.stop().await;
        let _ = mqtt.disconnect().await;
        let _ = self.events.send(BridgeEvent::Stopped);
        info!("bridge stopped");
        result
    }
}

/// Mutable orchestrator state for one `run()`. Everything here lives in a
/// single task, which is what keeps the tracker, the response processor and
/// the readiness flags race-free.
struct Runtime {
    settings: Arc<Settings>,
    events: EventSender,
    cgate_queue: ThrottledQueue<String>,
    publisher: EventPublisher,
    router: CommandRouter,
    discovery: DiscoveryPublisher,
    tracker: LevelTracker,
    response: ResponseProcessor,
    tick_tx: mpsc::Sender<Tick>,
    mqtt_up: bool,
    pool_up: bool,
    event_up: bool,
    ready: bool,
    periodic: Option<JoinHandle<()>>,
}

impl Runtime {
    async fn update_ready(&mut self) {
        let ready_now = self.mqtt_up && self.pool_up && self.event_up;
        if ready_now && !self.ready {
            self.enter_ready().await;
        } else if !ready_now && self.ready {
            self.leave_ready().await;
        }
    }

    async fn enter_ready(&mut self) {
        self.ready = true;
        info!("bridge ready: all endpoints healthy");
        let _ = self.events.send(BridgeEvent::Ready);

        if self.settings.get_all_on_start {
            self.router.refresh_all().await;
        }
        if let Some(period) = self.settings.get_all_period {
            // Replace, never duplicate, the refresh timer.
            self.stop_periodic();
            let tick_tx = self.tick_tx.clone();
            self.periodic = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tick_tx.send(Tick::Refresh).await.is_err() {
                        break;
                    }
                }
            }));
        }
        if self.settings.ha_discovery_enabled {
            self.trigger_discovery().await;
        }
    }

    async fn leave_ready(&mut self) {
        self.ready = false;
        warn!("bridge no longer ready");
        let _ = self.events.send(BridgeEvent::NotReady);
        self.stop_periodic();
        // Undeliverable commands are dropped; pending relative ops with them.
        self.cgate_queue.clear().await;
        self.tracker.clear_pending();
    }

    fn stop_periodic(&mut self) {
        if let Some(task) = self.periodic.take() {
            task.abort();
        }
    }

    async fn trigger_discovery(&mut self) {
        for network in self.discovery.networks() {
            debug!("discovery: requesting tree for network {network}");
            self.response.tree_requested(network.clone());
            self.router.request_tree(network).await;
        }
    }

    async fn on_mqtt_message(&mut self, topic: &str, payload: &str) {
        let command = match commands::parse(topic, payload) {
            Ok(command) => command,
            Err(rejection) => {
                warn!("mqtt: dropping message on {topic}: {rejection}");
                return;
            }
        };
        match self.router.route(command, &mut self.tracker).await {
            RouteOutcome::None => {}
            RouteOutcome::TreeRequested(network) => self.response.tree_requested(network),
            RouteOutcome::Announce => self.trigger_discovery().await,
            RouteOutcome::StepPending { address, generation } => {
                let tick_tx = self.tick_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RAMP_STEP_TIMEOUT).await;
                    let _ = tick_tx.send(Tick::StepExpired { address, generation }).await;
                });
            }
        }
    }

    async fn on_command_line(&mut self, line: &str) {
        match self.response.process_line(line) {
            ResponseAction::Event(event) => self.on_event(event).await,
            ResponseAction::Tree { network, xml } => {
                self.discovery.publish_tree(&network, &xml).await;
            }
            ResponseAction::None => {}
        }
    }

    async fn on_event_line(&mut self, line: &str) {
        match CbusEvent::parse(line) {
            Some(event) => self.on_event(event).await,
            // The C-Gate banner and other chatter land here; benign.
            None => debug!("event: dropping unparseable line: {line}"),
        }
    }

    async fn on_event(&mut self, event: CbusEvent) {
        self.publisher.publish_event(&event).await;
        let level = event.effective_level();
        if let Some(resolved) = self.tracker.note_level(&event.address, level) {
            self.router.ramp_to(resolved.address, resolved.target).await;
        }
    }
}
