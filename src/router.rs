// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use std::sync::Arc;

use tracing::{debug, warn};

use crate::commands::WriteCommand;
use crate::protocol::{Address, CgateCommand};
use crate::queue::ThrottledQueue;
use crate::settings::Settings;
use crate::tracker::LevelTracker;

/// Side effects a routed command asks the orchestrator to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    None,
    /// A TREEXML was enqueued; pair the reply with this network.
    TreeRequested(String),
    /// Re-run Home Assistant discovery.
    Announce,
    /// A relative-level op was registered; arm its timeout with this token.
    StepPending { address: Address, generation: u64 },
}

/// Translates parsed MQTT write commands into paced C-Gate command lines.
pub struct CommandRouter {
    settings: Arc<Settings>,
    cgate_queue: ThrottledQueue<String>,
}

impl CommandRouter {
    pub fn new(settings: Arc<Settings>, cgate_queue: ThrottledQueue<String>) -> Self {
        Self { settings, cgate_queue }
    }

    pub async fn route(&self, command: WriteCommand, tracker: &mut LevelTracker) -> RouteOutcome {
        let project = self.settings.cgate_project.clone();
        match command {
            WriteCommand::GetAll { network, application } => {
                self.enqueue(CgateCommand::GetAllLevels { project, network, application }).await;
                RouteOutcome::None
            }
            WriteCommand::GetTree { network } => {
                self.enqueue(CgateCommand::TreeXml { network: network.clone() }).await;
                RouteOutcome::TreeRequested(network)
            }
            WriteCommand::Switch { address, on: true } => {
                self.enqueue(CgateCommand::On { project, address }).await;
                RouteOutcome::None
            }
            WriteCommand::Switch { address, on: false } => {
                self.enqueue(CgateCommand::Off { project, address }).await;
                RouteOutcome::None
            }
            WriteCommand::RampSet { address, level, ramp_time } => {
                self.enqueue(CgateCommand::Ramp { project, address, level, ramp_time }).await;
                RouteOutcome::None
            }
            WriteCommand::RampStep { address, step } => {
                let Some(generation) = tracker.register_step(address.clone(), step) else {
                    return RouteOutcome::None;
                };
                // Read-then-write: the level reply resolves the registration.
                self.enqueue(CgateCommand::GetLevel { project, address: address.clone() }).await;
                RouteOutcome::StepPending { address, generation }
            }
            WriteCommand::SetValue { address } => {
                warn!("router: setvalue for {address} is reserved, dropping");
                RouteOutcome::None
            }
            WriteCommand::Announce => {
                if self.settings.ha_discovery_enabled {
                    RouteOutcome::Announce
                } else {
                    debug!("router: announce received but discovery is disabled");
                    RouteOutcome::None
                }
            }
        }
    }

    /// Emit the RAMP completing a resolved relative-level op.
    pub async fn ramp_to(&self, address: Address, level: u8) {
        let project = self.settings.cgate_project.clone();
        self.enqueue(CgateCommand::Ramp { project, address, level, ramp_time: None }).await;
    }

    /// Enqueue the periodic / startup full-state refresh, if configured.
    pub async fn refresh_all(&self) {
        let Some((network, application)) = self.settings.get_all_net_app.clone() else {
            return;
        };
        let project = self.settings.cgate_project.clone();
        self.enqueue(CgateCommand::GetAllLevels { project, network, application }).await;
    }

    /// Enqueue a TREEXML request for one discovery network.
    pub async fn request_tree(&self, network: String) {
        let command = CgateCommand::TreeXml { network };
        self.enqueue(command).await;
    }

    async fn enqueue(&self, command: CgateCommand) {
        let line = command.to_wire_string();
        debug!("router: enqueue {line}");
        self.cgate_queue.push(line).await;
    }
}
