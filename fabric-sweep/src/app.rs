// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Build a fabric from the configuration and sweep it.

use std::path::Path;
use std::sync::Arc;

use fabric_routing::engine::{RoutingEngine, SweepStatus};
use fabric_routing::mock::build_all_to_all;
use fabric_routing::types::SubdeviceId;
use fabric_track::builder::{STDOUT_FILE, TrackerConfig, TrackersConfig, setup_trackers};
use fabric_track::entity::{Entity, toplevel};
use fabric_track::tracker::TrackConfigError;
use fabric_track::{Tracker, error, info, str_to_level, warn};
use itertools::Itertools;
use log::LevelFilter;
use simplelog::{ConfigBuilder, SimpleLogger};

use crate::config::{Config, ConfigError};
use crate::description::FabricDescription;
use crate::sim_transport::SimTransport;

/// Build the tracker selected by the logging options.
///
/// When the `log` facade is selected a [`SimpleLogger`] is installed as its
/// backend.
pub fn setup_tracker(config: &Config) -> Result<Tracker, TrackConfigError> {
    let level = str_to_level(config.log_level.as_deref().unwrap_or("info"))?;
    let filter_regex = config.log_filter_regex.as_deref().unwrap_or_default();
    let facade = config.log_facade.unwrap_or_default();

    if facade {
        let logger_config = ConfigBuilder::new()
            .set_time_level(LevelFilter::Off)
            .set_target_level(LevelFilter::Off)
            .build();
        SimpleLogger::init(level.to_level_filter(), logger_config)
            .map_err(|e| TrackConfigError(format!("Unable to set up logger: {e}")))?;
    }

    setup_trackers(&TrackersConfig {
        text: TrackerConfig {
            enable: !facade,
            level,
            filter_regex,
            file: Some(config.log_file.as_deref().unwrap_or(STDOUT_FILE)),
        },
        facade: TrackerConfig {
            enable: facade,
            level,
            filter_regex,
            file: None,
        },
    })
}

pub struct App {
    pub top: Arc<Entity>,
    pub engine: RoutingEngine,
    pub transport: Arc<SimTransport>,
    failing: Vec<SubdeviceId>,
}

impl App {
    /// Register the configured fabric with a new engine.
    pub fn build(config: &Config, tracker: &Tracker) -> Result<App, ConfigError> {
        let top = toplevel(tracker, "fabric");
        let transport = Arc::new(SimTransport::new(&top));
        let engine = RoutingEngine::new(&top, transport.clone());

        let topology = config.topology.as_deref().unwrap_or_default();
        if topology.is_empty() {
            let devices = config.devices.unwrap_or(4);
            let subdevices = config.subdevices.unwrap_or(2);
            info!(top ; "all-to-all fabric of {devices} devices with {subdevices} subdevices");
            build_all_to_all(&engine, devices, subdevices)?;
        } else {
            let description = FabricDescription::load(Path::new(topology))?;
            info!(top ;
                "{}: {} devices, {} links",
                topology,
                description.devices.len(),
                description.links.len()
            );
            description.apply(&engine)?;
        }

        let failing = config
            .fail_writes
            .iter()
            .flatten()
            .map(|name| name.parse::<SubdeviceId>())
            .collect::<Result<Vec<_>, _>>()?;
        for sd in &failing {
            transport.fail(*sd);
        }

        Ok(App {
            top,
            engine,
            transport,
            failing,
        })
    }

    /// Sweep until the fabric is routed with nothing left to do, or `sweeps`
    /// attempts have been made.
    ///
    /// Subdevices that failed are repaired and reset after a failed sweep so
    /// that the next one can bring them back.
    pub fn run(&mut self, sweeps: u32) -> Vec<SweepStatus> {
        let mut statuses = Vec::new();
        for _ in 0..sweeps {
            self.engine.resweep_signal().take();
            match self.engine.sweep() {
                Ok(status) => {
                    let done = status.committed && !self.engine.resweep_requested();
                    statuses.push(status);
                    if done {
                        break;
                    }
                }
                Err(e) => error!(self.top ; "sweep abandoned: {e}"),
            }
            self.recover();
        }
        statuses
    }

    fn recover(&mut self) {
        for sd in self.failing.drain(..) {
            self.transport.repair(sd);
        }

        let errored: Vec<_> = self
            .engine
            .fabric()
            .subdevices()
            .filter(|sd| sd.is_error())
            .map(|sd| sd.id())
            .collect();
        if errored.is_empty() {
            return;
        }
        info!(self.top ; "resetting {}", errored.iter().join(", "));
        for id in errored {
            if let Err(e) = self.engine.reset_subdevice(id) {
                warn!(self.top ; "{e}");
            }
        }
    }

    /// Log the ports carrying traffic on every subdevice.
    pub fn report(&self) {
        for (id, mask) in self.engine.ports_in_use() {
            let ports = (0..32u32).filter(|lpn| mask & (1 << lpn) != 0).join(",");
            info!(self.top ; "{id}: ports in use [{ports}]");
        }
        info!(self.top ; "{} hardware accesses", self.transport.total_writes());
    }
}
