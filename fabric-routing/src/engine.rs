// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The sweep orchestrator.
//!
//! A sweep runs the logic phase with exclusive access to the registry,
//! downgrades to shared access for the programming phase and then commits or
//! discards the staged tables of every subdevice.
//!
//! Two generation counters let clients know when a change has been
//! programmed: `start` increases at the beginning of every sweep and `end`
//! catches up with it only when a sweep commits with no subdevice failing.
//! A client that saw `start == N` before making a change can rely on it once
//! `end > N`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use fabric_track::entity::Entity;
use fabric_track::{debug, error, info, warn};
use parking_lot::{Mutex, RwLockWriteGuard};

use crate::event::ResweepSignal;
use crate::port::FabricPort;
use crate::registry::{Device, DeviceDesc, Fabric, FabricReadGuard, Registry};
use crate::transport::Transport;
use crate::types::{PortRef, RoutingError, RoutingResult, SubdeviceId};
use crate::{io, logic};

/// Summary of the fabric after a sweep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepStatus {
    pub generation: u32,
    pub committed: bool,
    pub subdevices_good: usize,
    pub subdevices_total: usize,
    pub ports_used: usize,
    pub ports_up: usize,
    pub ports_total: usize,
    pub planes: usize,
    pub logic_time: Duration,
    pub io_time: Duration,
}

impl SweepStatus {
    /// Ports are only counted on subdevices that are not in ERROR.
    fn collect(fabric: &Fabric) -> Self {
        let mut status = Self {
            planes: fabric.topology.num_planes(),
            ..Default::default()
        };
        for sd in fabric.subdevices() {
            status.subdevices_total += 1;
            if sd.is_error() {
                continue;
            }
            status.subdevices_good += 1;
            for port in sd.ports() {
                status.ports_total += 1;
                if port.is_routable() {
                    status.ports_up += 1;
                }
                if port.routed {
                    status.ports_used += 1;
                }
            }
        }
        status
    }
}

impl fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "gen {} {}: sds {}/{} ports {}/{}/{} planes {} logic {}ms io {}ms",
            self.generation,
            if self.committed { "pass" } else { "fail" },
            self.subdevices_good,
            self.subdevices_total,
            self.ports_used,
            self.ports_up,
            self.ports_total,
            self.planes,
            self.logic_time.as_millis(),
            self.io_time.as_millis()
        )
    }
}

pub struct RoutingEngine {
    pub entity: Arc<Entity>,
    registry: Registry,
    transport: Arc<dyn Transport>,
    gen_start: AtomicU32,
    gen_end: AtomicU32,

    /// Serializes sweeps.
    sweep_lock: Mutex<()>,

    resweep: ResweepSignal,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, transport: Arc<dyn Transport>) -> Self {
        let entity = Arc::new(Entity::new(parent, "routing"));
        Self {
            registry: Registry::new(&entity),
            entity,
            transport,
            gen_start: AtomicU32::new(0),
            gen_end: AtomicU32::new(0),
            sweep_lock: Mutex::new(()),
            resweep: ResweepSignal::new(),
        }
    }

    /// Shared access to the fabric.
    pub fn fabric(&self) -> FabricReadGuard<'_> {
        self.registry.read()
    }

    /// The `(start, end)` generation counters.
    #[must_use]
    pub fn generation(&self) -> (u32, u32) {
        // Read end first so that end <= start holds for the returned pair.
        let end = self.gen_end.load(Ordering::SeqCst);
        let start = self.gen_start.load(Ordering::SeqCst);
        (start, end)
    }

    /// Run one full sweep.
    ///
    /// Failures of individual subdevices do not fail the sweep: they are
    /// reported in the returned status and cause a resweep request. An
    /// error is returned only when the sweep is abandoned as a whole, in
    /// which case nothing is committed and a resweep is also requested.
    pub fn sweep(&self) -> Result<SweepStatus, RoutingError> {
        let _serial = self.sweep_lock.lock();

        let mut fabric = self.registry.write();
        let generation = self.gen_start.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(self.entity ; "sweep {generation} start");

        let logic_start = Instant::now();
        let logic_result = logic::run(&mut fabric, &self.entity);
        let logic_time = logic_start.elapsed();

        let fabric = RwLockWriteGuard::downgrade(fabric);

        let io_start = Instant::now();
        let result = match logic_result {
            Ok(()) => io::run(&fabric, &*self.transport, &self.entity),
            Err(e) => Err(e),
        };
        let io_time = io_start.elapsed();

        let sd_error = fabric.topology.sd_error_signaled();
        let committed = result.is_ok() && !sd_error;
        for sd in fabric.subdevices() {
            let mut routing = sd.routing();
            if committed && !routing.is_error() {
                routing.promote();
            } else {
                routing.discard_next();
            }
        }

        if let Err(e) = &result {
            error!(self.entity ; "sweep {generation} abandoned: {e}");
            self.request_resweep();
        } else if sd_error {
            warn!(self.entity ; "device error during routing; scheduling resweep");
            self.request_resweep();
        } else {
            update_routed(&fabric);
            self.gen_end.store(generation, Ordering::SeqCst);
        }

        let status = SweepStatus {
            generation: self.gen_end.load(Ordering::SeqCst),
            committed,
            logic_time,
            io_time,
            ..SweepStatus::collect(&fabric)
        };
        info!(self.entity ; "{status}");

        result.map(|()| status)
    }

    /// Ports of `port_mask` on `id` that carry routed traffic.
    pub fn port_in_use(&self, id: SubdeviceId, port_mask: u32) -> Result<u32, RoutingError> {
        let fabric = self.registry.read();
        match fabric.subdevice(id) {
            Some(sd) => Ok(sd.port_routed_query(port_mask)),
            None => Err(RoutingError(format!("{id} not registered"))),
        }
    }

    /// Routed ports of every subdevice.
    #[must_use]
    pub fn ports_in_use(&self) -> BTreeMap<SubdeviceId, u32> {
        self.registry
            .read()
            .subdevices()
            .map(|sd| (sd.id(), sd.port_routed_query(u32::MAX)))
            .collect()
    }

    pub fn request_resweep(&self) {
        self.resweep.request();
    }

    #[must_use]
    pub fn resweep_requested(&self) -> bool {
        self.resweep.is_requested()
    }

    pub fn resweep_signal(&self) -> &ResweepSignal {
        &self.resweep
    }

    pub fn add_device(&self, desc: &DeviceDesc) -> Result<Arc<Device>, RoutingError> {
        let device = self.registry.add_device(desc)?;
        info!(self.entity ; "device {} added with {} subdevices", device.index, device.subdevices.len());
        self.request_resweep();
        Ok(device)
    }

    pub fn remove_device(&self, index: u16) -> RoutingResult {
        let device = self.registry.remove_device(index)?;
        info!(self.entity ; "device {} removed", device.index);
        self.request_resweep();
        Ok(())
    }

    /// Publish a port manager update for fabric port `lpn` of `id`.
    pub fn update_port<F>(&self, id: SubdeviceId, lpn: u8, update: F) -> RoutingResult
    where
        F: FnOnce(&mut FabricPort),
    {
        let fabric = self.registry.read();
        let Some(sd) = fabric.subdevice(id) else {
            return Err(RoutingError(format!("{id} not registered")));
        };
        sd.update_port(lpn, update)?;
        self.request_resweep();
        Ok(())
    }

    /// Return an ERROR subdevice to service.
    pub fn reset_subdevice(&self, id: SubdeviceId) -> RoutingResult {
        let fabric = self.registry.read();
        let Some(sd) = fabric.subdevice(id) else {
            return Err(RoutingError(format!("{id} not registered")));
        };
        if sd.reset_error() {
            self.request_resweep();
        }
        Ok(())
    }

    /// Wipe the routing state of every subdevice and all planes.
    pub fn destroy(&self) {
        let _serial = self.sweep_lock.lock();
        let mut fabric = self.registry.write();
        for sd in fabric.subdevices() {
            sd.destroy(&fabric.topology.sd_error);
        }
        fabric.topology.clear();
        fabric.topology.reset_sd_error();
        debug!(self.entity ; "routing state destroyed");
    }
}

/// Mark every fabric port of every subdevice with whether it carries routed
/// traffic: only ports of non-error subdevices with a validated link do.
fn update_routed(fabric: &Fabric) {
    for sd in fabric.subdevices() {
        let error = sd.is_error();
        let id = sd.id();
        sd.set_routed(|lpn| {
            !error && fabric.topology.neighbor_of(PortRef { sd: id, lpn }).is_some()
        });
    }
}
