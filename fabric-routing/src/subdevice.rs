// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A routable subdevice and its routing state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fabric_track::entity::Entity;
use fabric_track::{debug, error};
use parking_lot::{Mutex, MutexGuard};

use crate::fid::FidAssignment;
use crate::fidgen::Fidgen;
use crate::port::{FabricPort, fabric_lpns};
use crate::types::{Guid, RoutingError, RoutingResult, RoutingStatus, SubdeviceId};
use crate::uft::Uft;

/// Range of DPA lookup table indices owned by a subdevice.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DpaRange {
    pub base: u32,
    pub range: u32,
}

/// Everything a sweep computes for a subdevice.
///
/// `uft` and `fidgen` mirror what is programmed in the hardware, `uft_next`
/// and `fidgen_next` are staged by the running sweep and only replace them
/// through [`RoutingState::promote`].
#[derive(Debug, Default)]
pub struct RoutingState {
    pub status: RoutingStatus,
    pub plane: Option<usize>,
    pub plane_index: usize,
    pub fids: FidAssignment,
    pub uft: Option<Uft>,
    pub uft_next: Option<Uft>,
    pub fidgen: Option<Fidgen>,
    pub fidgen_next: Option<Fidgen>,

    /// The staged tables have been written to the hardware.
    pub programmed: bool,

    /// The hardware may hold values written from tables that were never
    /// committed.
    pub hw_dirty: bool,

    /// Data blocks possibly present in the hardware but not in `uft`.
    pub stale_blocks: BTreeSet<SubdeviceId>,
}

impl RoutingState {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == RoutingStatus::Error
    }

    /// Make the staged tables the committed ones.
    pub fn promote(&mut self) {
        if let Some(uft) = self.uft_next.take() {
            self.uft = Some(uft);
        }
        if let Some(fidgen) = self.fidgen_next.take() {
            self.fidgen = Some(fidgen);
        }
        self.programmed = false;
        self.hw_dirty = false;
        self.stale_blocks.clear();
    }

    /// Drop the staged tables, leaving the committed ones untouched.
    pub fn discard_next(&mut self) {
        if self.programmed {
            self.hw_dirty = true;
            if let Some(uft_next) = &self.uft_next {
                self.stale_blocks.extend(uft_next.bridges().map(|(dst, _)| dst));
            }
        }
        self.uft_next = None;
        self.fidgen_next = None;
        self.programmed = false;
    }

    fn wipe(&mut self) {
        *self = Self {
            status: self.status,
            ..Default::default()
        };
    }
}

/// One routable node of the fabric.
pub struct Subdevice {
    pub entity: Arc<Entity>,
    id: SubdeviceId,
    guid: Guid,
    dpa: DpaRange,

    /// Fabric port snapshots, published by the port manager.
    ports: Mutex<Vec<FabricPort>>,

    routing: Mutex<RoutingState>,
}

impl Subdevice {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, id: SubdeviceId, guid: Guid, dpa: DpaRange) -> Self {
        let entity = Arc::new(Entity::new(parent, &id.to_string()));
        Self {
            entity,
            id,
            guid,
            dpa,
            ports: Mutex::new(fabric_lpns().map(FabricPort::new).collect()),
            routing: Mutex::new(RoutingState::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubdeviceId {
        self.id
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn device_index(&self) -> u16 {
        self.id.device_index()
    }

    #[must_use]
    pub fn sd_index(&self) -> u8 {
        self.id.sd_index()
    }

    #[must_use]
    pub fn dpa(&self) -> DpaRange {
        self.dpa
    }

    /// Copy of the current port snapshots.
    #[must_use]
    pub fn ports(&self) -> Vec<FabricPort> {
        self.ports.lock().clone()
    }

    #[must_use]
    pub fn port(&self, lpn: u8) -> Option<FabricPort> {
        self.ports.lock().iter().find(|p| p.lpn == lpn).cloned()
    }

    /// Apply a port manager update to the snapshot of fabric port `lpn`.
    pub fn update_port<F>(&self, lpn: u8, update: F) -> RoutingResult
    where
        F: FnOnce(&mut FabricPort),
    {
        let mut ports = self.ports.lock();
        match ports.iter_mut().find(|p| p.lpn == lpn) {
            Some(port) => {
                update(port);
                port.lpn = lpn;
                Ok(())
            }
            None => Err(RoutingError(format!("{}: no fabric port {lpn}", self.id))),
        }
    }

    /// Set the routed flag of every fabric port.
    pub fn set_routed<F>(&self, routed: F)
    where
        F: Fn(u8) -> bool,
    {
        for port in self.ports.lock().iter_mut() {
            port.routed = routed(port.lpn);
        }
    }

    /// Bitmask of the ports of `port_mask` that carry routed traffic.
    #[must_use]
    pub fn port_routed_query(&self, port_mask: u32) -> u32 {
        self.ports
            .lock()
            .iter()
            .filter(|p| p.routed && port_mask & (1 << p.lpn) != 0)
            .fold(0, |usage, p| usage | (1 << p.lpn))
    }

    pub fn routing(&self) -> MutexGuard<'_, RoutingState> {
        self.routing.lock()
    }

    #[must_use]
    pub fn status(&self) -> RoutingStatus {
        self.routing.lock().status
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.routing.lock().is_error()
    }

    /// Move the subdevice to ERROR, dropping it from its plane and wiping its
    /// routing state. `sd_error` is raised so the sweep requests another one.
    pub fn transition_error(&self, sd_error: &AtomicBool) {
        let mut routing = self.routing.lock();
        Self::transition_error_locked(&self.entity, &mut routing, sd_error);
    }

    /// As [`Subdevice::transition_error`] for a caller already holding the
    /// routing state.
    pub fn transition_error_locked(
        entity: &Entity,
        routing: &mut RoutingState,
        sd_error: &AtomicBool,
    ) {
        if !routing.is_error() {
            error!(entity ; "transition to error state");
        }
        routing.status = RoutingStatus::Error;
        routing.wipe();
        sd_error.store(true, Ordering::SeqCst);
    }

    /// Explicitly return an ERROR subdevice to service.
    pub fn reset_error(&self) -> bool {
        let mut routing = self.routing.lock();
        if routing.is_error() {
            debug!(self.entity ; "reset from error state");
            routing.status = RoutingStatus::Valid;
            true
        } else {
            false
        }
    }

    /// Tear down the routing state ahead of removing the subdevice.
    pub fn destroy(&self, sd_error: &AtomicBool) {
        self.transition_error(sd_error);
        self.set_routed(|_| false);
    }
}

impl std::fmt::Debug for Subdevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subdevice")
            .field("id", &self.id)
            .field("guid", &format_args!("{:#018x}", self.guid))
            .finish()
    }
}
