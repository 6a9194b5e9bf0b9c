// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Registry of the devices and subdevices known to the fabric.
//!
//! The registry is the "routable" lock: a single readers/writer lock
//! protecting the set of subdevices and the topology computed from them.
//! Sweeps hold it exclusively while computing and downgrade to shared access
//! while programming the hardware, so status queries and port manager
//! updates are never blocked behind hardware latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fabric_track::entity::Entity;
use fabric_track::{debug, warn};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fid::{MAX_SUBDEVICES, group_is_addressable};
use crate::fidgen::MIN_DPA_PER_SD;
use crate::routing_error;
use crate::subdevice::{DpaRange, Subdevice};
use crate::topology::Topology;
use crate::types::{Guid, RoutingError, SubdeviceId};

/// Description of a device as discovered by the driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceDesc {
    /// Index of the device on the fabric.
    pub index: u16,

    /// Identifier assigned to the device by the fabric manager.
    pub fabric_id: u32,

    /// Base of the package DPA range in GiB.
    pub pkg_offset: u16,

    /// Size of the package DPA range in GiB.
    pub pkg_size: u16,

    /// GUID of each subdevice; the length is the subdevice count.
    pub guids: Vec<Guid>,
}

/// A device: one package holding one or more subdevices.
#[derive(Debug)]
pub struct Device {
    pub index: u16,
    pub fabric_id: u32,
    pub pkg_offset: u16,
    pub pkg_size: u16,
    pub subdevices: Vec<Arc<Subdevice>>,
}

/// Shift from the 1GiB granularity of the package DPA to lookup table
/// indices.
fn dpa_shift() -> u32 {
    MIN_DPA_PER_SD.trailing_zeros() - 30
}

/// Lookup table indices owned by subdevice `sd_index` of a package.
fn dpa_range_for(entity: &Entity, desc: &DeviceDesc, sd_index: u8) -> DpaRange {
    let shift = dpa_shift();
    let sd_size = desc.pkg_size / desc.guids.len() as u16;
    if sd_size & ((1 << shift) - 1) != 0 {
        warn!(entity ; "device {}: package size not a multiple of the minimum DPA block size", desc.index);
    }
    let range = u32::from(sd_size >> shift);
    DpaRange {
        base: u32::from(desc.pkg_offset >> shift) + u32::from(sd_index) * range,
        range,
    }
}

/// The contents of the routable lock.
#[derive(Default)]
pub struct Fabric {
    devices: BTreeMap<u16, Arc<Device>>,
    subdevices: BTreeMap<SubdeviceId, Arc<Subdevice>>,
    by_guid: HashMap<Guid, SubdeviceId>,
    pub topology: Topology,
}

impl Fabric {
    /// Every subdevice, in identifier order.
    pub fn subdevices(&self) -> impl Iterator<Item = &Arc<Subdevice>> {
        self.subdevices.values()
    }

    /// Subdevices not in the ERROR state, in identifier order.
    pub fn routable(&self) -> impl Iterator<Item = &Arc<Subdevice>> {
        self.subdevices.values().filter(|sd| !sd.is_error())
    }

    pub fn subdevice_map(&self) -> &BTreeMap<SubdeviceId, Arc<Subdevice>> {
        &self.subdevices
    }

    /// Split borrow of the subdevices and the topology.
    pub fn parts_mut(&mut self) -> (&BTreeMap<SubdeviceId, Arc<Subdevice>>, &mut Topology) {
        (&self.subdevices, &mut self.topology)
    }

    #[must_use]
    pub fn subdevice(&self, id: SubdeviceId) -> Option<&Arc<Subdevice>> {
        self.subdevices.get(&id)
    }

    #[must_use]
    pub fn find_by_guid(&self, guid: Guid) -> Option<&Arc<Subdevice>> {
        self.by_guid.get(&guid).and_then(|id| self.subdevices.get(id))
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    #[must_use]
    pub fn device(&self, index: u16) -> Option<&Arc<Device>> {
        self.devices.get(&index)
    }

    #[must_use]
    pub fn device_by_fabric_id(&self, fabric_id: u32) -> Option<&Arc<Device>> {
        self.devices.values().find(|dev| dev.fabric_id == fabric_id)
    }

    #[must_use]
    pub fn subdevice_by_fabric_id(&self, fabric_id: u32, sd_index: u8) -> Option<&Arc<Subdevice>> {
        self.device_by_fabric_id(fabric_id)
            .and_then(|dev| dev.subdevices.get(usize::from(sd_index)))
    }
}

pub type FabricReadGuard<'a> = RwLockReadGuard<'a, Fabric>;
pub type FabricWriteGuard<'a> = RwLockWriteGuard<'a, Fabric>;

pub struct Registry {
    entity: Arc<Entity>,
    fabric: RwLock<Fabric>,
}

impl Registry {
    #[must_use]
    pub fn new(entity: &Arc<Entity>) -> Self {
        Self {
            entity: entity.clone(),
            fabric: RwLock::new(Fabric::default()),
        }
    }

    /// Shared access.
    pub fn read(&self) -> FabricReadGuard<'_> {
        self.fabric.read()
    }

    /// Exclusive access, which may later be downgraded to shared access.
    pub fn write(&self) -> FabricWriteGuard<'_> {
        self.fabric.write()
    }

    /// Register a device and its subdevices.
    pub fn add_device(&self, desc: &DeviceDesc) -> Result<Arc<Device>, RoutingError> {
        if desc.guids.is_empty() || desc.guids.len() > MAX_SUBDEVICES {
            return routing_error!(format!(
                "device {}: {} subdevices not supported",
                desc.index,
                desc.guids.len()
            ));
        }

        let mut fabric = self.fabric.write();
        if fabric.devices.contains_key(&desc.index) {
            return routing_error!(format!("device {} already registered", desc.index));
        }
        if fabric.device_by_fabric_id(desc.fabric_id).is_some() {
            return routing_error!(format!("fabric id {:#x} already registered", desc.fabric_id));
        }

        let mut subdevices = Vec::with_capacity(desc.guids.len());
        for (sd_index, guid) in desc.guids.iter().enumerate() {
            let id = SubdeviceId::new(desc.index, sd_index as u8);
            if !group_is_addressable(id) {
                return routing_error!(format!("device {}: index out of address range", desc.index));
            }
            if *guid == 0
                || fabric.by_guid.contains_key(guid)
                || desc.guids[..sd_index].contains(guid)
            {
                return routing_error!(format!("{id}: invalid or duplicate guid {guid:#018x}"));
            }
            let dpa = dpa_range_for(&self.entity, desc, sd_index as u8);
            subdevices.push(Arc::new(Subdevice::new(&self.entity, id, *guid, dpa)));
        }

        for sd in &subdevices {
            debug!(sd.entity ; "dpa base {:#06x} range {:#06x}", sd.dpa().base, sd.dpa().range);
            fabric.by_guid.insert(sd.guid(), sd.id());
            fabric.subdevices.insert(sd.id(), sd.clone());
        }

        let device = Arc::new(Device {
            index: desc.index,
            fabric_id: desc.fabric_id,
            pkg_offset: desc.pkg_offset,
            pkg_size: desc.pkg_size,
            subdevices,
        });
        fabric.devices.insert(desc.index, device.clone());
        Ok(device)
    }

    /// Unregister a device, forcing its subdevices to ERROR first.
    pub fn remove_device(&self, index: u16) -> Result<Arc<Device>, RoutingError> {
        let mut fabric = self.fabric.write();
        let Some(device) = fabric.devices.remove(&index) else {
            return Err(RoutingError(format!("device {index} not registered")));
        };
        for sd in &device.subdevices {
            sd.destroy(&fabric.topology.sd_error);
            fabric.by_guid.remove(&sd.guid());
            fabric.subdevices.remove(&sd.id());
        }
        Ok(device)
    }
}
