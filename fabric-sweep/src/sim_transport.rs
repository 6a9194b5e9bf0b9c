// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! An in-memory model of the switch registers, standing in for the
//! management mailbox.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use fabric_routing::fidgen::FIDGEN_BLOCK_SIZE;
use fabric_routing::port::{LinkState, PORT_COUNT};
use fabric_routing::transport::{SwitchParameters, Transport, TransportError, TransportResult};
use fabric_routing::types::SubdeviceId;
use fabric_track::entity::Entity;
use fabric_track::{debug, trace};
use parking_lot::Mutex;

/// Register state of one subdevice.
#[derive(Clone, Debug, Default)]
pub struct SimSwitch {
    pub lft_top: Option<u32>,

    /// Forwarding table contents, shared by every port it was written to.
    pub table: BTreeMap<u32, u8>,

    /// Ports that have received at least one table write.
    pub table_ports: u32,

    pub generators: BTreeMap<u8, [u64; FIDGEN_BLOCK_SIZE]>,
    pub maps: BTreeMap<u8, Vec<u64>>,
    pub package_ranges: BTreeMap<u8, u64>,
    pub link_states: BTreeMap<u8, LinkState>,
    pub writes: usize,
}

pub struct SimTransport {
    entity: Arc<Entity>,
    switches: Mutex<HashMap<SubdeviceId, SimSwitch>>,
    failing: Mutex<HashSet<SubdeviceId>>,
}

impl SimTransport {
    #[must_use]
    pub fn new(parent: &Arc<Entity>) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, "transport")),
            switches: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every later access to `sd` fail.
    pub fn fail(&self, sd: SubdeviceId) {
        debug!(self.entity ; "{sd}: writes will fail");
        self.failing.lock().insert(sd);
    }

    pub fn repair(&self, sd: SubdeviceId) {
        self.failing.lock().remove(&sd);
    }

    /// Snapshot of the registers of `sd`, if it was ever written.
    #[must_use]
    pub fn switch(&self, sd: SubdeviceId) -> Option<SimSwitch> {
        self.switches.lock().get(&sd).cloned()
    }

    /// Forwarding table entry for `fid` on `sd`.
    #[must_use]
    pub fn lookup(&self, sd: SubdeviceId, fid: u32) -> Option<u8> {
        self.switches
            .lock()
            .get(&sd)
            .and_then(|switch| switch.table.get(&fid).copied())
    }

    #[must_use]
    pub fn total_writes(&self) -> usize {
        self.switches.lock().values().map(|s| s.writes).sum()
    }

    fn access<T, F>(&self, sd: SubdeviceId, f: F) -> TransportResult<T>
    where
        F: FnOnce(&mut SimSwitch) -> TransportResult<T>,
    {
        if self.failing.lock().contains(&sd) {
            return Err(TransportError(format!("{sd}: mailbox timeout")));
        }
        let mut switches = self.switches.lock();
        let switch = switches.entry(sd).or_default();
        switch.writes += 1;
        f(switch)
    }
}

fn check_lpn(sd: SubdeviceId, lpn: u8) -> TransportResult {
    if lpn >= PORT_COUNT {
        return Err(TransportError(format!("{sd}: no port {lpn}")));
    }
    Ok(())
}

impl Transport for SimTransport {
    fn write_switch_parameters(
        &self,
        sd: SubdeviceId,
        params: SwitchParameters,
    ) -> TransportResult {
        trace!(self.entity ; "{sd}: lft_top {:#x}", params.lft_top);
        self.access(sd, |switch| {
            switch.lft_top = Some(params.lft_top);
            Ok(())
        })
    }

    fn write_table_block(
        &self,
        sd: SubdeviceId,
        port_mask: u32,
        fid_base: u32,
        entries: &[u8],
    ) -> TransportResult {
        trace!(self.entity ; "{sd}: table {fid_base:#x}+{} ports {port_mask:#x}", entries.len());
        if entries.len() > self.max_table_entries() {
            return Err(TransportError(format!(
                "{sd}: {} entries exceed a single write",
                entries.len()
            )));
        }
        self.access(sd, |switch| {
            let Some(lft_top) = switch.lft_top else {
                return Err(TransportError(format!("{sd}: table written before parameters")));
            };
            let last = fid_base + entries.len() as u32;
            if last > lft_top + 1 {
                return Err(TransportError(format!(
                    "{sd}: table write {fid_base:#x}..{last:#x} beyond {lft_top:#x}"
                )));
            }
            for (fid, value) in (fid_base..).zip(entries) {
                switch.table.insert(fid, *value);
            }
            switch.table_ports |= port_mask;
            Ok(())
        })
    }

    fn write_address_generator(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        block: &[u64; FIDGEN_BLOCK_SIZE],
    ) -> TransportResult {
        trace!(self.entity ; "{sd}: generator port {lpn}");
        check_lpn(sd, lpn)?;
        self.access(sd, |switch| {
            switch.generators.insert(lpn, *block);
            Ok(())
        })
    }

    fn write_address_map(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        offset: usize,
        entries: &[u64],
    ) -> TransportResult {
        trace!(self.entity ; "{sd}: address map port {lpn} {offset}+{}", entries.len());
        check_lpn(sd, lpn)?;
        if entries.len() * size_of::<u64>() > self.max_write_bytes() {
            return Err(TransportError(format!("{sd}: address map write too large")));
        }
        self.access(sd, |switch| {
            let map = switch.maps.entry(lpn).or_default();
            if map.len() < offset + entries.len() {
                map.resize(offset + entries.len(), 0);
            }
            map[offset..offset + entries.len()].copy_from_slice(entries);
            Ok(())
        })
    }

    fn write_package_range(&self, sd: SubdeviceId, lpn: u8, csr: u64) -> TransportResult {
        trace!(self.entity ; "{sd}: package range port {lpn} {csr:#x}");
        check_lpn(sd, lpn)?;
        self.access(sd, |switch| {
            switch.package_ranges.insert(lpn, csr);
            Ok(())
        })
    }

    fn set_port_link_state(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        state: LinkState,
    ) -> TransportResult<LinkState> {
        check_lpn(sd, lpn)?;
        self.access(sd, |switch| {
            switch.link_states.insert(lpn, state);
            Ok(state)
        })
    }

    fn pause_traffic(&self) -> TransportResult {
        debug!(self.entity ; "pause traffic");
        Ok(())
    }

    fn resume_traffic(&self) {
        debug!(self.entity ; "resume traffic");
    }
}
