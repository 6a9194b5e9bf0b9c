// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The logic phase of a sweep.
//!
//! Runs with exclusive access to the registry and leaves the staged forwarding
//! table and address generator of every routable subdevice ready to be
//! programmed.

use std::collections::BTreeMap;
use std::sync::Arc;

use fabric_track::entity::Entity;
use fabric_track::{debug, trace};

use crate::fid::{self, FID_BLOCK_SIZE, FidAssignment, fid_to_bridge_offset, is_host_fid};
use crate::fidgen::{DPA_DFID_MAP_SIZE, Fidgen};
use crate::port::{CPORT, PORT_BRIDGE_START};
use crate::registry::Fabric;
use crate::routing_error;
use crate::subdevice::{DpaRange, Subdevice};
use crate::topology::Topology;
use crate::types::{RoutingError, RoutingResult, SubdeviceId};
use crate::uft::{UFT_INVALID_PORT4, Uft, entry_set};

/// Routing view of one subdevice, captured once the planes are settled.
#[derive(Copy, Clone, Debug)]
pub struct Node {
    pub id: SubdeviceId,
    pub error: bool,
    pub plane: Option<usize>,
    pub plane_index: usize,
    pub fids: FidAssignment,
    pub dpa: DpaRange,
}

impl Node {
    #[must_use]
    pub fn of(sd: &Subdevice) -> Self {
        let routing = sd.routing();
        Self {
            id: sd.id(),
            error: routing.is_error(),
            plane: routing.plane,
            plane_index: routing.plane_index,
            fids: routing.fids,
            dpa: sd.dpa(),
        }
    }

    fn membership(&self) -> (Option<usize>, usize) {
        (self.plane, self.plane_index)
    }
}

fn snapshot(subdevices: &BTreeMap<SubdeviceId, Arc<Subdevice>>) -> Vec<Node> {
    subdevices.values().map(|sd| Node::of(sd)).collect()
}

#[must_use]
pub fn cost(topology: &Topology, src: &Node, dst: &Node) -> u16 {
    topology.cost_lookup(src.membership(), dst.membership())
}

/// Assign the management address and data block of every subdevice.
pub fn assign_addresses(entity: &Entity, subdevices: &BTreeMap<SubdeviceId, Arc<Subdevice>>) {
    for sd in subdevices.values() {
        let fids = fid::assign(sd.id());
        sd.routing().fids = fids;
        trace!(sd.entity ; "fid_mgmt {:#06x} fid_base {:#06x}", fids.fid_mgmt, fids.fid_base);
    }
    debug!(entity ; "assigned addresses to {} subdevices", subdevices.len());
}

/// Route the addresses of `dst` over `ports`.
///
/// The management address always uses the first port. Valid data addresses
/// are spread round-robin over all the ports; host-flagged addresses are
/// invalidated.
pub fn route_pair_via(
    uft: &mut Uft,
    dst: SubdeviceId,
    dst_fids: &FidAssignment,
    ports: &[u8],
) -> RoutingResult {
    let Some(first) = ports.first() else {
        return routing_error!(format!("no ports to route {dst}"));
    };
    entry_set(
        uft.mgmt_mut(),
        (dst_fids.fid_mgmt - fid::FID_CPORT_BASE) as usize,
        *first,
    );

    let block = uft.bridge_mut(dst)?;
    let mut valid = ports.iter().cycle();
    for offset in 0..FID_BLOCK_SIZE {
        if is_host_fid(offset as u32) {
            entry_set(block, offset, UFT_INVALID_PORT4);
        } else if let Some(port) = valid.next() {
            entry_set(block, offset, *port);
        }
    }
    Ok(())
}

/// Route `dst` from `src` over every port with a link to `dst`. Nothing is
/// routed if there is no direct link.
pub fn route_pair(uft: &mut Uft, topology: &Topology, src: &Node, dst: &Node) -> RoutingResult {
    let ports = topology.ports_towards(src.id, dst.id);
    if ports.is_empty() {
        return Ok(());
    }
    route_pair_via(uft, dst.id, &dst.fids, &ports)
}

/// Route the addresses of `src` itself: management to the CPORT and data
/// addresses to the bridge endpoint their address selects.
pub fn route_local(uft: &mut Uft, src: SubdeviceId, fids: &FidAssignment) -> RoutingResult {
    entry_set(
        uft.mgmt_mut(),
        (fids.fid_mgmt - fid::FID_CPORT_BASE) as usize,
        CPORT,
    );

    let block = uft.bridge_mut(src)?;
    for offset in 0..FID_BLOCK_SIZE {
        let fid = fids.fid_base + offset as u32;
        let port = if is_host_fid(fid) {
            UFT_INVALID_PORT4
        } else {
            PORT_BRIDGE_START + fid_to_bridge_offset(fid)
        };
        entry_set(block, offset, port);
    }
    Ok(())
}

/// Build the forwarding table of `src`: every one-hop destination then the
/// local addresses. Destinations further away are left unrouted.
pub fn route_from(topology: &Topology, nodes: &[Node], src: &Node) -> Result<Uft, RoutingError> {
    let mut uft = Uft::try_new()?;
    for dst in nodes.iter().filter(|dst| !dst.error) {
        if cost(topology, src, dst) != 1 {
            continue;
        }
        route_pair(&mut uft, topology, src, dst)?;
    }
    route_local(&mut uft, src.id, &src.fids)?;
    Ok(uft)
}

/// Build the DPA lookup table of `src`.
///
/// Subdevices of the same package map to block 0, one-hop destinations to
/// their own block, and anything else through the first non-error sibling of
/// the destination that is one hop from `src`. A destination with no such
/// sibling stays unmapped.
pub fn map_addresses(
    topology: &Topology,
    nodes: &[Node],
    src: &Node,
) -> Result<Fidgen, RoutingError> {
    let mut fidgen = Fidgen::try_new(topology.map_size())?;

    for dst in nodes.iter().filter(|dst| !dst.error) {
        let dfid = if dst.id.device_index() == src.id.device_index() {
            Some(0)
        } else if cost(topology, src, dst) == 1 {
            Some(dst.fids.fid_base)
        } else {
            nodes
                .iter()
                .filter(|sibling| {
                    sibling.id.device_index() == dst.id.device_index()
                        && sibling.id != dst.id
                        && !sibling.error
                })
                .find(|sibling| cost(topology, src, sibling) == 1)
                .map(|sibling| sibling.fids.fid_base)
        };

        if let Some(dfid) = dfid {
            fidgen.set_dpa_lut(dst.dpa.base, dst.dpa.range, dfid)?;
        }
    }
    Ok(fidgen)
}

fn unicast_routing(topology: &Topology, subdevices: &BTreeMap<SubdeviceId, Arc<Subdevice>>) {
    let nodes = snapshot(subdevices);
    for src in nodes.iter().filter(|src| !src.error) {
        let Some(sd) = subdevices.get(&src.id) else {
            continue;
        };
        match route_from(topology, &nodes, src) {
            Ok(uft) => {
                debug!(sd.entity ; "{} destination blocks routed", uft.bridges().count());
                sd.routing().uft_next = Some(uft);
            }
            Err(e) => {
                debug!(sd.entity ; "unable to build forwarding table: {e}");
                sd.transition_error(&topology.sd_error);
            }
        }
    }
}

fn map_all_addresses(topology: &Topology, subdevices: &BTreeMap<SubdeviceId, Arc<Subdevice>>) {
    let nodes = snapshot(subdevices);
    for src in nodes.iter().filter(|src| !src.error) {
        let Some(sd) = subdevices.get(&src.id) else {
            continue;
        };
        match map_addresses(topology, &nodes, src) {
            Ok(fidgen) => sd.routing().fidgen_next = Some(fidgen),
            Err(e) => {
                debug!(sd.entity ; "unable to build address map: {e}");
                sd.transition_error(&topology.sd_error);
            }
        }
    }
}

/// Run the whole logic phase.
///
/// Failures attributable to a single subdevice move it to ERROR and the
/// phase carries on; only fabric-wide failures are returned.
pub fn run(fabric: &mut Fabric, entity: &Entity) -> RoutingResult {
    let (subdevices, topology) = fabric.parts_mut();

    debug!(entity ; "initialize sweep");
    topology.reset(subdevices);
    if topology.map_size() > DPA_DFID_MAP_SIZE {
        return routing_error!(format!(
            "DPA index {} exceeds the address map",
            topology.max_dpa_index
        ));
    }

    debug!(entity ; "process neighbors");
    topology.discover_neighbors(entity, subdevices);

    debug!(entity ; "build planes");
    topology.build_planes(entity, subdevices);

    debug!(entity ; "assign fids");
    assign_addresses(entity, subdevices);

    debug!(entity ; "compute costs");
    topology.compute_costs(entity, subdevices);

    debug!(entity ; "unicast routing");
    unicast_routing(topology, subdevices);

    debug!(entity ; "map addresses");
    map_all_addresses(topology, subdevices);

    Ok(())
}

#[cfg(test)]
mod tests {
    use fabric_track::entity::toplevel;
    use fabric_track::tracker::dev_null_tracker;

    use super::*;
    use crate::fid::VALID_FIDS_PER_BLOCK;
    use crate::mock::guid_of;
    use crate::uft::entry_get;

    #[test]
    fn load_balance() {
        let dst = SubdeviceId::new(4, 1);
        let fids = fid::assign(dst);

        for num_ports in 1..=8u8 {
            let ports: Vec<u8> = (1..=num_ports).collect();
            let mut uft = Uft::try_new().unwrap();
            route_pair_via(&mut uft, dst, &fids, &ports).unwrap();

            let block = uft.bridge(dst).unwrap();
            let mut per_port = vec![0usize; usize::from(num_ports) + 1];
            for offset in 0..FID_BLOCK_SIZE {
                let port = entry_get(block, offset);
                if is_host_fid(offset as u32) {
                    assert_eq!(port, UFT_INVALID_PORT4);
                } else {
                    assert!(ports.contains(&port));
                    per_port[usize::from(port)] += 1;
                }
            }

            let used = &per_port[1..];
            assert_eq!(used.iter().sum::<usize>(), VALID_FIDS_PER_BLOCK);
            let max = used.iter().max().unwrap();
            let min = used.iter().min().unwrap();
            assert!(max - min <= 1);

            assert_eq!(uft.lookup(fids.fid_mgmt), Some(1));
        }
    }

    #[test]
    fn route_pair_via_needs_a_port() {
        let dst = SubdeviceId::new(1, 0);
        let mut uft = Uft::try_new().unwrap();
        assert!(route_pair_via(&mut uft, dst, &fid::assign(dst), &[]).is_err());
    }

    #[test]
    fn local_routes() {
        let src = SubdeviceId::new(2, 0);
        let fids = fid::assign(src);
        let mut uft = Uft::try_new().unwrap();
        route_local(&mut uft, src, &fids).unwrap();

        assert_eq!(uft.lookup(fids.fid_mgmt), Some(CPORT));
        assert_eq!(uft.lookup(fids.fid_base), Some(PORT_BRIDGE_START));
        assert_eq!(uft.lookup(fids.fid_base + 1), None);
        assert_eq!(uft.lookup(fids.fid_base + 2), Some(PORT_BRIDGE_START + 1));
        assert_eq!(uft.lookup(fids.fid_base + 4), Some(PORT_BRIDGE_START + 2));
        assert_eq!(uft.lookup(fids.fid_base + 14), Some(PORT_BRIDGE_START + 3));
        assert_eq!(uft.lookup(fids.fid_base + 16), Some(PORT_BRIDGE_START));
        assert_eq!(uft.bridges().count(), 1);
    }

    #[test]
    fn address_assignment_is_deterministic() {
        let ids = [SubdeviceId::new(0, 0), SubdeviceId::new(7, 1), SubdeviceId::new(3, 0)];
        let first: Vec<_> = ids.iter().map(|id| fid::assign(*id)).collect();
        let second: Vec<_> = ids.iter().rev().map(|id| fid::assign(*id)).collect();
        assert_eq!(first, second.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn unmappable_source_moves_to_error() {
        let top = toplevel(&dev_null_tracker(), "fabric");
        let subdevices: BTreeMap<SubdeviceId, Arc<Subdevice>> = [(0, 0), (1, 100)]
            .into_iter()
            .map(|(device, base)| {
                let id = SubdeviceId::new(device, 0);
                let dpa = DpaRange { base, range: 4 };
                (id, Arc::new(Subdevice::new(&top, id, guid_of(id), dpa)))
            })
            .collect();
        assign_addresses(&top, &subdevices);

        // Device 1 owns indices beyond the map
        let mut topology = Topology::default();
        topology.max_dpa_index = 7;
        let nodes = snapshot(&subdevices);
        assert!(map_addresses(&topology, &nodes, &nodes[0]).is_ok());
        assert!(map_addresses(&topology, &nodes, &nodes[1]).is_err());

        map_all_addresses(&topology, &subdevices);
        let good = subdevices[&SubdeviceId::new(0, 0)].routing();
        assert!(!good.is_error());
        assert_eq!(good.fidgen_next.as_ref().map(|f| f.map().len()), Some(8));
        let bad = subdevices[&SubdeviceId::new(1, 0)].routing();
        assert!(bad.is_error());
        assert!(bad.fidgen_next.is_none());
        assert!(topology.sd_error_signaled());
    }
}
