// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Fabric topology: neighbor discovery, planes and costs.
//!
//! Neighbor relations are recomputed at the start of every sweep into a
//! table keyed by port, and planes are rebuilt from scratch rather than
//! patched, so nothing here outlives the exclusive phase of a sweep except
//! as read-only input to the programming phase.

pub mod plane;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fabric_track::entity::Entity;
use fabric_track::{debug, error, trace};
use itertools::Itertools;

pub use self::plane::{Plane, ROUTING_COST_INFINITE};
use crate::port::{FabricPort, fabric_lpns};
use crate::subdevice::Subdevice;
use crate::types::{Guid, PortRef, SubdeviceId};

type Subdevices = BTreeMap<SubdeviceId, Arc<Subdevice>>;

/// Fabric-wide state computed by a sweep.
#[derive(Debug, Default)]
pub struct Topology {
    planes: BTreeMap<usize, Plane>,

    /// Validated one-hop links, present in both directions.
    neighbors: BTreeMap<PortRef, PortRef>,

    /// Highest DPA lookup table index used by any subdevice.
    pub max_dpa_index: u32,

    /// Raised whenever a subdevice transitions to ERROR.
    pub sd_error: AtomicBool,
}

impl Topology {
    /// Start a sweep: clear the error signal and size the address map.
    pub fn reset(&mut self, subdevices: &Subdevices) {
        self.reset_sd_error();
        self.max_dpa_index = subdevices
            .values()
            .filter(|sd| !sd.is_error())
            .map(|sd| {
                let dpa = sd.dpa();
                (dpa.base + dpa.range).saturating_sub(1)
            })
            .max()
            .unwrap_or(0);
    }

    pub fn reset_sd_error(&self) {
        self.sd_error.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sd_error_signaled(&self) -> bool {
        self.sd_error.load(Ordering::SeqCst)
    }

    /// Number of entries in every address map of this sweep.
    #[must_use]
    pub fn map_size(&self) -> usize {
        self.max_dpa_index as usize + 1
    }

    /// The port at the other end of a validated link.
    #[must_use]
    pub fn neighbor_of(&self, port: PortRef) -> Option<PortRef> {
        self.neighbors.get(&port).copied()
    }

    pub fn neighbors(&self) -> impl Iterator<Item = (&PortRef, &PortRef)> {
        self.neighbors.iter()
    }

    /// Fabric ports of `sd` whose neighbor is on `dst`, in port order.
    #[must_use]
    pub fn ports_towards(&self, sd: SubdeviceId, dst: SubdeviceId) -> Vec<u8> {
        fabric_lpns()
            .filter(|lpn| {
                self.neighbor_of(PortRef { sd, lpn: *lpn })
                    .is_some_and(|n| n.sd == dst)
            })
            .collect()
    }

    /// Recompute the neighbor table from the port snapshots of all routable
    /// subdevices.
    pub fn discover_neighbors(&mut self, entity: &Entity, subdevices: &Subdevices) {
        let snapshots: BTreeMap<SubdeviceId, (Guid, Vec<FabricPort>)> = subdevices
            .values()
            .filter(|sd| !sd.is_error())
            .map(|sd| (sd.id(), (sd.guid(), sd.ports())))
            .collect();
        self.neighbors = discover(&snapshots);
        debug!(entity ; "{} fabric links", self.neighbors.len() / 2);
    }

    /// Partition the routable subdevices into planes by breadth-first
    /// traversal of the neighbor table.
    ///
    /// A subdevice whose plane cannot be allocated is moved to ERROR and the
    /// partitioning carries on with the next one.
    pub fn build_planes(&mut self, entity: &Entity, subdevices: &Subdevices) {
        self.planes.clear();
        for sd in subdevices.values() {
            let mut routing = sd.routing();
            routing.plane = None;
            routing.plane_index = 0;
        }

        let mut next_index = 0;
        for root in subdevices.values() {
            {
                let routing = root.routing();
                if routing.is_error() || routing.plane.is_some() {
                    continue;
                }
            }

            let mut plane = match Plane::try_new(next_index, subdevices.len()) {
                Ok(plane) => plane,
                Err(e) => {
                    error!(entity ; "failed to initialize plane: {e}");
                    root.transition_error(&self.sd_error);
                    continue;
                }
            };
            next_index += 1;
            self.propagate_plane(&mut plane, root, subdevices);
            debug!(entity ; "plane {}: {} subdevices [{}]",
                plane.index,
                plane.num_subdevs(),
                plane.members().iter().join(", "));
            self.planes.insert(plane.index, plane);
        }
    }

    fn propagate_plane(&self, plane: &mut Plane, root: &Arc<Subdevice>, subdevices: &Subdevices) {
        let mut queue = VecDeque::new();
        root.routing().plane = Some(plane.index);
        queue.push_back(root.clone());

        while let Some(sd) = queue.pop_front() {
            let plane_index = plane.push(sd.id());
            sd.routing().plane_index = plane_index;
            trace!(sd.entity ; "plane {} index {}", plane.index, plane_index);

            for lpn in fabric_lpns() {
                let Some(neighbor) = self.neighbor_of(PortRef { sd: sd.id(), lpn }) else {
                    continue;
                };
                let Some(next) = subdevices.get(&neighbor.sd) else {
                    continue;
                };
                let mut routing = next.routing();
                if routing.is_error() || routing.plane.is_some() {
                    continue;
                }
                routing.plane = Some(plane.index);
                drop(routing);
                queue.push_back(next.clone());
            }
        }
    }

    /// Compute the cost matrix of every plane.
    ///
    /// If a matrix cannot be allocated every member of the plane is moved to
    /// ERROR and the plane is destroyed.
    pub fn compute_costs(&mut self, entity: &Entity, subdevices: &Subdevices) {
        let mut failed = Vec::new();

        for plane in self.planes.values_mut() {
            let index_of: HashMap<SubdeviceId, usize> = plane
                .members()
                .iter()
                .enumerate()
                .map(|(i, id)| (*id, i))
                .collect();

            let edges: Vec<(usize, usize)> = self
                .neighbors
                .iter()
                .filter_map(|(from, to)| Some((*index_of.get(&from.sd)?, *index_of.get(&to.sd)?)))
                .collect();

            if let Err(e) = plane.compute_cost(edges) {
                error!(entity ; "failed to compute cost matrix for plane {}: {e}", plane.index);
                failed.push(plane.index);
            }
        }

        for index in failed {
            self.plane_fail(index, subdevices);
        }
    }

    /// Move every member of a plane to ERROR, then destroy the plane.
    fn plane_fail(&mut self, index: usize, subdevices: &Subdevices) {
        let Some(plane) = self.planes.remove(&index) else {
            return;
        };
        for id in plane.members() {
            if let Some(sd) = subdevices.get(id) {
                sd.transition_error(&self.sd_error);
            }
        }
    }

    #[must_use]
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(&index)
    }

    pub fn planes(&self) -> impl Iterator<Item = &Plane> {
        self.planes.values()
    }

    #[must_use]
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Cost between two subdevices given their plane memberships.
    ///
    /// [`ROUTING_COST_INFINITE`] if they do not share a plane.
    #[must_use]
    pub fn cost_lookup(
        &self,
        src: (Option<usize>, usize),
        dst: (Option<usize>, usize),
    ) -> u16 {
        match (src.0, dst.0) {
            (Some(a), Some(b)) if a == b => self
                .planes
                .get(&a)
                .map_or(ROUTING_COST_INFINITE, |plane| plane.cost(src.1, dst.1)),
            _ => ROUTING_COST_INFINITE,
        }
    }

    /// Drop all planes and links.
    pub fn clear(&mut self) {
        self.planes.clear();
        self.neighbors.clear();
        self.max_dpa_index = 0;
    }
}

/// Compute the validated links between fabric ports.
///
/// A link from port `p` of `A` to port `q` of `B` is kept only if both ports
/// are routable with a neighbor report, `A` reports `B`'s GUID (non-zero and
/// not its own) at port `q`, and `B` reports `A`'s GUID at port `p`.
#[must_use]
pub fn discover(
    snapshots: &BTreeMap<SubdeviceId, (Guid, Vec<FabricPort>)>,
) -> BTreeMap<PortRef, PortRef> {
    let by_guid: HashMap<Guid, SubdeviceId> = snapshots
        .iter()
        .map(|(id, (guid, _))| (*guid, *id))
        .collect();

    let find_port = |id: SubdeviceId, lpn: u8| {
        snapshots
            .get(&id)
            .and_then(|(_, ports)| ports.iter().find(|p| p.lpn == lpn))
    };

    let mut neighbors = BTreeMap::new();
    for (src_id, (src_guid, ports)) in snapshots {
        for port_src in ports {
            if !port_src.is_routable() {
                continue;
            }
            let Some(info) = port_src.info else {
                continue;
            };
            if info.neighbor_guid == 0 || info.neighbor_guid == *src_guid {
                continue;
            }
            let Some(dst_id) = by_guid.get(&info.neighbor_guid) else {
                continue;
            };
            let Some(port_dst) = find_port(*dst_id, info.neighbor_port_number) else {
                continue;
            };
            if !port_dst.is_routable() {
                continue;
            }
            let Some(dst_info) = port_dst.info else {
                continue;
            };
            if dst_info.neighbor_guid != *src_guid || dst_info.neighbor_port_number != port_src.lpn
            {
                continue;
            }

            neighbors.insert(
                PortRef {
                    sd: *src_id,
                    lpn: port_src.lpn,
                },
                PortRef {
                    sd: *dst_id,
                    lpn: port_dst.lpn,
                },
            );
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use fabric_track::entity::toplevel;
    use fabric_track::tracker::dev_null_tracker;

    use super::*;
    use crate::mock::guid_of;
    use crate::port::{PortInfo, PortState};
    use crate::subdevice::DpaRange;

    fn id(device: u16) -> SubdeviceId {
        SubdeviceId::new(device, 0)
    }

    /// Single-subdevice devices, link `i` joining port `i + 1` of both ends.
    fn subdevices(top: &Arc<Entity>, devices: u16, links: &[(u16, u16)]) -> Subdevices {
        let subdevices: Subdevices = (0..devices)
            .map(|d| {
                let sd = Subdevice::new(top, id(d), guid_of(id(d)), DpaRange::default());
                (id(d), Arc::new(sd))
            })
            .collect();
        for (i, (a, b)) in links.iter().enumerate() {
            let lpn = i as u8 + 1;
            for (near, far) in [(*a, *b), (*b, *a)] {
                subdevices[&id(near)]
                    .update_port(lpn, |port| {
                        port.state = PortState::Active;
                        port.routable = true;
                        port.info = Some(PortInfo {
                            neighbor_guid: guid_of(id(far)),
                            neighbor_port_number: lpn,
                        });
                    })
                    .unwrap();
            }
        }
        subdevices
    }

    fn partition(topology: &mut Topology, top: &Entity, subdevices: &Subdevices) {
        topology.reset(subdevices);
        topology.discover_neighbors(top, subdevices);
        topology.build_planes(top, subdevices);
        topology.compute_costs(top, subdevices);
    }

    #[test]
    fn failed_plane_moves_members_to_error() {
        let top = toplevel(&dev_null_tracker(), "fabric");
        let subdevices = subdevices(&top, 5, &[(0, 1), (1, 2), (3, 4)]);
        let mut topology = Topology::default();
        partition(&mut topology, &top, &subdevices);
        assert_eq!(topology.num_planes(), 2);
        assert!(!topology.sd_error_signaled());

        let failed = subdevices[&id(3)].routing().plane.unwrap();
        assert_eq!(subdevices[&id(4)].routing().plane, Some(failed));
        topology.plane_fail(failed, &subdevices);

        assert_eq!(topology.num_planes(), 1);
        assert!(topology.plane(failed).is_none());
        assert!(topology.sd_error_signaled());
        for device in 0..5 {
            let routing = subdevices[&id(device)].routing();
            if device >= 3 {
                assert!(routing.is_error());
                assert_eq!(routing.plane, None);
            } else {
                assert!(!routing.is_error());
                assert!(routing.plane.is_some());
            }
        }

        // The members stay out of the next partitioning
        partition(&mut topology, &top, &subdevices);
        assert_eq!(topology.num_planes(), 1);
        assert_eq!(subdevices[&id(4)].routing().plane, None);
        assert_eq!(topology.cost_lookup((Some(0), 0), (Some(0), 2)), 2);
    }

    #[test]
    fn failing_an_unknown_plane_does_nothing() {
        let top = toplevel(&dev_null_tracker(), "fabric");
        let subdevices = subdevices(&top, 2, &[(0, 1)]);
        let mut topology = Topology::default();
        partition(&mut topology, &top, &subdevices);

        topology.plane_fail(7, &subdevices);
        assert_eq!(topology.num_planes(), 1);
        assert!(!topology.sd_error_signaled());
    }
}
