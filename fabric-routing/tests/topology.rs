// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use fabric_routing::engine::RoutingEngine;
use fabric_routing::fid;
use fabric_routing::logic::{Node, cost};
use fabric_routing::mock::{
    add_devices, build_all_to_all, build_path, build_ring, guid_of, link, port,
};
use fabric_routing::port::{CPORT, LinkState, PortInfo, PortState};
use fabric_routing::test_helpers::RecordingTransport;
use fabric_routing::topology::ROUTING_COST_INFINITE;
use fabric_routing::types::SubdeviceId;
use fabric_track::entity::toplevel;
use fabric_track::tracker::dev_null_tracker;

fn engine() -> RoutingEngine {
    let top = toplevel(&dev_null_tracker(), "fabric");
    RoutingEngine::new(&top, Arc::new(RecordingTransport::default()))
}

fn node(engine: &RoutingEngine, device: u16, sd: u8) -> Node {
    Node::of(engine.fabric().subdevice(SubdeviceId::new(device, sd)).unwrap())
}

fn sd_cost(engine: &RoutingEngine, a: (u16, u8), b: (u16, u8)) -> u16 {
    let src = node(engine, a.0, a.1);
    let dst = node(engine, b.0, b.1);
    cost(&engine.fabric().topology, &src, &dst)
}

#[test]
fn neighbors_are_symmetric() {
    let engine = engine();
    build_all_to_all(&engine, 5, 2).unwrap();
    engine.sweep().unwrap();

    let fabric = engine.fabric();
    let neighbors: Vec<_> = fabric.topology.neighbors().map(|(a, b)| (*a, *b)).collect();
    assert_eq!(neighbors.len(), 5 * 4 * 2);
    for (a, b) in neighbors {
        assert_eq!(fabric.topology.neighbor_of(b), Some(a));
        assert_eq!(a.sd.sd_index(), b.sd.sd_index());
    }
}

#[test]
fn one_sided_reports_are_ignored() {
    let engine = engine();
    add_devices(&engine, 2, 1).unwrap();

    engine
        .update_port(SubdeviceId::new(0, 0), 1, |p| {
            p.state = PortState::Active;
            p.link_state = LinkState::Active;
            p.routable = true;
            p.info = Some(PortInfo {
                neighbor_guid: guid_of(SubdeviceId::new(1, 0)),
                neighbor_port_number: 2,
            });
        })
        .unwrap();
    // The far end reports a different port
    engine
        .update_port(SubdeviceId::new(1, 0), 2, |p| {
            p.state = PortState::Active;
            p.link_state = LinkState::Active;
            p.routable = true;
            p.info = Some(PortInfo {
                neighbor_guid: guid_of(SubdeviceId::new(0, 0)),
                neighbor_port_number: 3,
            });
        })
        .unwrap();

    let status = engine.sweep().unwrap();
    assert_eq!(status.planes, 2);
    assert_eq!(engine.fabric().topology.neighbors().count(), 0);
    assert_eq!(sd_cost(&engine, (0, 0), (1, 0)), ROUTING_COST_INFINITE);
}

#[test]
fn links_need_routable_ports() {
    let engine = engine();
    add_devices(&engine, 2, 1).unwrap();
    link(&engine, port(0, 0, 1), port(1, 0, 1)).unwrap();
    engine
        .update_port(SubdeviceId::new(1, 0), 1, |p| p.routable = false)
        .unwrap();

    engine.sweep().unwrap();
    assert_eq!(engine.fabric().topology.num_planes(), 2);
}

#[test]
fn path_costs() {
    let engine = engine();
    let k = 6;
    build_path(&engine, k + 1).unwrap();
    let status = engine.sweep().unwrap();
    assert_eq!(status.planes, 1);

    for i in 0..=k {
        for j in 0..=k {
            assert_eq!(sd_cost(&engine, (i, 0), (j, 0)), i.abs_diff(j));
        }
    }
}

#[test]
fn planes_partition_the_fabric() {
    let engine = engine();
    build_all_to_all(&engine, 4, 2).unwrap();
    engine.sweep().unwrap();

    let fabric = engine.fabric();
    assert_eq!(fabric.topology.num_planes(), 2);
    for plane in fabric.topology.planes() {
        assert_eq!(plane.num_subdevs(), 4);
        let sd_index = plane.members()[0].sd_index();
        assert!(plane.members().iter().all(|id| id.sd_index() == sd_index));
    }
    drop(fabric);

    assert_eq!(sd_cost(&engine, (0, 0), (3, 0)), 1);
    assert_eq!(sd_cost(&engine, (0, 0), (0, 1)), ROUTING_COST_INFINITE);
    assert_eq!(sd_cost(&engine, (1, 1), (2, 0)), ROUTING_COST_INFINITE);
}

#[test]
fn triangle() {
    let engine = engine();
    build_ring(&engine, 3).unwrap();
    let status = engine.sweep().unwrap();
    assert_eq!(status.planes, 1);

    for a in 0..3 {
        for b in 0..3 {
            let expected = u16::from(a != b);
            assert_eq!(sd_cost(&engine, (a, 0), (b, 0)), expected);
        }
    }

    // Port 1 leads to the next device and port 2 to the previous one
    let fabric = engine.fabric();
    for a in 0..3u16 {
        let sd = fabric.subdevice(SubdeviceId::new(a, 0)).unwrap();
        let routing = sd.routing();
        let uft = routing.uft.as_ref().unwrap();
        let next = fid::assign(SubdeviceId::new((a + 1) % 3, 0));
        let prev = fid::assign(SubdeviceId::new((a + 2) % 3, 0));

        assert_eq!(uft.lookup(next.fid_mgmt), Some(1));
        assert_eq!(uft.lookup(prev.fid_mgmt), Some(2));
        assert_eq!(uft.lookup(next.fid_base), Some(1));
        assert_eq!(uft.lookup(prev.fid_base + 62), Some(2));
        assert_eq!(uft.lookup(next.fid_base + 1), None);
        assert_eq!(uft.bridges().count(), 3);
    }
}

#[test]
fn isolated_device() {
    let engine = engine();
    add_devices(&engine, 1, 1).unwrap();
    let status = engine.sweep().unwrap();
    assert_eq!(status.planes, 1);
    assert_eq!(status.ports_used, 0);

    let fabric = engine.fabric();
    let id = SubdeviceId::new(0, 0);
    let routing = fabric.subdevice(id).unwrap().routing();
    let uft = routing.uft.as_ref().unwrap();
    let own = fid::assign(id);

    assert_eq!(uft.lookup(own.fid_mgmt), Some(CPORT));
    assert_eq!(uft.bridges().map(|(dst, _)| dst).collect::<Vec<_>>(), vec![id]);
    let routed_mgmt = (0..fid::MAX_DEVICES as u32)
        .filter(|group| uft.lookup(fid::fid_cport(*group)).is_some())
        .count();
    assert_eq!(routed_mgmt, 1);
}

#[test]
fn parallel_links_share_traffic() {
    let engine = engine();
    add_devices(&engine, 2, 1).unwrap();
    link(&engine, port(0, 0, 1), port(1, 0, 1)).unwrap();
    link(&engine, port(0, 0, 2), port(1, 0, 2)).unwrap();
    engine.sweep().unwrap();

    let fabric = engine.fabric();
    let routing = fabric.subdevice(SubdeviceId::new(0, 0)).unwrap().routing();
    let uft = routing.uft.as_ref().unwrap();
    let dst = fid::assign(SubdeviceId::new(1, 0));

    assert_eq!(uft.lookup(dst.fid_mgmt), Some(1));
    assert_eq!(uft.lookup(dst.fid_base), Some(1));
    assert_eq!(uft.lookup(dst.fid_base + 2), Some(2));
    assert_eq!(uft.lookup(dst.fid_base + 4), Some(1));
    assert_eq!(uft.lookup(dst.fid_base + 3), None);
}

#[test]
fn address_assignment_ignores_topology() {
    let ring = engine();
    build_ring(&ring, 4).unwrap();
    ring.sweep().unwrap();

    let isolated = engine();
    add_devices(&isolated, 4, 1).unwrap();
    isolated.sweep().unwrap();

    for device in 0..4 {
        assert_eq!(node(&ring, device, 0).fids, node(&isolated, device, 0).fids);
        assert_eq!(
            node(&ring, device, 0).fids,
            fid::assign(SubdeviceId::new(device, 0))
        );
    }
}
