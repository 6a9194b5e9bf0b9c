// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use fabric_routing::engine::RoutingEngine;
use fabric_routing::fid;
use fabric_routing::types::SubdeviceId;
use fabric_sweep::description::FabricDescription;
use fabric_sweep::sim_transport::SimTransport;
use fabric_track::entity::toplevel;
use fabric_track::tracker::dev_null_tracker;

const TRIANGLE: &str = r#"
[[devices]]
index = 0
subdevices = 1
pkg_offset = 0
pkg_size = 120

[[devices]]
index = 1
subdevices = 1
pkg_offset = 128
pkg_size = 120

[[devices]]
index = 2
subdevices = 1
pkg_offset = 256
pkg_size = 120
fabric_id = 77

[[links]]
a = [0, 0, 1]
b = [1, 0, 2]

[[links]]
a = [1, 0, 1]
b = [2, 0, 2]

[[links]]
a = [2, 0, 1]
b = [0, 0, 2]
"#;

fn engine() -> (RoutingEngine, Arc<SimTransport>) {
    let top = toplevel(&dev_null_tracker(), "fabric");
    let transport = Arc::new(SimTransport::new(&top));
    (RoutingEngine::new(&top, transport.clone()), transport)
}

#[test]
fn triangle_is_routed() {
    let description = FabricDescription::parse(TRIANGLE).unwrap();
    assert_eq!(description.devices.len(), 3);
    assert_eq!(description.links.len(), 3);

    let (engine, transport) = engine();
    description.apply(&engine).unwrap();
    assert!(engine.fabric().device_by_fabric_id(77).is_some());

    let status = engine.sweep().unwrap();
    assert!(status.committed);
    assert_eq!(status.planes, 1);
    assert_eq!(status.ports_used, 6);

    let dev0 = SubdeviceId::new(0, 0);
    let to_dev1 = fid::assign(SubdeviceId::new(1, 0));
    let to_dev2 = fid::assign(SubdeviceId::new(2, 0));
    assert_eq!(transport.lookup(dev0, to_dev1.fid_mgmt), Some(1));
    assert_eq!(transport.lookup(dev0, to_dev2.fid_mgmt), Some(2));

    let switch = transport.switch(dev0).unwrap();
    assert_eq!(switch.generators.len(), 4);
    assert_eq!(switch.maps[&9].len(), 47);
}

#[test]
fn missing_sections_are_empty() {
    let description = FabricDescription::parse("").unwrap();
    assert!(description.devices.is_empty());
    assert!(description.links.is_empty());
}

#[test]
fn links_must_join_known_subdevices() {
    let toml = r#"
[[devices]]
index = 0
subdevices = 1
pkg_offset = 0
pkg_size = 120

[[links]]
a = [0, 0, 1]
b = [0, 1, 1]
"#;
    let description = FabricDescription::parse(toml).unwrap();
    let (engine, _transport) = engine();
    let err = description.apply(&engine).unwrap_err();
    assert!(err.to_string().contains("unknown subdevice dev0_sd1"));
    assert_eq!(engine.fabric().devices().count(), 0);
}

#[test]
fn duplicate_devices_are_rejected() {
    let toml = r#"
[[devices]]
index = 0
subdevices = 1
pkg_offset = 0
pkg_size = 120

[[devices]]
index = 0
subdevices = 2
pkg_offset = 128
pkg_size = 112
"#;
    let description = FabricDescription::parse(toml).unwrap();
    let (engine, _transport) = engine();
    assert!(description.apply(&engine).is_err());
}

#[test]
fn malformed_descriptions_are_reported() {
    assert!(FabricDescription::parse("[[devices]]\nindex = 0\n").is_err());
    assert!(FabricDescription::load(std::path::Path::new("no/such/fabric.toml")).is_err());
}

#[test]
fn bundled_fabrics_load() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fabrics/triangle.toml");
    let description = FabricDescription::load(&path).unwrap();
    assert_eq!(description.devices.len(), 3);

    let (engine, _transport) = engine();
    description.apply(&engine).unwrap();
    assert!(engine.sweep().unwrap().committed);
}
