// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

use std::io::Write;

use fabric_routing::types::SubdeviceId;
use fabric_sweep::app::App;
use fabric_sweep::config::Config;
use fabric_track::tracker::dev_null_tracker;
use tempfile::NamedTempFile;

fn config(devices: u16, subdevices: u8) -> Config {
    Config {
        devices: Some(devices),
        subdevices: Some(subdevices),
        ..Config::default()
    }
}

#[test]
fn generated_fabric_routes_in_one_sweep() {
    let mut app = App::build(&config(4, 2), &dev_null_tracker()).unwrap();
    let statuses = app.run(3);

    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert!(status.committed);
    assert_eq!(status.planes, 2);
    assert_eq!(status.subdevices_good, 8);
    // Three links per subdevice, both ends in use
    assert_eq!(status.ports_used, 8 * 3);
    assert_eq!(app.engine.generation(), (1, 1));
}

#[test]
fn failed_writes_recover() {
    let config = Config {
        fail_writes: Some(vec!["dev1_sd0".to_string()]),
        ..config(3, 1)
    };
    let mut app = App::build(&config, &dev_null_tracker()).unwrap();
    let statuses = app.run(3);

    assert_eq!(statuses.len(), 2);
    assert!(!statuses[0].committed);
    assert_eq!(statuses[0].subdevices_good, 2);
    assert!(statuses[1].committed);
    assert_eq!(statuses[1].subdevices_good, 3);
    assert_eq!(app.engine.generation(), (2, 2));

    let switch = app.transport.switch(SubdeviceId::new(1, 0)).unwrap();
    assert!(switch.lft_top.is_some());
}

#[test]
fn sweeps_are_bounded() {
    let config = Config {
        fail_writes: Some(vec!["dev0_sd0".to_string()]),
        ..config(2, 1)
    };
    let mut app = App::build(&config, &dev_null_tracker()).unwrap();
    let statuses = app.run(1);
    assert_eq!(statuses.len(), 1);
    assert!(!statuses[0].committed);
}

#[test]
fn bad_failure_names_are_rejected() {
    let config = Config {
        fail_writes: Some(vec!["device1".to_string()]),
        ..config(2, 1)
    };
    assert!(App::build(&config, &dev_null_tracker()).is_err());
}

#[test]
fn described_fabric() {
    let mut file = NamedTempFile::new().expect("test should be able to create a tempfile");
    file.write_all(
        br#"
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

[[links]]
a = [0, 0, 3]
b = [1, 0, 5]
"#,
    )
    .expect("test should be able to write the tempfile");

    let config = Config {
        topology: Some(file.path().to_str().unwrap().to_string()),
        ..Config::default()
    };
    let mut app = App::build(&config, &dev_null_tracker()).unwrap();
    let statuses = app.run(2);
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].committed);

    let usage = app.engine.ports_in_use();
    assert_eq!(usage[&SubdeviceId::new(0, 0)], 1 << 3);
    assert_eq!(usage[&SubdeviceId::new(1, 0)], 1 << 5);
}
