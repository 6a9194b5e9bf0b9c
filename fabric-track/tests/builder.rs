// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fs;

use fabric_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use fabric_track::entity::{Entity, toplevel};
use fabric_track::{debug, info, str_to_level};

#[test]
fn text_tracker_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fabric.log");
    let path_str = path.to_str().unwrap();

    let config = TrackersConfig {
        text: TrackerConfig {
            enable: true,
            level: log::Level::Debug,
            filter_regex: ".*sd1",
            file: Some(path_str),
        },
        facade: TrackerConfig {
            enable: false,
            ..Default::default()
        },
    };
    let tracker = setup_trackers(&config).unwrap();

    let top = toplevel(&tracker, "fabric");
    let sd0 = Entity::new(&top, "dev0_sd0");
    let sd1 = Entity::new(&top, "dev0_sd1");
    debug!(sd0 ; "filtered");
    debug!(sd1 ; "kept {}", 1);
    info!(top ; "filtered");
    tracker.shutdown();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, format!("{}:DEBUG: kept 1\n", sd1.id));
}

#[test]
fn bad_filter_is_an_error() {
    let config = TrackersConfig {
        text: TrackerConfig {
            filter_regex: "[",
            ..Default::default()
        },
        facade: TrackerConfig {
            enable: false,
            ..Default::default()
        },
    };
    assert!(setup_trackers(&config).is_err());
}

#[test]
fn unwritable_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("fabric.log");
    let config = TrackersConfig {
        text: TrackerConfig {
            file: path.to_str(),
            ..Default::default()
        },
        facade: TrackerConfig {
            enable: false,
            ..Default::default()
        },
    };
    assert!(setup_trackers(&config).is_err());
}

#[test]
fn levels_from_strings() {
    assert_eq!(str_to_level("info").unwrap(), log::Level::Info);
    assert_eq!(str_to_level("TRACE").unwrap(), log::Level::Trace);
    assert!(str_to_level("loud").is_err());
}
