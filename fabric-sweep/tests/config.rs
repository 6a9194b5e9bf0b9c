// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

// Environment variables are process-wide so every test here runs serially.

use std::io::Write;
use std::path::Path;

use clap::Parser;
use fabric_sweep::config::Config;
use serial_test::serial;
use tempfile::{NamedTempFile, tempdir};

fn cli(args: &[&str]) -> Config {
    Config::parse_from(std::iter::once("fabric-sweep").chain(args.iter().copied()))
}

fn conf_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("test should be able to create a tempfile");
    file.write_all(contents.as_bytes())
        .expect("test should be able to write the tempfile");
    file
}

fn set_env(key: &str, value: &str) {
    // SAFETY: tests touching the environment are serialised.
    unsafe { std::env::set_var(key, value) };
}

fn remove_env(key: &str) {
    // SAFETY: tests touching the environment are serialised.
    unsafe { std::env::remove_var(key) };
}

#[test]
#[serial]
fn defaults_without_sources() {
    let config = Config::load_with(cli(&[]), Path::new("missing.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn static_file_overrides_defaults() {
    let file = conf_file("devices = 6\nlog_level = \"debug\"\n");
    let config = Config::load_with(cli(&[]), file.path()).unwrap();
    assert_eq!(config.devices, Some(6));
    assert_eq!(config.log_level.as_deref(), Some("debug"));
    assert_eq!(config.subdevices, Config::default().subdevices);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = conf_file("devices = 6\nsweeps = 2\n");
    set_env("FABRIC_DEVICES", "8");
    let config = Config::load_with(cli(&[]), file.path());
    remove_env("FABRIC_DEVICES");

    let config = config.unwrap();
    assert_eq!(config.devices, Some(8));
    assert_eq!(config.sweeps, Some(2));
}

#[test]
#[serial]
fn command_line_overrides_everything() {
    let file = conf_file("devices = 6\n");
    set_env("FABRIC_DEVICES", "8");
    let config = Config::load_with(cli(&["--devices", "3"]), file.path());
    remove_env("FABRIC_DEVICES");

    assert_eq!(config.unwrap().devices, Some(3));
}

#[test]
#[serial]
fn extra_file_merged_over_static_file() {
    let base = conf_file("devices = 6\nsweeps = 2\n");
    let extra = conf_file("devices = 5\nfail_writes = [\"dev1_sd0\"]\n");
    let extra_path = extra.path().to_str().unwrap();

    let config = Config::load_with(cli(&["--conf-file", extra_path]), base.path()).unwrap();
    assert_eq!(config.devices, Some(5));
    assert_eq!(config.sweeps, Some(2));
    assert_eq!(config.fail_writes, Some(vec!["dev1_sd0".to_string()]));

    // The command line still wins over the extra file
    let config = Config::load_with(
        cli(&["--conf-file", extra_path, "--devices", "2"]),
        base.path(),
    )
    .unwrap();
    assert_eq!(config.devices, Some(2));
}

#[test]
#[serial]
fn extra_file_must_exist() {
    let dir = tempdir().expect("test should be able to create a tempdir");
    let missing = dir.path().join("missing.toml");

    let err = Config::load_with(
        cli(&["--conf-file", missing.to_str().unwrap()]),
        Path::new("missing.toml"),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not found"));

    let err = Config::load_with(
        cli(&["--conf-file", dir.path().to_str().unwrap()]),
        Path::new("missing.toml"),
    )
    .unwrap_err();
    assert!(err.to_string().contains("is not a file path"));
}

#[test]
#[serial]
fn malformed_values_are_reported() {
    let file = conf_file("devices = \"many\"\n");
    assert!(Config::load_with(cli(&[]), file.path()).is_err());
}
