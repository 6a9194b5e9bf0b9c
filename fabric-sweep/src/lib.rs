// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Drive the fabric routing engine from the command line.
//!
//! The fabric is either generated (all-to-all between `devices` devices of
//! `subdevices` subdevices each) or loaded from a
//! [description](crate::description) file. Hardware accesses go to an
//! in-memory [model](crate::sim_transport::SimTransport) of the switches,
//! which can be told to fail writes to chosen subdevices to exercise
//! recovery.

pub mod app;
pub mod config;
pub mod description;
pub mod sim_transport;
