// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! Routing core of a switched fabric.
//!
//! The [engine](crate::engine::RoutingEngine) keeps a registry of devices and
//! their subdevices and, on every sweep:
//!  - validates the one-hop links reported by the port manager,
//!  - partitions the fabric into connected planes and computes the cost
//!    between every pair of subdevices of a plane,
//!  - assigns fabric addresses and compiles the forwarding table and DPA
//!    address generator of every subdevice,
//!  - programs them through a [`Transport`](crate::transport::Transport), one
//!    worker per subdevice.
//!
//! # Simple Application
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use fabric_routing::engine::RoutingEngine;
//! use fabric_routing::mock::build_all_to_all;
//! use fabric_routing::test_helpers::RecordingTransport;
//! use fabric_track::entity::toplevel;
//! use fabric_track::tracker::dev_null_tracker;
//!
//! let top = toplevel(&dev_null_tracker(), "fabric");
//! let transport = Arc::new(RecordingTransport::default());
//! let engine = RoutingEngine::new(&top, transport.clone());
//! build_all_to_all(&engine, 4, 2).expect("should be able to build the fabric");
//!
//! let status = engine.sweep().expect("sweep should succeed");
//! assert!(status.committed);
//! assert_eq!(status.planes, 2);
//! assert_eq!(engine.generation(), (1, 1));
//! ```

pub mod engine;
pub mod event;
pub mod fid;
pub mod fidgen;
pub mod io;
pub mod logic;
pub mod mock;
pub mod port;
pub mod registry;
pub mod subdevice;
pub mod test_helpers;
pub mod topology;
pub mod transport;
pub mod types;
pub mod uft;

pub use engine::{RoutingEngine, SweepStatus};
pub use types::{RoutingError, RoutingResult, SubdeviceId};
