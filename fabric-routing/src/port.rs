// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Ports of a subdevice as published by the port manager.
//!
//! Logical port numbers (lpn) are laid out as:
//!  - `0`: the management port (CPORT).
//!  - `1..=8`: fabric ports, connected point-to-point to other subdevices.
//!  - `9..=12`: bridge ports, connecting the switch to the local endpoints.

use std::fmt;
use std::ops::RangeInclusive;

use crate::types::Guid;

/// Total number of logical ports on a subdevice.
pub const PORT_COUNT: u8 = 13;

pub const CPORT: u8 = 0;

pub const PORT_FABRIC_START: u8 = 1;
pub const PORT_FABRIC_COUNT: u8 = 8;
pub const PORT_FABRIC_END: u8 = PORT_FABRIC_START + PORT_FABRIC_COUNT - 1;

pub const PORT_BRIDGE_START: u8 = 9;
pub const PORT_BRIDGE_COUNT: u8 = 4;
pub const PORT_BRIDGE_END: u8 = PORT_BRIDGE_START + PORT_BRIDGE_COUNT - 1;

pub const PORT_CPORT_MASK: u32 = 1 << CPORT;
pub const PORT_FABRIC_MASK: u32 = ((1 << PORT_FABRIC_COUNT) - 1) << PORT_FABRIC_START;
pub const PORT_BRIDGE_MASK: u32 = ((1 << PORT_BRIDGE_COUNT) - 1) << PORT_BRIDGE_START;

#[must_use]
pub fn fabric_lpns() -> RangeInclusive<u8> {
    PORT_FABRIC_START..=PORT_FABRIC_END
}

#[must_use]
pub fn bridge_lpns() -> RangeInclusive<u8> {
    PORT_BRIDGE_START..=PORT_BRIDGE_END
}

#[must_use]
pub fn is_fabric_lpn(lpn: u8) -> bool {
    fabric_lpns().contains(&lpn)
}

/// Port-manager state of a port.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PortState {
    #[default]
    Disabled,
    Inactive,
    Active,
}

/// Logical link state of a port.
///
/// Ordered so that link bring-up progress can be compared.
#[derive(Copy, Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum LinkState {
    #[default]
    Down,
    Init,
    Armed,
    Active,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkState::Down => write!(f, "down"),
            LinkState::Init => write!(f, "init"),
            LinkState::Armed => write!(f, "armed"),
            LinkState::Active => write!(f, "active"),
        }
    }
}

/// What the port reports about the far end of its link.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PortInfo {
    pub neighbor_guid: Guid,
    pub neighbor_port_number: u8,
}

/// Snapshot of one fabric port.
#[derive(Clone, Debug, Default)]
pub struct FabricPort {
    pub lpn: u8,
    pub state: PortState,
    pub link_state: LinkState,

    /// Administrative control allowing the port to carry routed traffic.
    pub routable: bool,

    /// Neighbor report, present once the port manager has read it from the
    /// hardware.
    pub info: Option<PortInfo>,

    /// Whether the port carries routed traffic. Only updated by a
    /// successful sweep.
    pub routed: bool,
}

impl FabricPort {
    #[must_use]
    pub fn new(lpn: u8) -> Self {
        Self {
            lpn,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.state == PortState::Active && self.routable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(PORT_CPORT_MASK, 0x1);
        assert_eq!(PORT_FABRIC_MASK, 0x1fe);
        assert_eq!(PORT_BRIDGE_MASK, 0x1e00);
        assert_eq!(fabric_lpns().count(), 8);
        assert_eq!(bridge_lpns().last(), Some(PORT_COUNT - 1));
    }

    #[test]
    fn routable_needs_active_and_control() {
        let mut port = FabricPort::new(3);
        port.routable = true;
        assert!(!port.is_routable());
        port.state = PortState::Active;
        assert!(port.is_routable());
        port.routable = false;
        assert!(!port.is_routable());
    }
}
