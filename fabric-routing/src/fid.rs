// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Fabric address (FID) layout and assignment.
//!
//! The address space is partitioned into a reserved low block, one
//! management address per subdevice starting at [`FID_CPORT_BASE`], an
//! alignment gap and then one [`FID_BLOCK_SIZE`] block of data addresses per
//! subdevice starting at [`FID_BLOCK_BASE`].
//!
//! Within a data block the low bits of an address select:
//!  - `[5:3]` the path,
//!  - `[2:1]` the local bridge endpoint,
//!  - `[0]` the host flag, which is unused so odd addresses are invalid.

use crate::types::SubdeviceId;

pub const MAX_SUBDEVICES: usize = 2;

pub const FID_BLOCK_SIZE: usize = 64;
pub const VALID_FIDS_PER_BLOCK: usize = FID_BLOCK_SIZE / 2;

pub const FID_CPORT_BASE: u32 = 64;
pub const FID_BLOCK_BASE: u32 = 832;

/// Number of entries in the management block.
pub const MAX_DEVICES: usize = 755;

/// Number of entries of the hardware unicast forwarding table.
pub const UFT_SIZE: u32 = 48 * 1024;

const FID_HOST_MASK: u32 = 0x1;
const FID_BRIDGE_SHIFT: u32 = 1;
const FID_BRIDGE_MASK: u32 = 0x3;

/// Addresses assigned to a subdevice.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FidAssignment {
    pub fid_group: u32,
    pub fid_mgmt: u32,
    pub fid_base: u32,
}

#[must_use]
pub fn fid_cport(fid_group: u32) -> u32 {
    FID_CPORT_BASE + fid_group
}

#[must_use]
pub fn fid_block_base(fid_group: u32) -> u32 {
    FID_BLOCK_BASE + FID_BLOCK_SIZE as u32 * fid_group
}

/// Odd addresses carry the unused host flag.
#[must_use]
pub fn is_host_fid(fid: u32) -> bool {
    fid & FID_HOST_MASK != 0
}

/// Bridge endpoint selected by an address.
#[must_use]
pub fn fid_to_bridge_offset(fid: u32) -> u8 {
    ((fid >> FID_BRIDGE_SHIFT) & FID_BRIDGE_MASK) as u8
}

/// Compute the addresses of a subdevice.
///
/// A pure function of the subdevice's identity, so the result is the same on
/// every sweep whatever the connectivity.
#[must_use]
pub fn assign(id: SubdeviceId) -> FidAssignment {
    let fid_group = id.0;
    FidAssignment {
        fid_group,
        fid_mgmt: fid_cport(fid_group),
        fid_base: fid_block_base(fid_group),
    }
}

/// Whether the addresses of a subdevice fit in the forwarding table.
#[must_use]
pub fn group_is_addressable(id: SubdeviceId) -> bool {
    (id.0 as usize) < MAX_DEVICES
}
