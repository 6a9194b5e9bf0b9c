// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Sparse unicast forwarding table (UFT).
//!
//! Entries are egress port numbers packed 4 bits per entry, two entries per
//! byte. The table is split into the management block, indexed by address
//! group, and one data block per destination subdevice that is allocated on
//! demand.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::fid::{FID_BLOCK_BASE, FID_BLOCK_SIZE, FID_CPORT_BASE, MAX_DEVICES};
use crate::types::{RoutingError, SubdeviceId};

/// Unassigned 4-bit table entry.
pub const UFT_INVALID_PORT4: u8 = 0xf;

/// Unassigned entry in the 8-bit hardware image.
pub const UFT_INVALID_PORT8: u8 = 0x7f;

const PORT4_MASK: u8 = 0xf;

#[must_use]
pub const fn packed_len(entries: usize) -> usize {
    entries.div_ceil(2)
}

/// Store `port` at entry `offset` of a packed block.
///
/// Even offsets use the high nibble and odd offsets the low nibble.
pub fn entry_set(block: &mut [u8], offset: usize, port: u8) {
    let byte = &mut block[offset >> 1];
    let port = port & PORT4_MASK;
    if offset & 1 == 0 {
        *byte = (*byte & PORT4_MASK) | (port << 4);
    } else {
        *byte = (*byte & !PORT4_MASK) | port;
    }
}

/// Read entry `offset` of a packed block.
#[must_use]
pub fn entry_get(block: &[u8], offset: usize) -> u8 {
    let byte = block[offset >> 1];
    if offset & 1 == 0 {
        byte >> 4
    } else {
        byte & PORT4_MASK
    }
}

/// Expand the first `entries` entries of a packed block to the one byte per
/// entry image written to the hardware.
#[must_use]
pub fn to_hardware(block: &[u8], entries: usize) -> Vec<u8> {
    (0..entries)
        .map(|offset| match entry_get(block, offset) {
            UFT_INVALID_PORT4 => UFT_INVALID_PORT8,
            port => port,
        })
        .collect()
}

fn alloc_block(entries: usize) -> Result<Box<[u8]>, RoutingError> {
    let len = packed_len(entries);
    let mut block = Vec::new();
    block.try_reserve_exact(len)?;
    block.resize(len, u8::MAX);
    Ok(block.into_boxed_slice())
}

/// A forwarding table of one subdevice.
#[derive(Clone, Debug, PartialEq)]
pub struct Uft {
    mgmt: Box<[u8]>,
    bridges: BTreeMap<SubdeviceId, Box<[u8]>>,
}

impl Uft {
    /// Allocate a table with every management entry unassigned and no data
    /// blocks.
    pub fn try_new() -> Result<Self, RoutingError> {
        Ok(Self {
            mgmt: alloc_block(MAX_DEVICES)?,
            bridges: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn mgmt(&self) -> &[u8] {
        &self.mgmt
    }

    pub fn mgmt_mut(&mut self) -> &mut [u8] {
        &mut self.mgmt
    }

    #[must_use]
    pub fn bridge(&self, dst: SubdeviceId) -> Option<&[u8]> {
        self.bridges.get(&dst).map(|block| &block[..])
    }

    /// Return the data block for `dst`, allocating it on first use.
    pub fn bridge_mut(&mut self, dst: SubdeviceId) -> Result<&mut [u8], RoutingError> {
        let block = match self.bridges.entry(dst) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(alloc_block(FID_BLOCK_SIZE)?),
        };
        Ok(&mut block[..])
    }

    pub fn bridges(&self) -> impl Iterator<Item = (SubdeviceId, &[u8])> {
        self.bridges.iter().map(|(dst, block)| (*dst, &block[..]))
    }

    /// Resolve an address to its egress port, if one is assigned.
    #[must_use]
    pub fn lookup(&self, fid: u32) -> Option<u8> {
        let port = if (FID_CPORT_BASE..FID_CPORT_BASE + MAX_DEVICES as u32).contains(&fid) {
            entry_get(&self.mgmt, (fid - FID_CPORT_BASE) as usize)
        } else if fid >= FID_BLOCK_BASE {
            let rel = fid - FID_BLOCK_BASE;
            let group = SubdeviceId(rel / FID_BLOCK_SIZE as u32);
            let block = self.bridge(group)?;
            entry_get(block, rel as usize % FID_BLOCK_SIZE)
        } else {
            return None;
        };
        (port != UFT_INVALID_PORT4).then_some(port)
    }
}
