// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Bridge address generator ("fidgen") registers.
//!
//! Each bridge port turns a device physical address (DPA) into a destination
//! address by indexing a lookup table with the DPA bits above the minimum
//! per-subdevice DPA block. Every table entry holds the destination data
//! block (address >> 6); the low address bits are then filled from a hash of
//! the remaining DPA bits, spreading traffic over the 64 addresses of the
//! block.

use crate::types::RoutingError;

/// Device DPA ranges are aligned to this size.
pub const DEV_DPA_ALIGNMENT: u64 = 128 << 30;

/// Smallest DPA range assigned to a subdevice.
pub const MIN_DPA_PER_SD: u64 = 8 << 30;

/// Shift from an address to the table entry selecting its data block.
pub const DPA_DFID_MAP_SHIFT: u32 = 6;

/// Maximum number of lookup table entries.
pub const DPA_DFID_MAP_SIZE: usize = 8192;

/// Width of the lookup table index field of the DPA.
const LUT_INDEX_WIDTH: u32 = 13;

/// `shift_a` flag selecting a right shift.
const SHIFT_RIGHT: u64 = 1 << 6;

/// Number of 64-bit registers in a generator block.
pub const FIDGEN_BLOCK_SIZE: usize = 12;

/// Bits of the minimum per-subdevice DPA block.
#[must_use]
pub const fn dpa_range_bits() -> u32 {
    MIN_DPA_PER_SD.trailing_zeros()
}

const fn genmask(high: u32, low: u32) -> u64 {
    (u64::MAX >> (63 - high)) & (u64::MAX << low)
}

/// Generator registers plus the DPA to destination lookup table.
#[derive(Clone, Debug, PartialEq)]
pub struct Fidgen {
    pub mask_a: u64,
    pub shift_a: u64,
    pub mask_b: u64,
    pub shift_b: u64,
    pub mask_h: u64,
    pub shift_h: u64,
    pub mask_d: u64,
    pub modulo: u64,
    map: Vec<u64>,
}

impl Fidgen {
    /// Allocate a generator whose lookup table covers `map_size` DPA
    /// indices, all mapped to address block 0.
    ///
    /// Mask A selects the DPA range index into the table, mask B is unused,
    /// mask D selects every hashable bit and mask H every hashed path bit.
    /// Modulo selects the maximum number of alternate paths.
    pub fn try_new(map_size: usize) -> Result<Self, RoutingError> {
        if map_size > DPA_DFID_MAP_SIZE {
            return Err(RoutingError(format!(
                "address map of {map_size} entries exceeds {DPA_DFID_MAP_SIZE}"
            )));
        }

        let mut map = Vec::new();
        map.try_reserve_exact(map_size)?;
        map.resize(map_size, 0);

        Ok(Self {
            mask_a: genmask(LUT_INDEX_WIDTH, 0) << dpa_range_bits(),
            shift_a: u64::from(dpa_range_bits()) | SHIFT_RIGHT,
            mask_b: 0,
            shift_b: 0,
            mask_h: u64::MAX,
            shift_h: 0,
            mask_d: genmask(39, 0),
            modulo: 7,
            map,
        })
    }

    #[must_use]
    pub fn map(&self) -> &[u64] {
        &self.map
    }

    /// Map the DPA indices `[base, base + range)` to the data block of
    /// `dfid`.
    pub fn set_dpa_lut(&mut self, base: u32, range: u32, dfid: u32) -> Result<(), RoutingError> {
        let start = base as usize;
        let end = start + range as usize;
        match self.map.get_mut(start..end) {
            Some(entries) => {
                entries.fill(u64::from(dfid >> DPA_DFID_MAP_SHIFT));
                Ok(())
            }
            None => Err(RoutingError(format!(
                "DPA indices {start}..{end} outside map of {}",
                self.map.len()
            ))),
        }
    }

    /// Register image for a subdevice whose data block starts at `fid_base`.
    #[must_use]
    pub fn block(&self, fid_base: u32) -> [u64; FIDGEN_BLOCK_SIZE] {
        [
            self.mask_a,
            self.shift_a,
            self.mask_b,
            self.shift_b,
            0,
            0,
            self.mask_h,
            self.shift_h,
            self.modulo,
            u64::from(fid_base >> DPA_DFID_MAP_SHIFT),
            self.mask_d,
            0,
        ]
    }
}

/// Package address range register value.
///
/// Base and size are in GiB.
#[must_use]
pub fn package_range_csr(pkg_offset: u16, pkg_size: u16) -> u64 {
    const BASE_SHIFT: u32 = 1;
    const RANGE_SHIFT: u32 = 20;
    ((u64::from(pkg_offset) << BASE_SHIFT) & genmask(18, 1))
        | ((u64::from(pkg_size) << RANGE_SHIFT) & genmask(29, 20))
}
