// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Hardware access used by the programming phase.
//!
//! The engine never talks to the hardware directly: every register and table
//! write goes through a [`Transport`], which in production wraps the
//! management mailbox of each subdevice.

use std::error::Error;
use std::fmt;

use crate::fidgen::FIDGEN_BLOCK_SIZE;
use crate::port::LinkState;
use crate::types::{RoutingError, SubdeviceId};

/// Largest number of table entries carried by one mailbox write.
pub const MAX_TABLE_ENTRIES: usize = 1008;

/// Largest payload of one mailbox write in bytes.
pub const MAX_WRITE_BYTES: usize = 1008;

/// A failed hardware access.
#[derive(Debug, PartialEq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transport: {}", self.0)
    }
}

impl Error for TransportError {}

impl From<TransportError> for RoutingError {
    fn from(e: TransportError) -> Self {
        RoutingError(e.to_string())
    }
}

pub type TransportResult<T = ()> = Result<T, TransportError>;

/// Switch-wide forwarding parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchParameters {
    /// Highest address held in the forwarding table.
    pub lft_top: u32,
}

pub trait Transport: Send + Sync {
    /// Largest number of table entries accepted by [`Transport::write_table_block`].
    fn max_table_entries(&self) -> usize {
        MAX_TABLE_ENTRIES
    }

    /// Largest payload accepted by [`Transport::write_address_map`].
    fn max_write_bytes(&self) -> usize {
        MAX_WRITE_BYTES
    }

    fn write_switch_parameters(&self, sd: SubdeviceId, params: SwitchParameters) -> TransportResult;

    /// Write the one byte per entry image of a forwarding table range into
    /// the ports of `port_mask`, starting at address `fid_base`.
    fn write_table_block(
        &self,
        sd: SubdeviceId,
        port_mask: u32,
        fid_base: u32,
        entries: &[u8],
    ) -> TransportResult;

    /// Write the generator registers of bridge port `lpn`.
    fn write_address_generator(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        block: &[u64; FIDGEN_BLOCK_SIZE],
    ) -> TransportResult;

    /// Write a range of the DPA lookup table of bridge port `lpn`.
    fn write_address_map(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        offset: usize,
        entries: &[u64],
    ) -> TransportResult;

    /// Write the package range register of bridge port `lpn`.
    fn write_package_range(&self, sd: SubdeviceId, lpn: u8, csr: u64) -> TransportResult;

    /// Request a link state transition, returning the state the port
    /// reports afterwards.
    fn set_port_link_state(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        state: LinkState,
    ) -> TransportResult<LinkState>;

    /// Quiesce the traffic of the fabric ahead of reprogramming it.
    fn pause_traffic(&self) -> TransportResult {
        Ok(())
    }

    /// Resume traffic paused by [`Transport::pause_traffic`].
    fn resume_traffic(&self) {}
}
