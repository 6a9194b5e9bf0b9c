// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A recording transport for tests and documentation.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::fidgen::FIDGEN_BLOCK_SIZE;
use crate::port::LinkState;
use crate::transport::{SwitchParameters, Transport, TransportError, TransportResult};
use crate::types::SubdeviceId;

/// One hardware access seen by a [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    SwitchParameters {
        sd: SubdeviceId,
        params: SwitchParameters,
    },
    TableBlock {
        sd: SubdeviceId,
        port_mask: u32,
        fid_base: u32,
        entries: Vec<u8>,
    },
    AddressGenerator {
        sd: SubdeviceId,
        lpn: u8,
        block: [u64; FIDGEN_BLOCK_SIZE],
    },
    AddressMap {
        sd: SubdeviceId,
        lpn: u8,
        offset: usize,
        entries: Vec<u64>,
    },
    PackageRange {
        sd: SubdeviceId,
        lpn: u8,
        csr: u64,
    },
    LinkState {
        sd: SubdeviceId,
        lpn: u8,
        state: LinkState,
    },
}

impl Write {
    #[must_use]
    pub fn subdevice(&self) -> SubdeviceId {
        match self {
            Write::SwitchParameters { sd, .. }
            | Write::TableBlock { sd, .. }
            | Write::AddressGenerator { sd, .. }
            | Write::AddressMap { sd, .. }
            | Write::PackageRange { sd, .. }
            | Write::LinkState { sd, .. } => *sd,
        }
    }
}

/// A transport that records every write and fails on request.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<Write>>,
    failing: Mutex<HashSet<SubdeviceId>>,
    fail_pause: AtomicBool,
    pauses: Mutex<(usize, usize)>,
}

impl RecordingTransport {
    #[must_use]
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    #[must_use]
    pub fn writes_to(&self, sd: SubdeviceId) -> Vec<Write> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.subdevice() == sd)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }

    /// Make every write to `sd` fail.
    pub fn fail(&self, sd: SubdeviceId) {
        self.failing.lock().insert(sd);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn set_fail_pause(&self, fail: bool) {
        self.fail_pause.store(fail, Ordering::SeqCst);
    }

    /// Number of `(pause, resume)` calls.
    #[must_use]
    pub fn pauses(&self) -> (usize, usize) {
        *self.pauses.lock()
    }

    /// Forwarding table contents of `sd` after replaying every table write:
    /// address to hardware port value.
    #[must_use]
    pub fn table_image(&self, sd: SubdeviceId) -> BTreeMap<u32, u8> {
        let mut image = BTreeMap::new();
        for write in self.writes.lock().iter() {
            if let Write::TableBlock {
                sd: to,
                fid_base,
                entries,
                ..
            } = write
            {
                if *to != sd {
                    continue;
                }
                for (i, value) in entries.iter().enumerate() {
                    image.insert(fid_base + i as u32, *value);
                }
            }
        }
        image
    }

    fn record(&self, write: Write) -> TransportResult {
        let sd = write.subdevice();
        if self.failing.lock().contains(&sd) {
            return Err(TransportError(format!("{sd}: write failed")));
        }
        self.writes.lock().push(write);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn write_switch_parameters(
        &self,
        sd: SubdeviceId,
        params: SwitchParameters,
    ) -> TransportResult {
        self.record(Write::SwitchParameters { sd, params })
    }

    fn write_table_block(
        &self,
        sd: SubdeviceId,
        port_mask: u32,
        fid_base: u32,
        entries: &[u8],
    ) -> TransportResult {
        if entries.len() > self.max_table_entries() {
            return Err(TransportError(format!(
                "{sd}: {} entries exceed a single write",
                entries.len()
            )));
        }
        self.record(Write::TableBlock {
            sd,
            port_mask,
            fid_base,
            entries: entries.to_vec(),
        })
    }

    fn write_address_generator(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        block: &[u64; FIDGEN_BLOCK_SIZE],
    ) -> TransportResult {
        self.record(Write::AddressGenerator {
            sd,
            lpn,
            block: *block,
        })
    }

    fn write_address_map(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        offset: usize,
        entries: &[u64],
    ) -> TransportResult {
        self.record(Write::AddressMap {
            sd,
            lpn,
            offset,
            entries: entries.to_vec(),
        })
    }

    fn write_package_range(&self, sd: SubdeviceId, lpn: u8, csr: u64) -> TransportResult {
        self.record(Write::PackageRange { sd, lpn, csr })
    }

    fn set_port_link_state(
        &self,
        sd: SubdeviceId,
        lpn: u8,
        state: LinkState,
    ) -> TransportResult<LinkState> {
        self.record(Write::LinkState { sd, lpn, state })?;
        Ok(state)
    }

    fn pause_traffic(&self) -> TransportResult {
        if self.fail_pause.load(Ordering::SeqCst) {
            return Err(TransportError("unable to pause traffic".to_string()));
        }
        self.pauses.lock().0 += 1;
        Ok(())
    }

    fn resume_traffic(&self) {
        self.pauses.lock().1 += 1;
    }
}
