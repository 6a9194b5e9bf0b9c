// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The programming phase of a sweep.
//!
//! Each routable subdevice is programmed by its own worker while the fabric
//! traffic is paused. Workers only read the registry, so this phase runs
//! under shared access. A worker that fails moves its subdevice to ERROR and
//! the remaining workers carry on.
//!
//! Per subdevice the order of writes is:
//!  - switch parameters,
//!  - forwarding tables of every enabled port,
//!  - for every bridge port: address generator, package range, DPA lookup
//!    table, then link activation.
//!
//! Tables that match what was committed by the previous sweep are skipped
//! unless the hardware may hold values from an abandoned sweep.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::thread;

use fabric_track::entity::Entity;
use fabric_track::{debug, error, trace, warn};

use crate::fid::{FID_BLOCK_SIZE, FID_CPORT_BASE, MAX_DEVICES, UFT_SIZE, fid_block_base};
use crate::fidgen::{Fidgen, package_range_csr};
use crate::port::{LinkState, PORT_BRIDGE_MASK, PORT_CPORT_MASK, bridge_lpns, is_fabric_lpn};
use crate::registry::{Device, Fabric};
use crate::subdevice::{RoutingState, Subdevice};
use crate::transport::{SwitchParameters, Transport, TransportResult};
use crate::types::{RoutingError, RoutingResult, SubdeviceId};
use crate::uft::{UFT_INVALID_PORT8, Uft, to_hardware};

/// Ports whose forwarding tables are written: the CPORT, the bridges and
/// every fabric port whose link has at least started training.
#[must_use]
pub fn table_port_mask(sd: &Subdevice) -> u32 {
    sd.ports()
        .iter()
        .filter(|p| is_fabric_lpn(p.lpn) && p.link_state >= LinkState::Init)
        .fold(PORT_CPORT_MASK | PORT_BRIDGE_MASK, |mask, p| {
            mask | (1 << p.lpn)
        })
}

/// Write a table image in pieces no larger than the transport accepts.
fn write_table(
    transport: &dyn Transport,
    sd: SubdeviceId,
    port_mask: u32,
    fid_base: u32,
    image: &[u8],
) -> TransportResult {
    let chunk_len = transport.max_table_entries().max(1);
    for (i, chunk) in image.chunks(chunk_len).enumerate() {
        transport.write_table_block(sd, port_mask, fid_base + (i * chunk_len) as u32, chunk)?;
    }
    Ok(())
}

/// The part of a subdevice's routing state the programming phase works from.
///
/// It is moved out of the subdevice for the duration of the hardware
/// accesses so that status queries never wait on the transport.
struct Staged {
    uft: Option<Uft>,
    uft_next: Uft,
    fidgen: Option<Fidgen>,
    fidgen_next: Fidgen,
    fid_base: u32,
    hw_dirty: bool,
    stale_blocks: BTreeSet<SubdeviceId>,
}

impl Staged {
    fn take(routing: &mut RoutingState) -> Option<Self> {
        if routing.uft_next.is_none() || routing.fidgen_next.is_none() {
            return None;
        }
        let uft_next = routing.uft_next.take()?;
        let fidgen_next = routing.fidgen_next.take()?;
        Some(Self {
            uft: routing.uft.take(),
            uft_next,
            fidgen: routing.fidgen.take(),
            fidgen_next,
            fid_base: routing.fids.fid_base,
            hw_dirty: routing.hw_dirty,
            stale_blocks: routing.stale_blocks.clone(),
        })
    }

    /// Return the tables to `routing` unless it was wiped in the meantime.
    fn restore(self, routing: &mut RoutingState, programmed: bool) {
        if routing.is_error() {
            return;
        }
        routing.uft = self.uft;
        routing.uft_next = Some(self.uft_next);
        routing.fidgen = self.fidgen;
        routing.fidgen_next = Some(self.fidgen_next);
        routing.programmed = programmed;
    }

    fn current_uft(&self) -> Option<&Uft> {
        if self.hw_dirty {
            None
        } else {
            self.uft.as_ref()
        }
    }

    fn current_fidgen(&self) -> Option<&Fidgen> {
        if self.hw_dirty {
            None
        } else {
            self.fidgen.as_ref()
        }
    }
}

/// Program the forwarding tables.
fn rpipe_write(
    transport: &dyn Transport,
    sd: &Subdevice,
    staged: &Staged,
) -> Result<usize, RoutingError> {
    let id = sd.id();
    let port_mask = table_port_mask(sd);
    let next = &staged.uft_next;
    let current = staged.current_uft();
    trace!(sd.entity ; "table port mask {port_mask:#06x}");

    write_table(
        transport,
        id,
        port_mask,
        FID_CPORT_BASE,
        &to_hardware(next.mgmt(), MAX_DEVICES),
    )?;

    let mut written = 0;
    for (dst, block) in next.bridges() {
        if current.and_then(|uft| uft.bridge(dst)) == Some(block) {
            continue;
        }
        write_table(
            transport,
            id,
            port_mask,
            fid_block_base(dst.0),
            &to_hardware(block, FID_BLOCK_SIZE),
        )?;
        written += 1;
    }

    let mut stale = staged.stale_blocks.clone();
    if let Some(uft) = &staged.uft {
        stale.extend(uft.bridges().map(|(dst, _)| dst));
    }
    let cleared = [UFT_INVALID_PORT8; FID_BLOCK_SIZE];
    for dst in stale {
        if next.bridge(dst).is_some() {
            continue;
        }
        trace!(sd.entity ; "clear block of {dst}");
        write_table(transport, id, port_mask, fid_block_base(dst.0), &cleared)?;
    }
    Ok(written)
}

/// Program the address generator and DPA lookup table of every bridge port,
/// then activate the bridge links.
fn bridge_write(
    transport: &dyn Transport,
    sd: &Subdevice,
    device: &Device,
    staged: &Staged,
) -> RoutingResult {
    let id = sd.id();
    let next = &staged.fidgen_next;
    let current = staged.current_fidgen();

    let fid_base = staged.fid_base;
    let block = next.block(fid_base);
    let write_block = current.map(|fidgen| fidgen.block(fid_base)) != Some(block);
    let csr = package_range_csr(device.pkg_offset, device.pkg_size);
    let chunk_len = (transport.max_write_bytes() / size_of::<u64>()).max(1);

    for lpn in bridge_lpns() {
        if write_block {
            transport.write_address_generator(id, lpn, &block)?;
        }
        transport.write_package_range(id, lpn, csr)?;

        for (i, chunk) in next.map().chunks(chunk_len).enumerate() {
            let offset = i * chunk_len;
            let unchanged = current
                .and_then(|fidgen| fidgen.map().get(offset..offset + chunk.len()))
                .is_some_and(|programmed| programmed == chunk);
            if !unchanged {
                transport.write_address_map(id, lpn, offset, chunk)?;
            }
        }

        let state = transport.set_port_link_state(id, lpn, LinkState::Active)?;
        if state != LinkState::Active {
            warn!(sd.entity ; "bridge port {lpn} link {state} after activation");
        }
    }
    Ok(())
}

/// Program one subdevice with its staged tables.
///
/// The routing state is only locked to move the tables out and back in.
fn program(transport: &dyn Transport, sd: &Subdevice, device: Option<&Device>) -> RoutingResult {
    let Some(device) = device else {
        return Err(RoutingError(format!("{}: no device", sd.id())));
    };
    let Some(staged) = Staged::take(&mut sd.routing()) else {
        return Err(RoutingError(format!("{}: no tables staged", sd.id())));
    };

    let result = write_staged(transport, sd, device, &staged);
    staged.restore(&mut sd.routing(), result.is_ok());
    result
}

fn write_staged(
    transport: &dyn Transport,
    sd: &Subdevice,
    device: &Device,
    staged: &Staged,
) -> RoutingResult {
    transport.write_switch_parameters(
        sd.id(),
        SwitchParameters {
            lft_top: UFT_SIZE - 1,
        },
    )?;
    let blocks = rpipe_write(transport, sd, staged)?;
    bridge_write(transport, sd, device, staged)?;
    debug!(sd.entity ; "programmed, {blocks} data blocks written");
    Ok(())
}

fn worker(
    transport: &dyn Transport,
    sd: &Subdevice,
    device: Option<&Device>,
    sd_error: &AtomicBool,
) {
    if let Err(e) = program(transport, sd, device) {
        error!(sd.entity ; "programming failed: {e}");
        sd.transition_error(sd_error);
    }
}

/// Run the programming phase.
///
/// Returns an error without touching any subdevice if the traffic cannot be
/// paused. Failures of individual subdevices are reported through their
/// state and the topology's error signal.
pub fn run(fabric: &Fabric, transport: &dyn Transport, entity: &Entity) -> RoutingResult {
    if let Err(e) = transport.pause_traffic() {
        error!(entity ; "unable to pause traffic: {e}");
        return Err(e.into());
    }

    let sd_error = &fabric.topology.sd_error;
    thread::scope(|s| {
        let handles: Vec<_> = fabric
            .routable()
            .map(|sd| {
                let device = fabric.device(sd.device_index()).map(|dev| &**dev);
                let handle = s.spawn(move || worker(transport, sd, device, sd_error));
                (sd, handle)
            })
            .collect();

        for (sd, handle) in handles {
            if handle.join().is_err() {
                error!(sd.entity ; "programming worker panicked");
                sd.transition_error(sd_error);
            }
        }
    });

    transport.resume_traffic();
    Ok(())
}
