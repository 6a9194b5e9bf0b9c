// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Mock fabrics built from port manager updates, as a driver would report
//! them.

use crate::engine::RoutingEngine;
use crate::port::{LinkState, PortInfo, PortState};
use crate::registry::DeviceDesc;
use crate::types::{Guid, PortRef, RoutingResult, SubdeviceId};

/// GUID given to a subdevice by the builders.
#[must_use]
pub fn guid_of(id: SubdeviceId) -> Guid {
    (0xff << 56) | u64::from(id.0)
}

/// Description of device `index` with `subdevices` subdevices, packages laid
/// out every 128GiB.
#[must_use]
pub fn device_desc(index: u16, subdevices: u8) -> DeviceDesc {
    let per_sd = (128 / u16::from(subdevices)).saturating_sub(8).max(8);
    DeviceDesc {
        index,
        fabric_id: 0x1000 + u32::from(index),
        pkg_offset: index * 128,
        pkg_size: per_sd * u16::from(subdevices),
        guids: (0..subdevices)
            .map(|sd| guid_of(SubdeviceId::new(index, sd)))
            .collect(),
    }
}

/// Register `devices` unconnected devices.
pub fn add_devices(engine: &RoutingEngine, devices: u16, subdevices: u8) -> RoutingResult {
    for index in 0..devices {
        engine.add_device(&device_desc(index, subdevices))?;
    }
    Ok(())
}

/// Report an active link between two fabric ports on both ends.
pub fn link(engine: &RoutingEngine, a: PortRef, b: PortRef) -> RoutingResult {
    for (near, far) in [(a, b), (b, a)] {
        engine.update_port(near.sd, near.lpn, |port| {
            port.state = PortState::Active;
            port.link_state = LinkState::Active;
            port.routable = true;
            port.info = Some(PortInfo {
                neighbor_guid: guid_of(far.sd),
                neighbor_port_number: far.lpn,
            });
        })?;
    }
    Ok(())
}

/// Take a fabric port down.
pub fn unlink(engine: &RoutingEngine, port: PortRef) -> RoutingResult {
    engine.update_port(port.sd, port.lpn, |port| {
        port.state = PortState::Inactive;
        port.link_state = LinkState::Down;
        port.info = None;
    })
}

#[must_use]
pub fn port(device: u16, sd: u8, lpn: u8) -> PortRef {
    PortRef {
        sd: SubdeviceId::new(device, sd),
        lpn,
    }
}

/// Build the all-to-all fabric: port `j` of every subdevice of device `i`
/// links to port `N - j` of the same subdevice of device `(i + j) % N`, for
/// `j < N`. Remaining ports stay disabled.
pub fn build_all_to_all(engine: &RoutingEngine, devices: u16, subdevices: u8) -> RoutingResult {
    add_devices(engine, devices, subdevices)?;
    for i in 0..devices {
        for j in 1..devices {
            let peer = (i + j) % devices;
            if peer < i {
                continue;
            }
            for sd in 0..subdevices {
                link(engine, port(i, sd, j as u8), port(peer, sd, (devices - j) as u8))?;
            }
        }
    }
    Ok(())
}

/// Build a ring of single-subdevice devices: port 1 of device `i` links to
/// port 2 of device `i + 1`. Three devices make a triangle.
pub fn build_ring(engine: &RoutingEngine, devices: u16) -> RoutingResult {
    add_devices(engine, devices, 1)?;
    for i in 0..devices {
        link(engine, port(i, 0, 1), port((i + 1) % devices, 0, 2))?;
    }
    Ok(())
}

/// Build a path of single-subdevice devices.
pub fn build_path(engine: &RoutingEngine, devices: u16) -> RoutingResult {
    add_devices(engine, devices, 1)?;
    for i in 1..devices {
        link(engine, port(i - 1, 0, 1), port(i, 0, 2))?;
    }
    Ok(())
}
