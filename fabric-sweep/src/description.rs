// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Fabric descriptions loaded from TOML.
//!
//! ```toml
//! [[devices]]
//! index = 0
//! subdevices = 1
//! pkg_offset = 0
//! pkg_size = 120
//!
//! [[devices]]
//! index = 1
//! subdevices = 1
//! pkg_offset = 128
//! pkg_size = 120
//!
//! [[links]]
//! a = [0, 0, 1]
//! b = [1, 0, 2]
//! ```
//!
//! A link joins fabric port `a[2]` of subdevice `a[1]` of device `a[0]` to
//! the port named by `b`.

use std::path::Path;

use fabric_routing::engine::RoutingEngine;
use fabric_routing::mock::{guid_of, link, port};
use fabric_routing::registry::DeviceDesc;
use fabric_routing::types::{PortRef, SubdeviceId};
use figment::Figment;
use figment::providers::{Format, Toml};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Fabric identifiers given to devices that do not name one.
pub const DEFAULT_FABRIC_ID_BASE: u32 = 0x1000;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeviceDescription {
    pub index: u16,
    pub subdevices: u8,

    /// Package DPA base in GiB.
    pub pkg_offset: u16,

    /// Package DPA size in GiB.
    pub pkg_size: u16,

    #[serde(default)]
    pub fabric_id: Option<u32>,
}

impl DeviceDescription {
    #[must_use]
    pub fn desc(&self) -> DeviceDesc {
        DeviceDesc {
            index: self.index,
            fabric_id: self
                .fabric_id
                .unwrap_or(DEFAULT_FABRIC_ID_BASE + u32::from(self.index)),
            pkg_offset: self.pkg_offset,
            pkg_size: self.pkg_size,
            guids: (0..self.subdevices)
                .map(|sd| guid_of(SubdeviceId::new(self.index, sd)))
                .collect(),
        }
    }
}

/// Both ends of a link as `[device, subdevice, port]`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct LinkDescription {
    pub a: [u16; 3],
    pub b: [u16; 3],
}

fn port_ref(end: [u16; 3]) -> Result<PortRef, ConfigError> {
    let [device, sd, lpn] = end;
    match (u8::try_from(sd), u8::try_from(lpn)) {
        (Ok(sd), Ok(lpn)) => Ok(port(device, sd, lpn)),
        _ => Err(ConfigError(format!("invalid link end {end:?}"))),
    }
}

impl LinkDescription {
    pub fn ends(&self) -> Result<(PortRef, PortRef), ConfigError> {
        Ok((port_ref(self.a)?, port_ref(self.b)?))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FabricDescription {
    #[serde(default)]
    pub devices: Vec<DeviceDescription>,

    #[serde(default)]
    pub links: Vec<LinkDescription>,
}

impl FabricDescription {
    pub fn load(path: &Path) -> Result<FabricDescription, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError(format!(
                "fabric description {} not found",
                path.display()
            )));
        }
        Ok(Figment::from(Toml::file(path)).extract()?)
    }

    pub fn parse(toml: &str) -> Result<FabricDescription, ConfigError> {
        Ok(Figment::from(Toml::string(toml)).extract()?)
    }

    /// Check every link end before anything is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for desc in &self.links {
            let (a, b) = desc.ends()?;
            for end in [a, b] {
                let known = self.devices.iter().any(|d| {
                    d.index == end.sd.device_index() && end.sd.sd_index() < d.subdevices
                });
                if !known {
                    return Err(ConfigError(format!("link to unknown subdevice {}", end.sd)));
                }
            }
            if a == b {
                return Err(ConfigError(format!("{a} linked to itself")));
            }
        }
        Ok(())
    }

    /// Register the devices with `engine` and report every link as up.
    pub fn apply(&self, engine: &RoutingEngine) -> Result<(), ConfigError> {
        self.validate()?;
        let links = self
            .links
            .iter()
            .map(LinkDescription::ends)
            .collect::<Result<Vec<_>, _>>()?;

        for device in &self.devices {
            engine.add_device(&device.desc())?;
        }
        for (a, b) in links {
            link(engine, a, b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_id_defaults_to_index() {
        let device = DeviceDescription {
            index: 3,
            subdevices: 2,
            pkg_offset: 384,
            pkg_size: 112,
            fabric_id: None,
        };
        let desc = device.desc();
        assert_eq!(desc.fabric_id, 0x1003);
        assert_eq!(desc.guids.len(), 2);
    }

    #[test]
    fn link_ends_must_fit() {
        let link = LinkDescription {
            a: [0, 0, 300],
            b: [1, 0, 1],
        };
        assert!(link.ends().is_err());
    }
}
