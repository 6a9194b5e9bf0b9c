// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

use crate::fid::MAX_SUBDEVICES;

#[macro_export]
/// Build a [RoutingError] from a message that supports `to_string`
macro_rules! routing_error {
    ($msg:expr) => {
        Err($crate::types::RoutingError($msg.to_string()))
    };
}

/// The `RoutingError` is what should be returned in the case of an error
#[derive(Debug, PartialEq)]
pub struct RoutingError(pub String);

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for RoutingError {}

impl From<std::collections::TryReserveError> for RoutingError {
    fn from(e: std::collections::TryReserveError) -> Self {
        RoutingError(format!("allocation failed: {e}"))
    }
}

/// The RoutingResult is the return type for most routing functions
pub type RoutingResult = Result<(), RoutingError>;

/// Globally unique identifier reported by each subdevice.
pub type Guid = u64;

/// Fabric-wide dense identifier of a subdevice.
///
/// Derived from the device index and the subdevice index within the device,
/// so it never changes while the subdevice exists. It doubles as the
/// subdevice's address group.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubdeviceId(pub u32);

impl SubdeviceId {
    #[must_use]
    pub fn new(device_index: u16, sd_index: u8) -> Self {
        Self(u32::from(device_index) * MAX_SUBDEVICES as u32 + u32::from(sd_index))
    }

    #[must_use]
    pub fn device_index(&self) -> u16 {
        (self.0 / MAX_SUBDEVICES as u32) as u16
    }

    #[must_use]
    pub fn sd_index(&self) -> u8 {
        (self.0 % MAX_SUBDEVICES as u32) as u8
    }
}

impl fmt::Display for SubdeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dev{}_sd{}", self.device_index(), self.sd_index())
    }
}

impl FromStr for SubdeviceId {
    type Err = RoutingError;

    /// Parse the `dev<D>_sd<S>` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RoutingError(format!("invalid subdevice name '{s}'"));
        let (device, sd) = s
            .strip_prefix("dev")
            .and_then(|rest| rest.split_once("_sd"))
            .ok_or_else(invalid)?;
        let device: u16 = device.parse().map_err(|_| invalid())?;
        let sd: u8 = sd.parse().map_err(|_| invalid())?;
        if usize::from(sd) >= MAX_SUBDEVICES {
            return Err(invalid());
        }
        Ok(Self::new(device, sd))
    }
}

/// A port on a specific subdevice.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PortRef {
    pub sd: SubdeviceId,
    pub lpn: u8,
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:p{}", self.sd, self.lpn)
    }
}

/// Routing status of a subdevice.
///
/// A subdevice only leaves `Error` through an explicit reset.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RoutingStatus {
    #[default]
    Valid,
    Error,
}

impl fmt::Display for RoutingStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoutingStatus::Valid => write!(f, "valid"),
            RoutingStatus::Error => write!(f, "error"),
        }
    }
}
