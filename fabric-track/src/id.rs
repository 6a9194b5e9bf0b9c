// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Unique identifiers given to every tracked [`Entity`](crate::entity::Entity).

/// Identifiers that are unique across the fabric.
///
/// Each _log_ event is tagged with the ID of the entity that emitted it. There
/// are two reserved values: [NO_ID](crate::NO_ID) and [ROOT](crate::ROOT).
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Id(pub u64);

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
