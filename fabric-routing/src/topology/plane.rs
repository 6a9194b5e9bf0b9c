// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Connected components of the fabric and their cost matrices.

use crate::types::{RoutingError, SubdeviceId};

/// Cost between subdevices that cannot reach each other.
pub const ROUTING_COST_INFINITE: u16 = u16::MAX;

/// A maximal set of subdevices connected by one-hop neighbor links.
#[derive(Debug)]
pub struct Plane {
    pub index: usize,

    /// Members in visitation order: position is the per-plane index.
    members: Vec<SubdeviceId>,

    /// Row-major `n * n` matrix indexed by per-plane index. Empty until
    /// costs are computed.
    cost: Vec<u16>,
}

impl Plane {
    /// Allocate an empty plane able to hold `capacity` members.
    pub fn try_new(index: usize, capacity: usize) -> Result<Self, RoutingError> {
        let mut members = Vec::new();
        members.try_reserve(capacity)?;
        Ok(Self {
            index,
            members,
            cost: Vec::new(),
        })
    }

    /// Add a member, returning its per-plane index.
    pub fn push(&mut self, id: SubdeviceId) -> usize {
        self.members.push(id);
        self.members.len() - 1
    }

    #[must_use]
    pub fn members(&self) -> &[SubdeviceId] {
        &self.members
    }

    #[must_use]
    pub fn num_subdevs(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn cost(&self, i: usize, j: usize) -> u16 {
        let n = self.members.len();
        if i >= n || j >= n {
            return ROUTING_COST_INFINITE;
        }
        self.cost
            .get(i * n + j)
            .copied()
            .unwrap_or(ROUTING_COST_INFINITE)
    }

    /// Compute all-pairs shortest-path costs from the one-hop `edges`, given
    /// as pairs of per-plane indices.
    pub fn compute_cost<I>(&mut self, edges: I) -> Result<(), RoutingError>
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let n = self.members.len();
        let mut cost = Vec::new();
        cost.try_reserve_exact(n * n)?;
        cost.resize(n * n, ROUTING_COST_INFINITE);

        for i in 0..n {
            cost[i * n + i] = 0;
        }
        for (i, j) in edges {
            if i < n && j < n && i != j {
                cost[i * n + j] = 1;
            }
        }

        relax(&mut cost, n);
        self.cost = cost;
        Ok(())
    }
}

/// Relax one-hop costs to all-pairs shortest paths (Floyd-Warshall).
///
/// Only the upper triangle is examined; each improvement is mirrored into the
/// lower triangle so the matrix stays symmetric.
fn relax(cost: &mut [u16], n: usize) {
    for k in 0..n {
        for i in 0..n.saturating_sub(1) {
            if i == k {
                continue;
            }
            let ik = cost[i * n + k];
            if ik == ROUTING_COST_INFINITE {
                continue;
            }
            for j in (i + 1)..n {
                if j == k {
                    continue;
                }
                let kj = cost[k * n + j];
                if kj == ROUTING_COST_INFINITE {
                    continue;
                }
                let value = ik.saturating_add(kj);
                if cost[i * n + j] > value {
                    cost[i * n + j] = value;
                    cost[j * n + i] = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_of(n: u32) -> Plane {
        let mut plane = Plane::try_new(0, n as usize).unwrap();
        for id in 0..n {
            plane.push(SubdeviceId(id));
        }
        plane
    }

    fn both_ways(edges: &[(usize, usize)]) -> Vec<(usize, usize)> {
        edges.iter().flat_map(|&(a, b)| [(a, b), (b, a)]).collect()
    }

    #[test]
    fn allocation_failure_is_reported() {
        assert!(Plane::try_new(0, usize::MAX).is_err());
    }

    #[test]
    fn path() {
        let k = 6;
        let mut plane = plane_of(k as u32 + 1);
        let edges: Vec<_> = (0..k).map(|i| (i, i + 1)).collect();
        plane.compute_cost(both_ways(&edges)).unwrap();

        for i in 0..=k {
            for j in 0..=k {
                assert_eq!(plane.cost(i, j), i.abs_diff(j) as u16);
            }
        }
    }

    #[test]
    fn ring() {
        let n = 5;
        let mut plane = plane_of(n as u32);
        let edges: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        plane.compute_cost(both_ways(&edges)).unwrap();

        assert_eq!(plane.cost(0, 2), 2);
        assert_eq!(plane.cost(0, 3), 2);
        assert_eq!(plane.cost(1, 4), 2);
        assert_eq!(plane.cost(4, 0), 1);
    }

    #[test]
    fn disconnected_members_stay_infinite() {
        let mut plane = plane_of(4);
        plane.compute_cost(both_ways(&[(0, 1), (2, 3)])).unwrap();
        assert_eq!(plane.cost(0, 1), 1);
        assert_eq!(plane.cost(0, 2), ROUTING_COST_INFINITE);
        assert_eq!(plane.cost(3, 1), ROUTING_COST_INFINITE);
        assert_eq!(plane.cost(2, 2), 0);
        assert_eq!(plane.cost(0, 9), ROUTING_COST_INFINITE);
    }

    #[test]
    fn symmetric() {
        let mut plane = plane_of(6);
        plane
            .compute_cost(both_ways(&[(0, 3), (3, 5), (5, 1), (1, 4), (4, 2), (0, 2)]))
            .unwrap();
        for i in 0..6 {
            for j in 0..6 {
                assert_eq!(plane.cost(i, j), plane.cost(j, i));
            }
        }
    }
}
