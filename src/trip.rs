//! Trip optimization: visit N snapped waypoints in near-optimal order.
//!
//! Farthest insertion builds the initial tour (the waypoint farthest from
//! the partial tour is inserted where it hurts least), then 2-opt reverses
//! sub-tours until no swap improves the total. Costs come from the
//! many-to-many table; the matrix may be asymmetric, so candidate tours
//! are always re-priced in full.

use crate::graph::INVALID_WEIGHT;
use crate::routing::TableResult;

/// A large finite stand-in for unreachable cells so partial tours stay
/// comparable.
const UNREACHABLE: u64 = u64::MAX / 4;

#[derive(Debug, Clone)]
pub struct TripSolution {
    /// Indices into the waypoint list, in visit order.
    pub order: Vec<usize>,
    /// Total tour weight in deci-seconds.
    pub total_weight: u64,
}

/// Tour shape: closed cycle or open path with pinned endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripKind {
    Roundtrip,
    /// Open path from waypoint 0 to the last waypoint.
    FixedEndpoints,
}

#[inline]
fn cost(table: &TableResult, from: usize, to: usize) -> u64 {
    let w = table.get(from, to);
    if w == INVALID_WEIGHT {
        UNREACHABLE
    } else {
        w as u64
    }
}

fn tour_weight(table: &TableResult, order: &[usize], kind: TripKind) -> u64 {
    let mut total = 0u64;
    for pair in order.windows(2) {
        total = total.saturating_add(cost(table, pair[0], pair[1]));
    }
    if kind == TripKind::Roundtrip && order.len() > 1 {
        total = total.saturating_add(cost(table, *order.last().unwrap(), order[0]));
    }
    total
}

/// Solve the trip over an N x N weight table.
pub fn solve_trip(table: &TableResult, kind: TripKind) -> TripSolution {
    let n = table.num_sources;
    debug_assert_eq!(n, table.num_targets);

    if n <= 2 {
        let order: Vec<usize> = (0..n).collect();
        let total_weight = tour_weight(table, &order, kind);
        return TripSolution {
            order,
            total_weight,
        };
    }

    let order = match kind {
        TripKind::Roundtrip => farthest_insertion(table, None, None),
        TripKind::FixedEndpoints => farthest_insertion(table, Some(0), Some(n - 1)),
    };
    let order = two_opt(table, order, kind);
    let total_weight = tour_weight(table, &order, kind);

    TripSolution {
        order,
        total_weight,
    }
}

/// Build a tour by repeatedly inserting the unvisited waypoint farthest
/// from the tour at its cheapest position. Pinned endpoints are seeded
/// first and never displaced.
fn farthest_insertion(table: &TableResult, start: Option<usize>, end: Option<usize>) -> Vec<usize> {
    let n = table.num_sources;
    let mut in_tour = vec![false; n];
    let mut tour: Vec<usize> = Vec::with_capacity(n);

    match (start, end) {
        (Some(s), Some(e)) if s != e => {
            tour.push(s);
            tour.push(e);
            in_tour[s] = true;
            in_tour[e] = true;
        }
        _ => {
            // seed with the most expensive pair; it has to be bridged anyway
            let mut best = (0, 1);
            let mut best_cost = 0u64;
            for i in 0..n {
                for j in 0..n {
                    if i != j && cost(table, i, j) > best_cost && cost(table, i, j) < UNREACHABLE {
                        best_cost = cost(table, i, j);
                        best = (i, j);
                    }
                }
            }
            tour.push(best.0);
            tour.push(best.1);
            in_tour[best.0] = true;
            in_tour[best.1] = true;
        }
    }

    let pinned_ends = start.is_some() && end.is_some();

    while tour.len() < n {
        // the unvisited waypoint farthest from the current tour
        let mut chosen = usize::MAX;
        let mut chosen_distance = 0u64;
        for candidate in 0..n {
            if in_tour[candidate] {
                continue;
            }
            let distance = tour
                .iter()
                .map(|&t| cost(table, t, candidate).min(cost(table, candidate, t)))
                .min()
                .unwrap_or(UNREACHABLE);
            if chosen == usize::MAX || distance > chosen_distance {
                chosen = candidate;
                chosen_distance = distance;
            }
        }

        // cheapest insertion position; pinned endpoints stay in place
        let first_slot = 1;
        let last_slot = if pinned_ends { tour.len() - 1 } else { tour.len() };
        let mut best_slot = first_slot;
        let mut best_increase = u64::MAX;
        for slot in first_slot..=last_slot {
            let previous = tour[slot - 1];
            let increase = if slot == tour.len() {
                cost(table, previous, chosen)
            } else {
                let next = tour[slot];
                cost(table, previous, chosen)
                    .saturating_add(cost(table, chosen, next))
                    .saturating_sub(cost(table, previous, next))
            };
            if increase < best_increase {
                best_increase = increase;
                best_slot = slot;
            }
        }

        tour.insert(best_slot, chosen);
        in_tour[chosen] = true;
    }

    tour
}

/// Reverse sub-tours while any reversal improves the total weight.
fn two_opt(table: &TableResult, mut order: Vec<usize>, kind: TripKind) -> Vec<usize> {
    let n = order.len();
    if n < 4 {
        return order;
    }
    // pinned endpoints are excluded from reversal on open paths
    let (lo, hi) = match kind {
        TripKind::Roundtrip => (1, n - 1),
        TripKind::FixedEndpoints => (1, n - 2),
    };

    let mut best_weight = tour_weight(table, &order, kind);
    let mut improved = true;
    while improved {
        improved = false;
        for i in lo..hi {
            for j in (i + 1)..=hi {
                order[i..=j].reverse();
                let candidate_weight = tour_weight(table, &order, kind);
                if candidate_weight < best_weight {
                    best_weight = candidate_weight;
                    improved = true;
                } else {
                    order[i..=j].reverse();
                }
            }
        }
    }
    order
}
