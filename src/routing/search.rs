//! Bidirectional contraction-hierarchy search.
//!
//! Both frontiers run Dijkstra over the upward graph (direction flags
//! encode which endpoint stores the edge), with stall-on-demand pruning.
//! Phantom seeds are credited with the partial-edge weight: the forward
//! heap starts at minus the source's weight-to-snap, the backward heap at
//! plus the target's, so the meeting sum is exactly the snap-to-snap
//! weight. The search stops once the two frontiers' minimum keys together
//! exceed the best meeting weight.

use crate::error::{EngineError, EngineResult};
use crate::facade::DataFacade;
use crate::graph::{NodeId, Weight, INVALID_EDGE, INVALID_WEIGHT};
use crate::heap::{QueryHeap, SearchHeaps};
use crate::spatial::PhantomPair;

/// Per-request search limits. `max_settled` is the deadline surrogate:
/// exceeding it aborts the request instead of burning the worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchLimits {
    pub max_settled: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    /// Snap-to-snap weight in deci-seconds.
    pub weight: Weight,
    /// Unpacked edge-based node sequence, seeds inclusive.
    pub path: Vec<NodeId>,
}

/// Point-to-point query between two phantom endpoints.
pub fn shortest_path(
    facade: &dyn DataFacade,
    heaps: &mut SearchHeaps,
    pair: &PhantomPair,
    limits: SearchLimits,
) -> EngineResult<RouteResult> {
    heaps.forward.clear();
    heaps.backward.clear();

    let source = &pair.source;
    let target = &pair.target;

    if source.forward_segment.enabled {
        heaps.forward.insert(
            source.forward_segment.id,
            -source.forward_weight_plus_offset(),
            source.forward_segment.id,
        );
    }
    if source.reverse_segment.enabled {
        heaps.forward.insert(
            source.reverse_segment.id,
            -source.reverse_weight_plus_offset(),
            source.reverse_segment.id,
        );
    }
    if target.forward_segment.enabled {
        heaps.backward.insert(
            target.forward_segment.id,
            target.forward_weight_plus_offset(),
            target.forward_segment.id,
        );
    }
    if target.reverse_segment.enabled {
        heaps.backward.insert(
            target.reverse_segment.id,
            target.reverse_weight_plus_offset(),
            target.reverse_segment.id,
        );
    }

    // Snapping both ends onto one segment with the source past the target
    // makes the trivial seed meeting invalid; the route must loop through
    // the graph instead. Collect the nodes whose seed meeting is blocked.
    let mut blocked_seeds: [NodeId; 2] = [crate::graph::INVALID_NODE; 2];
    if source.forward_segment.enabled
        && target.forward_segment.enabled
        && source.forward_segment.id == target.forward_segment.id
        && source.forward_weight_plus_offset() > target.forward_weight_plus_offset()
    {
        blocked_seeds[0] = source.forward_segment.id;
    }
    if source.reverse_segment.enabled
        && target.reverse_segment.enabled
        && source.reverse_segment.id == target.reverse_segment.id
        && source.reverse_weight_plus_offset() > target.reverse_weight_plus_offset()
    {
        blocked_seeds[1] = source.reverse_segment.id;
    }

    let mut best: i64 = i64::from(INVALID_WEIGHT);
    let mut meeting_node = crate::graph::INVALID_NODE;
    let mut settled = 0usize;

    // Keys in either heap never drop below that heap's most negative
    // seed; the termination bound must credit the other frontier's floor
    // or a late meeting through a negative seed would be cut off.
    let seed_floor = |heap: &QueryHeap, segments: [&crate::spatial::SegmentId; 2]| -> i64 {
        let mut floor = 0i64;
        for segment in segments {
            if segment.enabled && heap.was_inserted(segment.id) {
                floor = floor.min(i64::from(heap.key(segment.id)));
            }
        }
        floor
    };
    let forward_floor = seed_floor(
        &heaps.forward,
        [&source.forward_segment, &source.reverse_segment],
    );
    let backward_floor = seed_floor(
        &heaps.backward,
        [&target.forward_segment, &target.reverse_segment],
    );

    loop {
        let forward_min = heaps.forward.min_key();
        let backward_min = heaps.backward.min_key();
        if forward_min.is_none() && backward_min.is_none() {
            break;
        }
        if best < i64::from(INVALID_WEIGHT) {
            let forward_exhausted =
                forward_min.map_or(true, |m| i64::from(m) + backward_floor > best);
            let backward_exhausted =
                backward_min.map_or(true, |m| i64::from(m) + forward_floor > best);
            if forward_exhausted && backward_exhausted {
                break;
            }
        }

        if forward_min.is_some() {
            routing_step(
                facade,
                heaps,
                true,
                &blocked_seeds,
                &mut best,
                &mut meeting_node,
            );
            settled += 1;
        }
        if backward_min.is_some() {
            routing_step(
                facade,
                heaps,
                false,
                &blocked_seeds,
                &mut best,
                &mut meeting_node,
            );
            settled += 1;
        }

        if let Some(budget) = limits.max_settled {
            if settled > budget {
                return Err(EngineError::ResourceExhaustion(format!(
                    "search budget of {} settled nodes exceeded",
                    budget
                )));
            }
        }
    }

    if best >= i64::from(INVALID_WEIGHT) {
        return Err(EngineError::NoRoute);
    }

    let path = unpack_meeting(facade, heaps, meeting_node);
    Ok(RouteResult {
        weight: best as Weight,
        path,
    })
}

fn routing_step(
    facade: &dyn DataFacade,
    heaps: &mut SearchHeaps,
    forward_direction: bool,
    blocked_seeds: &[NodeId; 2],
    best: &mut i64,
    meeting_node: &mut NodeId,
) {
    let (node, key) = {
        let heap = direction_heap(heaps, forward_direction);
        match heap.delete_min() {
            Some(node) => (node, heap.key(node)),
            None => return,
        }
    };

    let other_key = {
        let other = direction_heap(heaps, !forward_direction);
        if other.was_inserted(node) {
            Some(other.key(node))
        } else {
            None
        }
    };
    if let Some(other_key) = other_key {
        let sum = i64::from(key) + i64::from(other_key);
        let blocked = blocked_seeds.contains(&node) && both_still_seeded(heaps, node);
        // a negative sum is the seed artifact of a backwards on-edge hop
        if sum >= 0 && sum < *best && !blocked {
            *best = sum;
            *meeting_node = node;
        }
    }

    let heap = direction_heap(heaps, forward_direction);
    if stall_at_node(facade, heap, node, key, forward_direction) {
        return;
    }
    relax_outgoing(facade, heap, node, key, forward_direction);
}

fn direction_heap(heaps: &mut SearchHeaps, forward_direction: bool) -> &mut QueryHeap {
    if forward_direction {
        &mut heaps.forward
    } else {
        &mut heaps.backward
    }
}

/// True while `node` carries its seed key in both heaps, i.e. no real
/// traversal has reached it yet.
fn both_still_seeded(heaps: &SearchHeaps, node: NodeId) -> bool {
    heaps.forward.was_inserted(node)
        && heaps.forward.parent(node) == node
        && heaps.backward.was_inserted(node)
        && heaps.backward.parent(node) == node
}

/// Stall-on-demand: if a reverse-direction edge proves a strictly better
/// key for `node`, settling it now cannot be optimal; skip relaxation.
pub(crate) fn stall_at_node(
    facade: &dyn DataFacade,
    heap: &QueryHeap,
    node: NodeId,
    key: Weight,
    forward_direction: bool,
) -> bool {
    for edge in facade.edge_range(node) {
        let data = facade.edge_data(edge);
        let reverse_flag = if forward_direction {
            data.backward
        } else {
            data.forward
        };
        if !reverse_flag {
            continue;
        }
        let to = facade.target(edge);
        debug_assert!(data.weight > 0, "edge weight invalid");
        if heap.was_inserted(to)
            && i64::from(heap.key(to)) + i64::from(data.weight) < i64::from(key)
        {
            return true;
        }
    }
    false
}

pub(crate) fn relax_outgoing(
    facade: &dyn DataFacade,
    heap: &mut QueryHeap,
    node: NodeId,
    key: Weight,
    forward_direction: bool,
) {
    let in_core = facade.is_core_node(node);
    for edge in facade.edge_range(node) {
        let data = facade.edge_data(edge);
        let direction_flag = if forward_direction {
            data.forward
        } else {
            data.backward
        };
        if !direction_flag {
            continue;
        }
        let to = facade.target(edge);
        // core-restricted search never descends out of the core
        if in_core && !facade.is_core_node(to) {
            continue;
        }
        debug_assert!(data.weight > 0, "edge weight invalid");
        let to_key = key.saturating_add(data.weight);
        if !heap.was_inserted(to) {
            heap.insert(to, to_key, node);
        } else if to_key < heap.key(to) {
            heap.decrease_key(to, to_key, node);
        }
    }
}

/// Rebuild the edge-based node sequence through the meeting node,
/// expanding shortcuts recursively.
fn unpack_meeting(facade: &dyn DataFacade, heaps: &SearchHeaps, meeting: NodeId) -> Vec<NodeId> {
    // packed chain: forward seed -> meeting
    let mut packed = Vec::new();
    let mut cursor = meeting;
    loop {
        packed.push(cursor);
        let parent = heaps.forward.parent(cursor);
        if parent == cursor {
            break;
        }
        cursor = parent;
    }
    packed.reverse();

    // meeting -> target seed
    cursor = meeting;
    loop {
        let parent = heaps.backward.parent(cursor);
        if parent == cursor {
            break;
        }
        packed.push(parent);
        cursor = parent;
    }

    let mut path = vec![packed[0]];
    for pair in packed.windows(2) {
        unpack_edge(facade, pair[0], pair[1], 0, &mut path);
    }
    path
}

/// Expand the edge `u -> v` into `path`, recursing through shortcut
/// middles. The middle always has lower rank, so depth is bounded by the
/// hierarchy height.
pub(crate) fn unpack_edge(
    facade: &dyn DataFacade,
    u: NodeId,
    v: NodeId,
    depth: usize,
    path: &mut Vec<NodeId>,
) {
    debug_assert!(depth < 64, "shortcut recursion exceeds hierarchy height");

    let graph = facade.graph();
    let mut edge = graph.find_smallest_edge(u, v, |d| d.forward);
    if edge == INVALID_EDGE {
        edge = graph.find_smallest_edge(v, u, |d| d.backward);
    }
    debug_assert_ne!(edge, INVALID_EDGE, "packed path edge missing");
    if edge == INVALID_EDGE {
        path.push(v);
        return;
    }

    let data = facade.edge_data(edge);
    if data.shortcut {
        unpack_edge(facade, u, data.middle, depth + 1, path);
        unpack_edge(facade, data.middle, v, depth + 1, path);
    } else {
        path.push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::{phantom_on_node, square_facade};
    use crate::heap::SearchHeaps;

    #[test]
    fn square_route_takes_the_short_side() {
        // 0->1->2->3 beats the direct 0->3 (10+10+10 < 40)
        let facade = square_facade();
        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        let pair = PhantomPair {
            source: phantom_on_node(&facade, 0),
            target: phantom_on_node(&facade, 3),
        };
        let result = shortest_path(&facade, &mut heaps, &pair, SearchLimits::default()).unwrap();
        assert_eq!(result.weight, 30);
        assert_eq!(result.path, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unpacked_weight_matches_meeting_sum() {
        let facade = square_facade();
        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        let pair = PhantomPair {
            source: phantom_on_node(&facade, 0),
            target: phantom_on_node(&facade, 3),
        };
        let result = shortest_path(&facade, &mut heaps, &pair, SearchLimits::default()).unwrap();
        let mut recomputed = 0;
        for pair in result.path.windows(2) {
            let edge = facade
                .graph
                .find_smallest_edge(pair[0], pair[1], |d| d.forward && !d.shortcut);
            recomputed += facade.graph.data(edge).weight;
        }
        assert_eq!(recomputed, result.weight);
    }

    #[test]
    fn shortcut_unpacks_to_original_nodes() {
        let facade = square_facade();
        // the fixture contains a shortcut 0 -> 2 via 1
        let mut path = vec![0];
        unpack_edge(&facade, 0, 2, 0, &mut path);
        assert_eq!(path, vec![0, 1, 2]);
    }

    #[test]
    fn depleted_heaps_mean_no_route() {
        let facade = square_facade();
        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        // backwards against the oneway ring
        let pair = PhantomPair {
            source: phantom_on_node(&facade, 3),
            target: phantom_on_node(&facade, 0),
        };
        let result = shortest_path(&facade, &mut heaps, &pair, SearchLimits::default());
        assert!(matches!(result, Err(EngineError::NoRoute)));
    }

    #[test]
    fn settled_node_budget_aborts() {
        let facade = square_facade();
        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        let pair = PhantomPair {
            source: phantom_on_node(&facade, 0),
            target: phantom_on_node(&facade, 3),
        };
        let result = shortest_path(
            &facade,
            &mut heaps,
            &pair,
            SearchLimits {
                max_settled: Some(1),
            },
        );
        assert!(matches!(result, Err(EngineError::ResourceExhaustion(_))));
    }

    #[test]
    fn same_segment_overshoot_forces_a_loop() {
        use crate::spatial::{PhantomEndpoint, SegmentId};
        let facade = square_facade();
        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        // both phantoms on node 0's segment, source past the target; the
        // oneway square offers no way back, so there is no route
        let base = phantom_on_node(&facade, 0);
        let source = PhantomEndpoint {
            forward_offset: 8,
            ..base
        };
        let target = PhantomEndpoint {
            forward_segment: SegmentId { id: 0, enabled: true },
            forward_offset: 2,
            ..base
        };
        let result = shortest_path(
            &facade,
            &mut heaps,
            &PhantomPair { source, target },
            SearchLimits::default(),
        );
        assert!(matches!(result, Err(EngineError::NoRoute)));
    }
}
