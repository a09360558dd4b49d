//! Bucketed many-to-many table computation.
//!
//! One backward CH sweep per target drops (column, weight) buckets on
//! every settled node; one forward sweep per source then joins its settled
//! nodes against the buckets. The bucket map is built sequentially and
//! shared read-only across the row sweeps, which run in parallel with
//! per-worker scratch heaps.

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::search::{relax_outgoing, stall_at_node};
use crate::facade::DataFacade;
use crate::graph::{NodeId, Weight, INVALID_WEIGHT};
use crate::heap::{with_search_heaps, QueryHeap};
use crate::spatial::PhantomEndpoint;

/// (column, weight from the settled node to that column's target).
#[derive(Debug, Clone, Copy)]
struct NodeBucket {
    column: u32,
    weight: Weight,
}

type BucketMap = FxHashMap<NodeId, Vec<NodeBucket>>;

/// Row-major N x M table of snap-to-snap weights; unreachable cells carry
/// `INVALID_WEIGHT`.
#[derive(Debug, Clone)]
pub struct TableResult {
    pub num_sources: usize,
    pub num_targets: usize,
    pub weights: Vec<Weight>,
}

impl TableResult {
    pub fn get(&self, row: usize, column: usize) -> Weight {
        self.weights[row * self.num_targets + column]
    }
}

pub fn many_to_many(
    facade: &dyn DataFacade,
    sources: &[PhantomEndpoint],
    targets: &[PhantomEndpoint],
) -> TableResult {
    let num_nodes = facade.num_nodes();
    let mut buckets: BucketMap = FxHashMap::default();

    // backward sweeps, one per target column
    with_search_heaps(num_nodes, |heaps| {
        for (column, target) in targets.iter().enumerate() {
            heaps.backward.clear();
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
            backward_sweep(facade, &mut heaps.backward, column as u32, &mut buckets);
        }
    });

    // forward sweeps, one per source row, joined against the buckets
    let rows: Vec<Vec<Weight>> = sources
        .par_iter()
        .map(|source| {
            with_search_heaps(num_nodes, |heaps| {
                heaps.forward.clear();
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
                forward_sweep(facade, &mut heaps.forward, &buckets, targets.len())
            })
        })
        .collect();

    TableResult {
        num_sources: sources.len(),
        num_targets: targets.len(),
        weights: rows.into_iter().flatten().collect(),
    }
}

fn backward_sweep(
    facade: &dyn DataFacade,
    heap: &mut QueryHeap,
    column: u32,
    buckets: &mut BucketMap,
) {
    while let Some(node) = heap.delete_min() {
        let key = heap.key(node);
        buckets
            .entry(node)
            .or_default()
            .push(NodeBucket { column, weight: key });

        if stall_at_node(facade, heap, node, key, false) {
            continue;
        }
        relax_outgoing(facade, heap, node, key, false);
    }
}

fn forward_sweep(
    facade: &dyn DataFacade,
    heap: &mut QueryHeap,
    buckets: &BucketMap,
    num_targets: usize,
) -> Vec<Weight> {
    let mut row = vec![INVALID_WEIGHT; num_targets];

    while let Some(node) = heap.delete_min() {
        let key = heap.key(node);

        if let Some(bucket_list) = buckets.get(&node) {
            for bucket in bucket_list {
                let cell = &mut row[bucket.column as usize];
                let new_weight = key.saturating_add(bucket.weight);
                if new_weight < 0 {
                    // the overshoot artifact: both phantoms on this very
                    // segment with the source past the target. The only
                    // real path stays on the segment around a loop.
                    let loop_weight = facade.loop_weight(node, true);
                    if loop_weight != INVALID_WEIGHT {
                        let with_loop = new_weight.saturating_add(loop_weight);
                        if with_loop >= 0 && with_loop < *cell {
                            *cell = with_loop;
                        }
                    }
                } else if new_weight < *cell {
                    *cell = new_weight;
                }
            }
        }

        if stall_at_node(facade, heap, node, key, true) {
            continue;
        }
        relax_outgoing(facade, heap, node, key, true);
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::{linear_facade, phantom_on_node, square_facade};
    use crate::spatial::{PhantomEndpoint, SegmentId};

    /// Phantom with both directions enabled on a twin segment pair,
    /// snapped at `ratio` of a 5-weight single-segment geometry.
    fn phantom_between(
        forward_node: u32,
        reverse_node: u32,
        ratio: f64,
        facade: &crate::facade::OwnedFacade,
    ) -> PhantomEndpoint {
        let weight = (5.0 * ratio).round() as i32;
        PhantomEndpoint {
            forward_segment: SegmentId { id: forward_node, enabled: true },
            reverse_segment: SegmentId { id: reverse_node, enabled: true },
            forward_weight: weight,
            reverse_weight: 5 - weight,
            forward_offset: 0,
            reverse_offset: 0,
            ..phantom_on_node(facade, forward_node)
        }
    }

    #[test]
    fn linear_three_by_three() {
        let facade = linear_facade();
        let a = phantom_between(0, 1, 0.0, &facade);
        let b = phantom_between(0, 1, 1.0, &facade);
        let c = phantom_between(2, 3, 1.0, &facade);
        let phantoms = [a, b, c];

        let table = many_to_many(&facade, &phantoms, &phantoms);
        let expected = [[0, 5, 10], [5, 0, 5], [10, 5, 0]];
        for row in 0..3 {
            for column in 0..3 {
                assert_eq!(
                    table.get(row, column),
                    expected[row][column],
                    "cell ({}, {})",
                    row,
                    column
                );
            }
        }
    }

    #[test]
    fn unreachable_cells_carry_the_sentinel() {
        let facade = square_facade();
        let source = phantom_on_node(&facade, 3);
        let target = phantom_on_node(&facade, 0);
        let table = many_to_many(&facade, &[source], &[target]);
        assert_eq!(table.get(0, 0), INVALID_WEIGHT);
    }

    #[test]
    fn matrix_agrees_with_point_to_point() {
        use crate::heap::SearchHeaps;
        use crate::routing::search::{shortest_path, SearchLimits};
        use crate::spatial::PhantomPair;

        let facade = square_facade();
        let phantoms: Vec<_> = (0..4).map(|n| phantom_on_node(&facade, n)).collect();
        let table = many_to_many(&facade, &phantoms, &phantoms);

        let mut heaps = SearchHeaps::new(facade.graph.num_nodes());
        for (row, source) in phantoms.iter().enumerate() {
            for (column, target) in phantoms.iter().enumerate() {
                let pair = PhantomPair {
                    source: *source,
                    target: *target,
                };
                match shortest_path(&facade, &mut heaps, &pair, SearchLimits::default()) {
                    Ok(route) => assert_eq!(table.get(row, column), route.weight),
                    Err(_) => assert_eq!(table.get(row, column), INVALID_WEIGHT),
                }
            }
        }
    }
}
