//! Spatial index over road segments.
//!
//! One bulk-loaded R-tree entry per geometry segment of each compressed
//! edge. Queries run best-first over the tree ordered by distance to the
//! projected point, so candidates stream out nearest-first and iteration
//! stops at the distance cap or the requested count. Coordinates are
//! scaled by cos(latitude) at build time so squared tree distances order
//! like meters.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use rustc_hash::FxHashMap;

use super::phantom::{PhantomCandidate, PhantomEndpoint, SegmentId};
use crate::facade::DataFacade;
use crate::formats::annotations_file::TravelMode;
use crate::geo::{self, Coordinate};
use crate::graph::{NodeId, Weight, INVALID_NODE};

/// Meters per degree of latitude, for converting tree distances.
const METERS_PER_DEGREE: f64 = 111_319.49;

/// One directional road segment in the index. `reverse_node` is the twin
/// search node traversing the same geometry backwards, or `INVALID_NODE`
/// for oneways.
#[derive(Debug, Clone, Copy)]
struct SegmentEntry {
    start: [f64; 2],
    end: [f64; 2],
    forward_node: NodeId,
    reverse_node: NodeId,
    geometry_id: u32,
    position: u16,
}

impl RTreeObject for SegmentEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.start, self.end)
    }
}

impl PointDistance for SegmentEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        // squared distance to the segment, not its bounding box
        let (dx, dy) = (self.end[0] - self.start[0], self.end[1] - self.start[1]);
        let len2 = dx * dx + dy * dy;
        let t = if len2 <= f64::EPSILON {
            0.0
        } else {
            (((point[0] - self.start[0]) * dx + (point[1] - self.start[1]) * dy) / len2)
                .clamp(0.0, 1.0)
        };
        let px = self.start[0] + t * dx - point[0];
        let py = self.start[1] + t * dy - point[1];
        px * px + py * py
    }
}

/// A directional segment reference returned by the box query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSegment {
    pub forward_node: NodeId,
    pub reverse_node: NodeId,
    pub geometry_id: u32,
    pub position: u16,
}

/// Optional filters for a snap query.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapOptions {
    /// Great-circle cap in meters on the snap distance.
    pub max_distance: Option<f64>,
    /// Allowed approach bearing window `(bearing, range)` in degrees.
    pub bearing: Option<(f64, f64)>,
}

pub struct EdgeIndex {
    tree: RTree<SegmentEntry>,
    lat_scale: f64,
}

impl EdgeIndex {
    /// Build the index from a snapshot. Directional twins share a packed
    /// geometry id; within a pair the smaller node id runs the geometry
    /// forward.
    pub fn build(facade: &dyn DataFacade) -> Self {
        let mut groups: FxHashMap<u32, Vec<NodeId>> = FxHashMap::default();
        for node in 0..facade.num_nodes() as NodeId {
            groups.entry(facade.geometry_id_of(node)).or_default().push(node);
        }

        let mut mean_lat = 0.0;
        let mut entries = Vec::new();
        for (geometry_id, mut nodes) in groups {
            nodes.sort_unstable();
            let forward_node = nodes[0];
            let reverse_node = nodes.get(1).copied().unwrap_or(INVALID_NODE);
            let polyline = facade.geometry_nodes(geometry_id);
            for (position, pair) in polyline.windows(2).enumerate() {
                let a = facade.coordinate(pair[0]);
                let b = facade.coordinate(pair[1]);
                mean_lat += a.lat_deg();
                entries.push(SegmentEntry {
                    start: [a.lon_deg(), a.lat_deg()],
                    end: [b.lon_deg(), b.lat_deg()],
                    forward_node,
                    reverse_node,
                    geometry_id,
                    position: position as u16,
                });
            }
        }

        let lat_scale = if entries.is_empty() {
            1.0
        } else {
            (mean_lat / entries.len() as f64).to_radians().cos().max(0.05)
        };
        for entry in &mut entries {
            entry.start[0] *= lat_scale;
            entry.end[0] *= lat_scale;
        }

        Self {
            tree: RTree::bulk_load(entries),
            lat_scale,
        }
    }

    fn scaled(&self, c: Coordinate) -> [f64; 2] {
        [c.lon_deg() * self.lat_scale, c.lat_deg()]
    }

    /// All indexed segments intersecting the bounding box
    /// (south-west, north-east), e.g. for debug rendering.
    pub fn edges_in_box(&self, south_west: Coordinate, north_east: Coordinate) -> Vec<EdgeSegment> {
        let envelope = AABB::from_corners(self.scaled(south_west), self.scaled(north_east));
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| EdgeSegment {
                forward_node: entry.forward_node,
                reverse_node: entry.reverse_node,
                geometry_id: entry.geometry_id,
                position: entry.position,
            })
            .collect()
    }

    /// Up to `max_results` candidates sorted by snap distance. Candidates
    /// at identical distance are ordered by (edge id, direction), forward
    /// before reverse.
    pub fn nearest_phantoms(
        &self,
        facade: &dyn DataFacade,
        input: Coordinate,
        max_results: usize,
        options: SnapOptions,
    ) -> Vec<PhantomCandidate> {
        self.collect(facade, input, options, |found, _| found >= max_results)
    }

    /// All candidates within `max_distance` meters.
    pub fn phantoms_in_range(
        &self,
        facade: &dyn DataFacade,
        input: Coordinate,
        max_distance: f64,
        bearing: Option<(f64, f64)>,
    ) -> Vec<PhantomCandidate> {
        self.collect(
            facade,
            input,
            SnapOptions {
                max_distance: Some(max_distance),
                bearing,
            },
            |_, _| false,
        )
    }

    /// The nearest candidate plus the nearest candidate on a non-tiny
    /// component, which guarantees a routable snap even if the nearest
    /// segment is an island. Falls back to the primary when nothing
    /// better exists.
    pub fn nearest_phantom_with_big_component(
        &self,
        facade: &dyn DataFacade,
        input: Coordinate,
        options: SnapOptions,
    ) -> Option<(PhantomCandidate, PhantomCandidate)> {
        let mut primary: Option<PhantomCandidate> = None;
        let mut big: Option<PhantomCandidate> = None;
        let candidates = self.collect(facade, input, options, |_, last_is_big| {
            // stop once both slots are filled
            last_is_big
        });
        for candidate in candidates {
            if primary.is_none() {
                primary = Some(candidate.clone());
            }
            if big.is_none() && !candidate.phantom.component.is_tiny {
                big = Some(candidate);
                break;
            }
        }
        let primary = primary?;
        let big = big.unwrap_or_else(|| primary.clone());
        Some((primary, big))
    }

    fn collect(
        &self,
        facade: &dyn DataFacade,
        input: Coordinate,
        options: SnapOptions,
        mut done: impl FnMut(usize, bool) -> bool,
    ) -> Vec<PhantomCandidate> {
        let query = self.scaled(input);
        let mut out: Vec<PhantomCandidate> = Vec::new();

        for (entry, distance_2) in self.tree.nearest_neighbor_iter_with_distance_2(&query) {
            // tree distances are scaled degrees; a loose cap avoids
            // scanning the whole tree while exact filtering happens below
            if let Some(cap) = options.max_distance {
                let lower_bound_m = distance_2.sqrt() * METERS_PER_DEGREE;
                if lower_bound_m > cap * 1.5 + 10.0 {
                    break;
                }
            }

            if let Some(candidate) = self.make_candidate(facade, input, entry, options) {
                let is_big = !candidate.phantom.component.is_tiny;
                out.push(candidate);
                if done(out.len(), is_big) {
                    break;
                }
            }
        }

        out.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.phantom.forward_segment.id.cmp(&b.phantom.forward_segment.id))
                .then(a.phantom.fwd_segment_position.cmp(&b.phantom.fwd_segment_position))
        });
        out
    }

    fn make_candidate(
        &self,
        facade: &dyn DataFacade,
        input: Coordinate,
        entry: &SegmentEntry,
        options: SnapOptions,
    ) -> Option<PhantomCandidate> {
        let start = Coordinate::from_degrees(entry.start[0] / self.lat_scale, entry.start[1]);
        let end = Coordinate::from_degrees(entry.end[0] / self.lat_scale, entry.end[1]);
        let (snapped, ratio, distance) = geo::project_onto_segment(input, start, end);

        if let Some(cap) = options.max_distance {
            if distance > cap {
                return None;
            }
        }

        let mut forward_enabled = entry.forward_node != INVALID_NODE
            && facade.travel_mode(entry.forward_node) != TravelMode::INACCESSIBLE;
        let mut reverse_enabled = entry.reverse_node != INVALID_NODE
            && facade.travel_mode(entry.reverse_node) != TravelMode::INACCESSIBLE;

        if let Some((bearing, range)) = options.bearing {
            let segment_bearing = geo::bearing_deg(start, end);
            if !geo::bearing_in_window(segment_bearing, bearing, range) {
                forward_enabled = false;
            }
            if !geo::bearing_in_window(geo::reverse_bearing(segment_bearing), bearing, range) {
                reverse_enabled = false;
            }
        }
        if !forward_enabled && !reverse_enabled {
            return None;
        }

        let weights = facade.geometry_weights(entry.geometry_id);
        let position = entry.position as usize;
        debug_assert!(position + 1 < weights.len().max(2));

        let segment_weight = weights.get(position).copied().unwrap_or(1);
        let forward_offset: Weight = weights[..position].iter().sum();
        let reverse_offset: Weight = weights
            .get(position + 1..weights.len().saturating_sub(1))
            .map(|rest| rest.iter().sum())
            .unwrap_or(0);

        let forward_weight = partial_weight(segment_weight, ratio);
        let reverse_weight = partial_weight(segment_weight, 1.0 - ratio);

        let annotated = if entry.forward_node != INVALID_NODE {
            entry.forward_node
        } else {
            entry.reverse_node
        };

        let phantom = PhantomEndpoint {
            forward_segment: SegmentId {
                id: entry.forward_node,
                enabled: forward_enabled,
            },
            reverse_segment: SegmentId {
                id: entry.reverse_node,
                enabled: reverse_enabled,
            },
            name_id: facade.name_id_of(annotated),
            forward_weight,
            reverse_weight,
            forward_offset,
            reverse_offset,
            packed_geometry_id: entry.geometry_id,
            component: facade.component(annotated),
            location: snapped,
            input_location: input,
            fwd_segment_position: entry.position,
            forward_mode: if entry.forward_node != INVALID_NODE {
                facade.travel_mode(entry.forward_node)
            } else {
                TravelMode::INACCESSIBLE
            },
            backward_mode: if entry.reverse_node != INVALID_NODE {
                facade.travel_mode(entry.reverse_node)
            } else {
                TravelMode::INACCESSIBLE
            },
        };

        Some(PhantomCandidate { phantom, distance })
    }
}

/// Ratio-scaled share of a segment weight, rounded to nearest, and at
/// least 1 whenever a real partial traversal remains.
fn partial_weight(segment_weight: Weight, ratio: f64) -> Weight {
    let scaled = (segment_weight as f64 * ratio).round() as Weight;
    if ratio > 0.0 {
        scaled.max(1)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::linear_facade;

    #[test]
    fn snap_partitions_the_weight_list() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        // a quarter of the way from A to B
        let input = Coordinate::from_degrees(13.38825, 52.5170);
        let candidates = index.nearest_phantoms(&facade, input, 1, SnapOptions::default());
        assert_eq!(candidates.len(), 1);
        let phantom = &candidates[0].phantom;
        assert!(phantom.forward_segment.enabled && phantom.reverse_segment.enabled);
        assert_eq!(
            phantom.forward_weight_plus_offset() + phantom.reverse_weight_plus_offset(),
            5
        );
        assert!(phantom.forward_weight_plus_offset() < phantom.reverse_weight_plus_offset());
    }

    #[test]
    fn bearing_window_disables_directions() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        let input = Coordinate::from_degrees(13.3885, 52.5170);
        // only eastbound approaches allowed: the reverse twin drops out
        let candidates = index.nearest_phantoms(
            &facade,
            input,
            1,
            SnapOptions {
                max_distance: None,
                bearing: Some((90.0, 20.0)),
            },
        );
        assert_eq!(candidates.len(), 1);
        let phantom = &candidates[0].phantom;
        assert!(phantom.forward_segment.enabled);
        assert!(!phantom.reverse_segment.enabled);
    }

    #[test]
    fn range_query_collects_all_nearby_segments() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        // at junction B both road segments are in range
        let input = Coordinate::from_degrees(13.3890, 52.5171);
        let candidates = index.phantoms_in_range(&facade, input, 50.0, None);
        assert_eq!(candidates.len(), 2);
        // sorted by distance, ties by forward node id
        assert!(candidates[0].distance <= candidates[1].distance);
    }

    #[test]
    fn box_query_returns_intersecting_segments() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        let hits = index.edges_in_box(
            Coordinate::from_degrees(13.3879, 52.5169),
            Coordinate::from_degrees(13.3885, 52.5171),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].forward_node, 0);
        assert_eq!(hits[0].reverse_node, 1);
        let empty = index.edges_in_box(
            Coordinate::from_degrees(13.5, 52.6),
            Coordinate::from_degrees(13.6, 52.7),
        );
        assert!(empty.is_empty());
    }

    #[test]
    fn partial_weight_keeps_endpoints_exact() {
        assert_eq!(partial_weight(50, 0.0), 0);
        assert_eq!(partial_weight(50, 1.0), 50);
        assert_eq!(partial_weight(50, 0.5), 25);
        // genuine partials never collapse to zero
        assert_eq!(partial_weight(10, 0.01), 1);
    }
}
