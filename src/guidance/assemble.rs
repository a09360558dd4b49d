//! Leg assembly: turn an unpacked node sequence into flat geometry and an
//! initial step list.
//!
//! The location list starts at the source snap, walks every via node of
//! each traversed segment's packed geometry and ends at the target snap.
//! One step is emitted per traversed node plus the depart/arrive
//! sentinels; post-processing then folds this raw list into something a
//! human wants to hear.

use crate::facade::DataFacade;
use crate::geo::{self, Coordinate};
use crate::graph::{NodeId, Weight};
use crate::guidance::instruction::NO_TURN;
use crate::guidance::step::{
    Intersection, LegGeometry, RouteStep, SegmentAnnotation, StepManeuver, WaypointType, NO_INDEX,
};
use crate::spatial::PhantomEndpoint;

/// A packed polyline in the travel direction of one node.
struct TravelGeometry {
    points: Vec<Coordinate>,
    osm_ids: Vec<u64>,
    /// weights[i] belongs to the segment points[i] -> points[i + 1]
    weights: Vec<Weight>,
    datasources: Vec<u8>,
}

fn travel_geometry(facade: &dyn DataFacade, node: NodeId) -> TravelGeometry {
    let geometry_id = facade.geometry_id_of(node);
    let via = facade.geometry_nodes(geometry_id);
    let mut weights = facade.geometry_weights(geometry_id);
    let mut datasources = facade.geometry_datasources(geometry_id);
    let mut points: Vec<Coordinate> = via.iter().map(|&n| facade.coordinate(n)).collect();
    let mut osm_ids: Vec<u64> = via.iter().map(|&n| facade.osm_node_id(n)).collect();

    if facade.geometry_is_reversed(node) {
        points.reverse();
        osm_ids.reverse();
        // segment i in reverse order is forward segment k-2-i
        weights.pop();
        weights.reverse();
        weights.push(0);
        datasources.pop();
        datasources.reverse();
        datasources.push(0);
    }

    TravelGeometry {
        points,
        osm_ids,
        weights,
        datasources,
    }
}

/// Snap segment index in the travel direction of `node`.
fn travel_position(facade: &dyn DataFacade, node: NodeId, phantom: &PhantomEndpoint) -> usize {
    let segments = facade
        .geometry_nodes(facade.geometry_id_of(node))
        .len()
        .saturating_sub(1);
    let position = phantom.fwd_segment_position as usize;
    if facade.geometry_is_reversed(node) {
        segments.saturating_sub(1).saturating_sub(position)
    } else {
        position
    }
}

/// Weight still to travel inside the snap segment, in travel direction.
fn remaining_partial(facade: &dyn DataFacade, node: NodeId, phantom: &PhantomEndpoint) -> Weight {
    if facade.geometry_is_reversed(node) {
        phantom.forward_weight
    } else {
        phantom.reverse_weight
    }
}

/// Weight already travelled inside the snap segment, in travel direction.
fn covered_partial(facade: &dyn DataFacade, node: NodeId, phantom: &PhantomEndpoint) -> Weight {
    if facade.geometry_is_reversed(node) {
        phantom.reverse_weight
    } else {
        phantom.forward_weight
    }
}

/// Assemble the leg geometry and the raw step list for one unpacked path.
pub fn assemble_leg(
    facade: &dyn DataFacade,
    path: &[NodeId],
    source: &PhantomEndpoint,
    target: &PhantomEndpoint,
) -> (LegGeometry, Vec<RouteStep>) {
    debug_assert!(!path.is_empty());

    let mut geometry = LegGeometry {
        locations: vec![source.location],
        osm_node_ids: vec![u64::MAX],
        ..Default::default()
    };
    // location index where each path node's traversal begins
    let mut maneuver_index = vec![0usize; path.len()];

    for (i, &node) in path.iter().enumerate() {
        let travel = travel_geometry(facade, node);
        let last = i + 1 == path.len();
        if i > 0 {
            maneuver_index[i] = geometry.locations.len() - 1;
        }

        let begin_segment = if i == 0 {
            travel_position(facade, node, source)
        } else {
            0
        };
        let end_segment = if last {
            travel_position(facade, node, target)
        } else {
            travel.points.len().saturating_sub(2)
        };

        // interior points strictly after the entry segment
        for segment in begin_segment..=end_segment {
            let is_first = i == 0 && segment == begin_segment;
            let is_last = last && segment == end_segment;
            let point = if is_last {
                target.location
            } else {
                travel.points[segment + 1]
            };
            let duration = if is_first && is_last {
                (covered_partial(facade, node, target)
                    - covered_partial(facade, node, source))
                .max(0)
            } else if is_first {
                remaining_partial(facade, node, source)
            } else if is_last {
                covered_partial(facade, node, target)
            } else {
                travel.weights[segment]
            };

            let previous = *geometry.locations.last().unwrap();
            geometry.segment_distances.push(geo::haversine_m(previous, point));
            geometry.annotations.push(SegmentAnnotation {
                duration,
                datasource: travel.datasources.get(segment).copied().unwrap_or(0),
            });
            geometry.locations.push(point);
            geometry.osm_node_ids.push(if is_last {
                u64::MAX
            } else {
                travel.osm_ids[segment + 1]
            });
        }
    }

    let steps = assemble_steps(facade, path, target, &geometry, &maneuver_index);
    resync_geometry(&mut geometry, &steps);
    (geometry, steps)
}

fn bearing_at(geometry: &LegGeometry, index: usize) -> (f64, f64) {
    let locations = &geometry.locations;
    let before = if index == 0 {
        0.0
    } else {
        geo::bearing_deg(locations[index - 1], locations[index])
    };
    let after = if index + 1 >= locations.len() {
        0.0
    } else {
        geo::bearing_deg(locations[index], locations[index + 1])
    };
    (before, after)
}

/// Fill the intersection view at a maneuver from the node's bearing and
/// entry classes, falling back to the pair of observed bearings when the
/// class data is empty.
fn intersection_at(
    facade: &dyn DataFacade,
    node: NodeId,
    location: Coordinate,
    bearing_before: f64,
    bearing_after: f64,
) -> Intersection {
    let class_bearings = facade.bearing_class(node);
    let entry_class = facade.entry_class(node);
    let lanes = facade.lane_tuple(node);
    let lane_description = facade.lane_description(lanes.description_id);

    let (bearings, entry): (Vec<i16>, Vec<bool>) = if class_bearings.is_empty() {
        (
            vec![
                geo::reverse_bearing(bearing_before).round() as i16,
                bearing_after.round() as i16,
            ],
            vec![true, true],
        )
    } else {
        let entry = (0..class_bearings.len())
            .map(|i| entry_class.allows(i))
            .collect();
        (class_bearings, entry)
    };

    let closest = |target: f64| -> usize {
        let mut best = 0;
        let mut best_deviation = f64::MAX;
        for (i, &bearing) in bearings.iter().enumerate() {
            let deviation = geo::angular_deviation(f64::from(bearing), target);
            if deviation < best_deviation {
                best_deviation = deviation;
                best = i;
            }
        }
        best
    };

    Intersection {
        location,
        in_index: closest(geo::reverse_bearing(bearing_before)),
        out_index: closest(bearing_after),
        bearings,
        entry,
        lanes,
        lane_description,
    }
}

fn signage(facade: &dyn DataFacade, name_id: u32) -> (String, String, String, String) {
    (
        facade.name(name_id),
        facade.road_ref(name_id),
        facade.pronunciation(name_id),
        facade.destinations(name_id),
    )
}

fn assemble_steps(
    facade: &dyn DataFacade,
    path: &[NodeId],
    target: &PhantomEndpoint,
    geometry: &LegGeometry,
    maneuver_index: &[usize],
) -> Vec<RouteStep> {
    let mut steps = Vec::with_capacity(path.len() + 1);
    let last_location = geometry.locations.len() - 1;

    for (i, &node) in path.iter().enumerate() {
        let begin = maneuver_index[i];
        let end = if i + 1 < path.len() {
            maneuver_index[i + 1] + 1
        } else {
            geometry.locations.len()
        };
        let (bearing_before, bearing_after) = bearing_at(geometry, begin);
        let location = geometry.locations[begin];
        let (name, road_ref, pronunciation, destinations) = signage(facade, facade.name_id_of(node));

        let (instruction, waypoint_type, intersection) = if i == 0 {
            // depart sentinel: a single outgoing road
            (
                NO_TURN,
                WaypointType::Depart,
                Intersection {
                    location,
                    bearings: vec![bearing_after.round() as i16],
                    entry: vec![true],
                    in_index: NO_INDEX,
                    out_index: 0,
                    lanes: Default::default(),
                    lane_description: Vec::new(),
                },
            )
        } else {
            (
                facade.turn_instruction(node),
                WaypointType::None,
                intersection_at(facade, node, location, bearing_before, bearing_after),
            )
        };

        let duration_ds: Weight = geometry.annotations[begin..end - 1]
            .iter()
            .map(|a| a.duration)
            .sum();
        let distance: f64 = geometry.segment_distances[begin..end - 1].iter().sum();

        steps.push(RouteStep {
            name_id: facade.name_id_of(node),
            name,
            road_ref,
            pronunciation,
            destinations,
            rotary_name: String::new(),
            rotary_pronunciation: String::new(),
            duration: f64::from(duration_ds) / 10.0,
            distance,
            mode: facade.travel_mode(node),
            maneuver: StepManeuver {
                location,
                bearing_before: bearing_before.round() as u16 % 360,
                bearing_after: bearing_after.round() as u16 % 360,
                instruction,
                waypoint_type,
                exit: 0,
            },
            geometry_begin: begin,
            geometry_end: end,
            intersections: vec![intersection],
        });
    }

    // arrive sentinel
    let (bearing_before, _) = bearing_at(geometry, last_location);
    let arrive_node = *path.last().unwrap();
    let (name, road_ref, pronunciation, destinations) =
        signage(facade, facade.name_id_of(arrive_node));
    steps.push(RouteStep {
        name_id: facade.name_id_of(arrive_node),
        name,
        road_ref,
        pronunciation,
        destinations,
        rotary_name: String::new(),
        rotary_pronunciation: String::new(),
        duration: 0.0,
        distance: 0.0,
        mode: facade.travel_mode(arrive_node),
        maneuver: StepManeuver {
            location: target.location,
            bearing_before: bearing_before.round() as u16 % 360,
            bearing_after: 0,
            instruction: NO_TURN,
            waypoint_type: WaypointType::Arrive,
            exit: 0,
        },
        geometry_begin: last_location,
        geometry_end: last_location + 1,
        intersections: vec![Intersection {
            location: target.location,
            bearings: vec![geo::reverse_bearing(bearing_before).round() as i16],
            entry: vec![true],
            in_index: 0,
            out_index: NO_INDEX,
            lanes: Default::default(),
            lane_description: Vec::new(),
        }],
    });

    steps
}

/// Rebuild `segment_offsets`/`segment_distances` from the step list: one
/// interval per step, interval end at `geometry_end - 1`.
pub fn resync_geometry(geometry: &mut LegGeometry, steps: &[RouteStep]) {
    geometry.segment_offsets.clear();
    geometry.segment_distances.clear();
    geometry.segment_offsets.push(0);
    for step in steps {
        geometry.segment_distances.push(step.distance);
        geometry.segment_offsets.push(step.geometry_end.saturating_sub(1));
    }
    // drop the arrive interval again
    geometry.segment_offsets.pop();
    geometry.segment_distances.pop();
}
