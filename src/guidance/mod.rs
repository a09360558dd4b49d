//! Turn-by-turn guidance: leg assembly and step post-processing.

pub mod assemble;
pub mod instruction;
pub mod post_process;
pub mod step;

pub use step::{Intersection, LegGeometry, RouteStep, StepManeuver, WaypointType};

use crate::facade::DataFacade;
use crate::graph::NodeId;
use crate::spatial::PhantomEndpoint;

/// Full guidance pipeline for one leg: assemble the raw steps, accumulate
/// roundabouts, collapse micro-maneuvers, clean lanes, build passed-through
/// intersections, trim zero-length ends, assign relative depart/arrive
/// modifiers and resync the geometry partition.
pub fn guided_leg(
    facade: &dyn DataFacade,
    path: &[NodeId],
    source: &PhantomEndpoint,
    target: &PhantomEndpoint,
) -> (LegGeometry, Vec<RouteStep>) {
    let (mut geometry, steps) = assemble::assemble_leg(facade, path, source, target);
    let steps = post_process::process_roundabouts(steps);
    let steps = post_process::collapse_turns(steps);
    let steps = post_process::collapse_use_lane(steps);
    let mut steps = post_process::build_intersections(steps);
    post_process::trim_short_segments(&mut steps, &mut geometry);
    let steps = post_process::assign_relative_locations(steps, &geometry, source, target);
    assemble::resync_geometry(&mut geometry, &steps);
    (geometry, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::linear_facade;
    use crate::geo::Coordinate;
    use crate::spatial::{EdgeIndex, SnapOptions};

    #[test]
    fn pipeline_produces_depart_and_arrive() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        let snap = |lon: f64, lat: f64| {
            index
                .nearest_phantoms(
                    &facade,
                    Coordinate::from_degrees(lon, lat),
                    1,
                    SnapOptions::default(),
                )
                .pop()
                .unwrap()
                .phantom
        };
        let source = snap(13.3881, 52.5170);
        let target = snap(13.3899, 52.5170);

        let (geometry, steps) = guided_leg(&facade, &[0, 2], &source, &target);
        assert!(steps.len() >= 2);
        assert_eq!(steps[0].maneuver.waypoint_type, WaypointType::Depart);
        assert_eq!(
            steps.last().unwrap().maneuver.waypoint_type,
            WaypointType::Arrive
        );
        // geometry partition stays in sync with the final step list
        assert_eq!(geometry.segment_offsets.len(), steps.len());
    }

    #[test]
    fn pipeline_is_idempotent_on_steps() {
        let facade = linear_facade();
        let index = EdgeIndex::build(&facade);
        let snap = |lon: f64, lat: f64| {
            index
                .nearest_phantoms(
                    &facade,
                    Coordinate::from_degrees(lon, lat),
                    1,
                    SnapOptions::default(),
                )
                .pop()
                .unwrap()
                .phantom
        };
        let source = snap(13.3881, 52.5170);
        let target = snap(13.3899, 52.5170);

        let (_, steps) = guided_leg(&facade, &[0, 2], &source, &target);
        let again = post_process::collapse_turns(steps.clone());
        assert_eq!(steps.len(), again.len());
        for (a, b) in steps.iter().zip(again.iter()) {
            assert_eq!(a.maneuver.instruction, b.maneuver.instruction);
        }
    }
}
