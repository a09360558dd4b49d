//! Route steps, maneuvers and leg geometry.
//!
//! A step describes the segment after its maneuver: depart covers the
//! first segment with the maneuver at the snap location, arrive sits on
//! the final location and covers nothing. `geometry_begin`/`geometry_end`
//! index into the leg's location list; consecutive steps overlap by one
//! location (the maneuver point).

use serde::Serialize;

use crate::formats::annotations_file::TravelMode;
use crate::formats::lanes_file::LaneTuple;
use crate::geo::Coordinate;
use crate::graph::Weight;
use crate::guidance::instruction::{TurnInstruction, NO_TURN};

pub const NO_INDEX: usize = usize::MAX;

/// An intersection passed along a step. `bearings` are the outgoing road
/// bearings; `entry` flags which of them may legally be entered; `in_index`
/// and `out_index` select the arriving and leaving road (`NO_INDEX` on the
/// depart/arrive sentinels).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intersection {
    pub location: Coordinate,
    pub bearings: Vec<i16>,
    pub entry: Vec<bool>,
    #[serde(rename = "in")]
    pub in_index: usize,
    #[serde(rename = "out")]
    pub out_index: usize,
    #[serde(skip_serializing_if = "LaneTuple::is_empty")]
    pub lanes: LaneTuple,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lane_description: Vec<u16>,
}

impl Intersection {
    pub fn invalid() -> Self {
        Self {
            location: Coordinate::new(0, 0),
            bearings: Vec::new(),
            entry: Vec::new(),
            in_index: NO_INDEX,
            out_index: NO_INDEX,
            lanes: LaneTuple::default(),
            lane_description: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointType {
    None,
    Depart,
    Arrive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepManeuver {
    pub location: Coordinate,
    pub bearing_before: u16,
    pub bearing_after: u16,
    pub instruction: TurnInstruction,
    pub waypoint_type: WaypointType,
    /// Roundabout exit counter, accumulated by post-processing.
    pub exit: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStep {
    pub name_id: u32,
    pub name: String,
    #[serde(rename = "ref")]
    pub road_ref: String,
    pub pronunciation: String,
    pub destinations: String,
    pub rotary_name: String,
    pub rotary_pronunciation: String,
    /// Seconds.
    pub duration: f64,
    /// Meters.
    pub distance: f64,
    pub mode: TravelMode,
    pub maneuver: StepManeuver,
    pub geometry_begin: usize,
    pub geometry_end: usize,
    pub intersections: Vec<Intersection>,
}

impl RouteStep {
    /// The neutral step used to blank out collapsed entries until the
    /// removal sweep.
    pub fn invalid() -> Self {
        Self {
            name_id: crate::graph::INVALID_NAME_ID,
            name: String::new(),
            road_ref: String::new(),
            pronunciation: String::new(),
            destinations: String::new(),
            rotary_name: String::new(),
            rotary_pronunciation: String::new(),
            duration: 0.0,
            distance: 0.0,
            mode: TravelMode::INACCESSIBLE,
            maneuver: StepManeuver {
                location: Coordinate::new(0, 0),
                bearing_before: 0,
                bearing_after: 0,
                instruction: NO_TURN,
                waypoint_type: WaypointType::None,
                exit: 0,
            },
            geometry_begin: 0,
            geometry_end: 0,
            intersections: vec![Intersection::invalid()],
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.maneuver.instruction == NO_TURN && self.maneuver.waypoint_type == WaypointType::None
    }
}

/// Per-segment metadata parallel to `LegGeometry::locations` (one entry
/// per location pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentAnnotation {
    /// Deci-seconds to traverse the segment.
    pub duration: Weight,
    pub datasource: u8,
}

/// Flat per-leg geometry. `segment_offsets` partitions `locations` into
/// one interval per step and is kept in sync by the resync stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LegGeometry {
    pub locations: Vec<Coordinate>,
    pub osm_node_ids: Vec<u64>,
    pub segment_distances: Vec<f64>,
    pub segment_offsets: Vec<usize>,
    pub annotations: Vec<SegmentAnnotation>,
}

impl LegGeometry {
    pub fn total_distance(&self) -> f64 {
        self.locations
            .windows(2)
            .map(|pair| crate::geo::haversine_m(pair[0], pair[1]))
            .sum()
    }
}
