//! Phantom endpoints: user coordinates snapped onto a road segment.

use serde::{Deserialize, Serialize};

use crate::formats::annotations_file::{SegmentComponent, TravelMode};
use crate::geo::Coordinate;
use crate::graph::{NodeId, Weight, INVALID_NAME_ID, INVALID_NODE};

/// One directional search node of a snapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentId {
    pub id: NodeId,
    pub enabled: bool,
}

impl SegmentId {
    pub const INVALID: SegmentId = SegmentId {
        id: INVALID_NODE,
        enabled: false,
    };
}

/// A routable representation of a coordinate snapped onto an edge. The
/// offset/weight pair partitions the edge's unpacked weight list at the
/// snap point: `offset` covers the full geometry segments before the snap
/// segment, `weight` the partial piece inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhantomEndpoint {
    pub forward_segment: SegmentId,
    pub reverse_segment: SegmentId,
    pub name_id: u32,
    pub forward_weight: Weight,
    pub reverse_weight: Weight,
    pub forward_offset: Weight,
    pub reverse_offset: Weight,
    pub packed_geometry_id: u32,
    pub component: SegmentComponent,
    /// Snapped location on the segment.
    pub location: Coordinate,
    /// The coordinate the caller asked about.
    pub input_location: Coordinate,
    /// Index of the snap segment within the packed geometry.
    pub fwd_segment_position: u16,
    pub forward_mode: TravelMode,
    pub backward_mode: TravelMode,
}

impl PhantomEndpoint {
    /// Weight from the edge start to the snap point. Only meaningful when
    /// the forward segment is enabled; callers check before reading.
    pub fn forward_weight_plus_offset(&self) -> Weight {
        debug_assert!(self.forward_segment.enabled);
        self.forward_offset + self.forward_weight
    }

    /// Weight from the snap point to the edge end, i.e. from the reverse
    /// direction's start.
    pub fn reverse_weight_plus_offset(&self) -> Weight {
        debug_assert!(self.reverse_segment.enabled);
        self.reverse_offset + self.reverse_weight
    }

    pub fn is_bidirected(&self) -> bool {
        self.forward_segment.enabled && self.reverse_segment.enabled
    }

    pub fn is_valid(&self, num_nodes: usize) -> bool {
        self.location.is_valid()
            && ((self.forward_segment.enabled && (self.forward_segment.id as usize) < num_nodes)
                || (self.reverse_segment.enabled
                    && (self.reverse_segment.id as usize) < num_nodes))
            && self.name_id != INVALID_NAME_ID
    }
}

/// Source/target pair driving one search.
#[derive(Debug, Clone, Copy)]
pub struct PhantomPair {
    pub source: PhantomEndpoint,
    pub target: PhantomEndpoint,
}

/// A candidate returned by the spatial query, with its snap distance.
#[derive(Debug, Clone)]
pub struct PhantomCandidate {
    pub phantom: PhantomEndpoint,
    pub distance: f64,
}
