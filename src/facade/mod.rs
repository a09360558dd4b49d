//! Read-only view over one graph snapshot.
//!
//! Every accessor is referentially transparent for the life of the
//! snapshot; the engine holds the facade behind a shared reference and
//! never observes mutation. Two implementations share the contract:
//! [`OwnedFacade`] parses all artifacts into memory, [`MappedFacade`]
//! keeps the large flat tables (coordinates, geometry, names,
//! annotations) memory-mapped and decodes records on access.

pub mod mapped;
pub mod owned;
#[cfg(test)]
pub mod tests_support;

pub use mapped::MappedFacade;
pub use owned::OwnedFacade;

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

use crate::formats::annotations_file::{SegmentComponent, TravelMode};
use crate::formats::classes_file::EntryClass;
use crate::formats::lanes_file::LaneTuple;
use crate::geo::Coordinate;
use crate::graph::{EdgeData, EdgeId, NodeId, StaticGraph, Weight};
use crate::guidance::instruction::TurnInstruction;

pub trait DataFacade: Send + Sync {
    // -- graph topology ---------------------------------------------------

    fn graph(&self) -> &StaticGraph;

    fn num_nodes(&self) -> usize {
        self.graph().num_nodes()
    }

    fn num_edges(&self) -> usize {
        self.graph().num_edges()
    }

    fn target(&self, edge: EdgeId) -> NodeId {
        self.graph().target(edge)
    }

    fn edge_data(&self, edge: EdgeId) -> EdgeData {
        *self.graph().data(edge)
    }

    fn begin_edges(&self, node: NodeId) -> EdgeId {
        self.graph().begin_edges(node)
    }

    fn end_edges(&self, node: NodeId) -> EdgeId {
        self.graph().end_edges(node)
    }

    fn edge_range(&self, node: NodeId) -> std::ops::Range<EdgeId> {
        self.graph().edge_range(node)
    }

    fn find_edge(&self, u: NodeId, v: NodeId) -> EdgeId {
        self.graph().find_edge(u, v)
    }

    fn find_edge_in_either_direction(&self, u: NodeId, v: NodeId) -> (EdgeId, bool) {
        self.graph().find_edge_in_either_direction(u, v)
    }

    fn loop_weight(&self, node: NodeId, forward: bool) -> Weight {
        self.graph().loop_weight(node, forward)
    }

    fn is_core_node(&self, node: NodeId) -> bool;

    /// Number of nodes inside the retained core.
    fn core_size(&self) -> usize;

    // -- per-node tables --------------------------------------------------

    fn coordinate(&self, node: NodeId) -> Coordinate;

    fn osm_node_id(&self, node: NodeId) -> u64;

    fn turn_instruction(&self, node: NodeId) -> TurnInstruction;

    fn travel_mode(&self, node: NodeId) -> TravelMode;

    fn name_id_of(&self, node: NodeId) -> u32;

    fn geometry_id_of(&self, node: NodeId) -> u32;

    fn component(&self, node: NodeId) -> SegmentComponent;

    fn bearing_class(&self, node: NodeId) -> Vec<i16>;

    fn entry_class(&self, node: NodeId) -> EntryClass;

    fn lane_tuple(&self, node: NodeId) -> LaneTuple;

    fn lane_description(&self, description_id: u16) -> Vec<u16>;

    // -- compressed geometry ----------------------------------------------

    /// Whether `node` traverses its packed geometry opposite to the
    /// stored order (it is the reverse twin of a bidirectional segment).
    fn geometry_is_reversed(&self, node: NodeId) -> bool;

    /// Via nodes of the original polyline folded into `geometry_id`.
    fn geometry_nodes(&self, geometry_id: u32) -> Vec<NodeId>;

    /// Per-segment weights of the polyline, parallel to `geometry_nodes`.
    fn geometry_weights(&self, geometry_id: u32) -> Vec<Weight>;

    fn geometry_datasources(&self, geometry_id: u32) -> Vec<u8>;

    // -- signage ----------------------------------------------------------

    fn name(&self, name_id: u32) -> String;

    fn destinations(&self, name_id: u32) -> String {
        self.name(name_id.wrapping_add(1))
    }

    fn pronunciation(&self, name_id: u32) -> String {
        self.name(name_id.wrapping_add(2))
    }

    fn road_ref(&self, name_id: u32) -> String {
        self.name(name_id.wrapping_add(3))
    }

    // -- snapshot identity ------------------------------------------------

    /// Folded checksum of the search graph; hints carry it to detect
    /// stale snapshots.
    fn checksum(&self) -> u32;

    fn timestamp(&self) -> String;
}

/// Mark the reverse twin of every bidirectional segment: within a shared
/// packed geometry, the smaller node id runs the stored order and the
/// larger one runs it backwards.
pub(crate) fn compute_geometry_reversed(
    geometry_ids: impl Iterator<Item = u32> + Clone,
) -> Vec<bool> {
    let mut first_of: FxHashMap<u32, u32> = FxHashMap::default();
    for (node, geometry_id) in geometry_ids.clone().enumerate() {
        first_of.entry(geometry_id).or_insert(node as u32);
    }
    geometry_ids
        .enumerate()
        .map(|(node, geometry_id)| first_of[&geometry_id] != node as u32)
        .collect()
}

/// File layout of one snapshot: `<base>.hsgr`, `<base>.nodes`, ...
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    base: PathBuf,
}

impl ArtifactPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push('.');
        name.push_str(suffix);
        self.base.with_file_name(name)
    }

    pub fn hsgr(&self) -> PathBuf {
        self.with_suffix("hsgr")
    }

    pub fn nodes(&self) -> PathBuf {
        self.with_suffix("nodes")
    }

    pub fn geometry(&self) -> PathBuf {
        self.with_suffix("geometry")
    }

    pub fn names(&self) -> PathBuf {
        self.with_suffix("names")
    }

    pub fn annotations(&self) -> PathBuf {
        self.with_suffix("annotations")
    }

    pub fn classes(&self) -> PathBuf {
        self.with_suffix("classes")
    }

    pub fn lanes(&self) -> PathBuf {
        self.with_suffix("lanes")
    }

    pub fn restrictions(&self) -> PathBuf {
        self.with_suffix("restrictions")
    }

    pub fn timestamp(&self) -> PathBuf {
        self.with_suffix("timestamp")
    }

    pub fn exists(&self) -> bool {
        self.hsgr().exists()
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_append_suffixes() {
        let paths = ArtifactPaths::new("/data/germany");
        assert_eq!(paths.hsgr(), PathBuf::from("/data/germany.hsgr"));
        assert_eq!(paths.timestamp(), PathBuf::from("/data/germany.timestamp"));
    }
}
