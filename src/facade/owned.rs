//! In-process facade: all artifacts parsed into memory.

use anyhow::{ensure, Context, Result};

use super::{ArtifactPaths, DataFacade};
use crate::formats::annotations_file::{NodeAnnotation, SegmentComponent, TravelMode};
use crate::formats::classes_file::EntryClass;
use crate::formats::lanes_file::LaneTuple;
use crate::formats::{
    crc, AnnotationsFile, ClassesFile, GeometryFile, GraphFile, LanesFile, NamesFile, NodesFile,
    TimestampFile,
};
use crate::geo::Coordinate;
use crate::graph::{NodeId, StaticGraph, Weight};
use crate::guidance::instruction::TurnInstruction;

pub struct OwnedFacade {
    pub graph: StaticGraph,
    pub core: Vec<bool>,
    pub nodes: NodesFile,
    pub geometry: GeometryFile,
    pub names: NamesFile,
    pub annotations: Vec<NodeAnnotation>,
    pub classes: ClassesFile,
    pub lanes: LanesFile,
    pub geometry_reversed: Vec<bool>,
    pub checksum: u32,
    pub timestamp: String,
}

impl OwnedFacade {
    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let graph_file =
            GraphFile::read(&paths.hsgr()).context("loading contracted search graph")?;
        let nodes = NodesFile::read(&paths.nodes()).context("loading coordinate table")?;
        let geometry = GeometryFile::read(&paths.geometry()).context("loading geometry table")?;
        let names = NamesFile::read(&paths.names()).context("loading name table")?;
        let annotations =
            AnnotationsFile::read(&paths.annotations()).context("loading node annotations")?;
        let classes =
            ClassesFile::read(&paths.classes()).context("loading intersection classes")?;
        let lanes = LanesFile::read(&paths.lanes()).context("loading turn lanes")?;
        let timestamp = TimestampFile::read(&paths.timestamp())
            .map(|t| t.timestamp)
            .unwrap_or_else(|_| "n/a".to_string());

        let num_nodes = graph_file.graph.num_nodes();
        ensure!(
            annotations.annotations.len() == num_nodes,
            "annotations table must cover every search node"
        );
        ensure!(
            nodes.nodes.len() >= num_nodes,
            "coordinate table shorter than the search graph"
        );

        tracing::info!(
            nodes = num_nodes,
            edges = graph_file.graph.num_edges(),
            timestamp = %timestamp,
            "snapshot loaded in-process"
        );

        let geometry_reversed = super::compute_geometry_reversed(
            annotations.annotations.iter().map(|a| a.geometry_id),
        );

        Ok(Self {
            graph: graph_file.graph,
            core: graph_file.core,
            nodes,
            geometry,
            names,
            annotations: annotations.annotations,
            classes,
            lanes,
            geometry_reversed,
            checksum: crc::fold(graph_file.body_checksum),
            timestamp,
        })
    }

    fn annotation(&self, node: NodeId) -> &NodeAnnotation {
        &self.annotations[node as usize]
    }
}

impl DataFacade for OwnedFacade {
    fn graph(&self) -> &StaticGraph {
        &self.graph
    }

    fn is_core_node(&self, node: NodeId) -> bool {
        self.core[node as usize]
    }

    fn geometry_is_reversed(&self, node: NodeId) -> bool {
        self.geometry_reversed[node as usize]
    }

    fn core_size(&self) -> usize {
        self.core.iter().filter(|&&c| c).count()
    }

    fn coordinate(&self, node: NodeId) -> Coordinate {
        self.nodes.nodes[node as usize].coordinate
    }

    fn osm_node_id(&self, node: NodeId) -> u64 {
        self.nodes.nodes[node as usize].osm_id
    }

    fn turn_instruction(&self, node: NodeId) -> TurnInstruction {
        self.annotation(node).instruction
    }

    fn travel_mode(&self, node: NodeId) -> TravelMode {
        self.annotation(node).travel_mode
    }

    fn name_id_of(&self, node: NodeId) -> u32 {
        self.annotation(node).name_id
    }

    fn geometry_id_of(&self, node: NodeId) -> u32 {
        self.annotation(node).geometry_id
    }

    fn component(&self, node: NodeId) -> SegmentComponent {
        self.annotation(node).component
    }

    fn bearing_class(&self, node: NodeId) -> Vec<i16> {
        self.classes
            .bearing_class(self.annotation(node).bearing_class_id)
            .to_vec()
    }

    fn entry_class(&self, node: NodeId) -> EntryClass {
        self.classes.entry_class(self.annotation(node).entry_class_id)
    }

    fn lane_tuple(&self, node: NodeId) -> LaneTuple {
        self.lanes.tuple(node as usize)
    }

    fn lane_description(&self, description_id: u16) -> Vec<u16> {
        self.lanes.description(description_id).to_vec()
    }

    fn geometry_nodes(&self, geometry_id: u32) -> Vec<NodeId> {
        self.geometry.nodes_of(geometry_id)
    }

    fn geometry_weights(&self, geometry_id: u32) -> Vec<Weight> {
        self.geometry.weights_of(geometry_id)
    }

    fn geometry_datasources(&self, geometry_id: u32) -> Vec<u8> {
        self.geometry
            .entries_of(geometry_id)
            .iter()
            .map(|e| e.datasource)
            .collect()
    }

    fn name(&self, name_id: u32) -> String {
        self.names.get(name_id).to_string()
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn timestamp(&self) -> String {
        self.timestamp.clone()
    }
}
