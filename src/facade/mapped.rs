//! Memory-mapped facade.
//!
//! The search graph is hot on every query and parsed into its CSR form at
//! load; the big flat tables stay mapped read-only and individual records
//! are decoded on access, so rarely-touched pages (names, geometry of
//! remote regions) are paged in on demand. Class and lane tables are small
//! and parsed eagerly.

use anyhow::{ensure, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use super::{ArtifactPaths, DataFacade};
use crate::formats::annotations_file::{AnnotationsView, SegmentComponent, TravelMode};
use crate::formats::classes_file::EntryClass;
use crate::formats::fingerprint;
use crate::formats::geometry_file::GeometryView;
use crate::formats::lanes_file::LaneTuple;
use crate::formats::nodes_file::NodesView;
use crate::formats::{crc, names_file::NamesView, ClassesFile, GraphFile, LanesFile, TimestampFile};
use crate::geo::Coordinate;
use crate::graph::{NodeId, StaticGraph, Weight};
use crate::guidance::instruction::TurnInstruction;

/// A fingerprint-verified memory-mapped artifact.
struct MappedArtifact {
    map: Mmap,
}

impl MappedArtifact {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // Mapping a read-only file; the swap protocol guarantees artifacts
        // are immutable once published.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mapping {}", path.display()))?;
        fingerprint::verify(&map).with_context(|| format!("verifying {}", path.display()))?;
        Ok(Self { map })
    }

    #[inline]
    fn body(&self) -> &[u8] {
        &self.map[fingerprint::HEADER_LEN..]
    }
}

pub struct MappedFacade {
    graph: StaticGraph,
    core: Vec<bool>,

    nodes_map: MappedArtifact,
    nodes_view: NodesView,
    geometry_map: MappedArtifact,
    geometry_view: GeometryView,
    names_map: MappedArtifact,
    names_view: NamesView,
    annotations_map: MappedArtifact,
    annotations_view: AnnotationsView,

    classes: ClassesFile,
    lanes: LanesFile,
    geometry_reversed: Vec<bool>,
    checksum: u32,
    timestamp: String,
}

impl MappedFacade {
    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let graph_file =
            GraphFile::read(&paths.hsgr()).context("loading contracted search graph")?;

        let nodes_map = MappedArtifact::open(&paths.nodes())?;
        let nodes_view = NodesView::open(nodes_map.body())?;
        let geometry_map = MappedArtifact::open(&paths.geometry())?;
        let geometry_view = GeometryView::open(geometry_map.body())?;
        let names_map = MappedArtifact::open(&paths.names())?;
        let names_view = NamesView::open(names_map.body())?;
        let annotations_map = MappedArtifact::open(&paths.annotations())?;
        let annotations_view = AnnotationsView::open(annotations_map.body())?;

        let classes =
            ClassesFile::read(&paths.classes()).context("loading intersection classes")?;
        let lanes = LanesFile::read(&paths.lanes()).context("loading turn lanes")?;
        let timestamp = TimestampFile::read(&paths.timestamp())
            .map(|t| t.timestamp)
            .unwrap_or_else(|_| "n/a".to_string());

        let num_nodes = graph_file.graph.num_nodes();
        ensure!(
            annotations_view.len() == num_nodes,
            "annotations table must cover every search node"
        );
        ensure!(
            nodes_view.len() >= num_nodes,
            "coordinate table shorter than the search graph"
        );

        tracing::info!(
            nodes = num_nodes,
            edges = graph_file.graph.num_edges(),
            timestamp = %timestamp,
            "snapshot mapped"
        );

        let geometry_reversed = super::compute_geometry_reversed(
            (0..num_nodes).map(|i| annotations_view.get(annotations_map.body(), i).geometry_id),
        );

        Ok(Self {
            graph: graph_file.graph,
            core: graph_file.core,
            nodes_map,
            nodes_view,
            geometry_map,
            geometry_view,
            names_map,
            names_view,
            annotations_map,
            annotations_view,
            classes,
            lanes,
            geometry_reversed,
            checksum: crc::fold(graph_file.body_checksum),
            timestamp,
        })
    }
}

impl DataFacade for MappedFacade {
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
        self.nodes_view
            .coordinate(self.nodes_map.body(), node as usize)
    }

    fn osm_node_id(&self, node: NodeId) -> u64 {
        self.nodes_view.osm_id(self.nodes_map.body(), node as usize)
    }

    fn turn_instruction(&self, node: NodeId) -> TurnInstruction {
        self.annotations_view
            .get(self.annotations_map.body(), node as usize)
            .instruction
    }

    fn travel_mode(&self, node: NodeId) -> TravelMode {
        self.annotations_view
            .get(self.annotations_map.body(), node as usize)
            .travel_mode
    }

    fn name_id_of(&self, node: NodeId) -> u32 {
        self.annotations_view
            .get(self.annotations_map.body(), node as usize)
            .name_id
    }

    fn geometry_id_of(&self, node: NodeId) -> u32 {
        self.annotations_view
            .get(self.annotations_map.body(), node as usize)
            .geometry_id
    }

    fn component(&self, node: NodeId) -> SegmentComponent {
        self.annotations_view
            .get(self.annotations_map.body(), node as usize)
            .component
    }

    fn bearing_class(&self, node: NodeId) -> Vec<i16> {
        let class_id = self
            .annotations_view
            .get(self.annotations_map.body(), node as usize)
            .bearing_class_id;
        self.classes.bearing_class(class_id).to_vec()
    }

    fn entry_class(&self, node: NodeId) -> EntryClass {
        let class_id = self
            .annotations_view
            .get(self.annotations_map.body(), node as usize)
            .entry_class_id;
        self.classes.entry_class(class_id)
    }

    fn lane_tuple(&self, node: NodeId) -> LaneTuple {
        self.lanes.tuple(node as usize)
    }

    fn lane_description(&self, description_id: u16) -> Vec<u16> {
        self.lanes.description(description_id).to_vec()
    }

    fn geometry_nodes(&self, geometry_id: u32) -> Vec<NodeId> {
        let body = self.geometry_map.body();
        self.geometry_view
            .range(body, geometry_id)
            .map(|i| self.geometry_view.entry(body, i).via_node)
            .collect()
    }

    fn geometry_weights(&self, geometry_id: u32) -> Vec<Weight> {
        let body = self.geometry_map.body();
        self.geometry_view
            .range(body, geometry_id)
            .map(|i| self.geometry_view.entry(body, i).weight as Weight)
            .collect()
    }

    fn geometry_datasources(&self, geometry_id: u32) -> Vec<u8> {
        let body = self.geometry_map.body();
        self.geometry_view
            .range(body, geometry_id)
            .map(|i| self.geometry_view.entry(body, i).datasource)
            .collect()
    }

    fn name(&self, name_id: u32) -> String {
        self.names_view
            .get(self.names_map.body(), name_id)
            .to_string()
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn timestamp(&self) -> String {
        self.timestamp.clone()
    }
}
