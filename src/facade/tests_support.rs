//! Hand-built facades and on-disk artifact fixtures for unit tests.

use std::path::Path;

use super::owned::OwnedFacade;
use super::ArtifactPaths;
use crate::formats::annotations_file::{NodeAnnotation, SegmentComponent, TravelMode};
use crate::formats::classes_file::{ClassesFile, EntryClass};
use crate::formats::geometry_file::{GeometryEntry, GeometryFile};
use crate::formats::lanes_file::{LaneTuple, LanesFile};
use crate::formats::names_file::NamesFile;
use crate::formats::nodes_file::{ExternalNode, NodesFile};
use crate::formats::{AnnotationsFile, GraphFile, TimestampFile};
use crate::geo::Coordinate;
use crate::graph::{EdgeData, NodeId, StaticGraph};
use crate::guidance::instruction::{DirectionModifier, TurnInstruction, TurnType};
use crate::spatial::{PhantomEndpoint, SegmentId};

fn annotation(name_id: u32, geometry_id: u32, instruction: TurnInstruction) -> NodeAnnotation {
    NodeAnnotation {
        instruction,
        travel_mode: TravelMode::DRIVING,
        name_id,
        geometry_id,
        component: SegmentComponent { id: 0, is_tiny: false },
        entry_class_id: 0,
        bearing_class_id: 0,
    }
}

fn no_turn() -> TurnInstruction {
    TurnInstruction::new(TurnType::NoTurn, DirectionModifier::UTurn)
}

/// Mirror each directed edge so the backward frontier can climb it too.
fn bidirect(edges: &[(NodeId, NodeId, EdgeData)]) -> Vec<(NodeId, NodeId, EdgeData)> {
    let mut out = Vec::with_capacity(edges.len() * 2);
    for &(u, v, data) in edges {
        out.push((u, v, data));
        let mirrored = EdgeData {
            forward: data.backward,
            backward: data.forward,
            ..data
        };
        out.push((v, u, mirrored));
    }
    out
}

/// Oneway ring 0 -> 1 -> 2 -> 3 (10 each) with a direct 0 -> 3 (40) and a
/// shortcut 0 -> 2 via 1. Junction-style toy for search tests.
pub fn square_facade() -> OwnedFacade {
    let edges = bidirect(&[
        (0, 1, EdgeData::new(10, true, false)),
        (1, 2, EdgeData::new(10, true, false)),
        (2, 3, EdgeData::new(10, true, false)),
        (0, 3, EdgeData::new(40, true, false)),
        (0, 2, EdgeData::shortcut(20, true, false, 1)),
    ]);
    let graph = StaticGraph::from_edges(4, edges);

    let coordinates = [
        Coordinate::from_degrees(13.3880, 52.5170),
        Coordinate::from_degrees(13.3895, 52.5170),
        Coordinate::from_degrees(13.3895, 52.5155),
        Coordinate::from_degrees(13.3910, 52.5155),
    ];
    let nodes = NodesFile {
        nodes: coordinates
            .iter()
            .enumerate()
            .map(|(i, &coordinate)| ExternalNode {
                coordinate,
                osm_id: i as u64 + 100,
                flags: 0,
            })
            .collect(),
    };

    let polylines: Vec<Vec<GeometryEntry>> = (0..4u32)
        .map(|n| {
            vec![
                GeometryEntry { via_node: n, weight: 10, datasource: 0 },
                GeometryEntry { via_node: (n + 1) % 4, weight: 0, datasource: 0 },
            ]
        })
        .collect();

    OwnedFacade {
        graph,
        core: vec![false; 4],
        nodes,
        geometry: GeometryFile::from_polylines(&polylines),
        names: NamesFile::from_strings(&["Ring Road", "", "", ""]),
        annotations: (0..4u32).map(|n| annotation(0, n, no_turn())).collect(),
        classes: ClassesFile::from_parts(&[vec![0, 90, 180, 270]], vec![EntryClass(0b1111)]),
        lanes: LanesFile::from_parts(vec![LaneTuple::default(); 4], &[]),
        geometry_reversed: vec![false; 4],
        checksum: 0xC0FF_EE00,
        timestamp: "2016-05-17T09:30:00Z".to_string(),
    }
}

/// Raw parts of the edge-based line A - B - C, shared by the in-memory
/// facade and the on-disk artifact fixture.
struct LinearFixture {
    edges: Vec<(NodeId, NodeId, EdgeData)>,
    core: Vec<bool>,
    nodes: Vec<ExternalNode>,
    polylines: Vec<Vec<GeometryEntry>>,
    names: Vec<&'static str>,
    annotations: Vec<NodeAnnotation>,
    bearing_classes: Vec<Vec<i16>>,
    entry_classes: Vec<EntryClass>,
    lane_tuples: Vec<LaneTuple>,
    timestamp: &'static str,
}

fn linear_fixture() -> LinearFixture {
    let a = Coordinate::from_degrees(13.3880, 52.5170);
    let b = Coordinate::from_degrees(13.3890, 52.5170);
    let c = Coordinate::from_degrees(13.3900, 52.5170);
    let coordinates = [a, b, b, c, a, b, c];

    let continue_straight = TurnInstruction::new(TurnType::Continue, DirectionModifier::Straight);
    LinearFixture {
        // turns at B: A>B continues into B>C, C>B continues into B>A
        edges: bidirect(&[
            (0, 2, EdgeData::new(5, true, false)),
            (3, 1, EdgeData::new(5, true, false)),
        ]),
        core: vec![false; 4],
        nodes: coordinates
            .iter()
            .enumerate()
            .map(|(i, &coordinate)| ExternalNode {
                coordinate,
                osm_id: i as u64 + 200,
                flags: 0,
            })
            .collect(),
        polylines: vec![
            vec![
                GeometryEntry { via_node: 4, weight: 5, datasource: 0 },
                GeometryEntry { via_node: 5, weight: 0, datasource: 0 },
            ],
            vec![
                GeometryEntry { via_node: 5, weight: 5, datasource: 0 },
                GeometryEntry { via_node: 6, weight: 0, datasource: 0 },
            ],
        ],
        names: vec![
            "West Street", "", "", "",
            "East Street", "", "", "",
        ],
        annotations: vec![
            annotation(0, 0, no_turn()),
            annotation(0, 0, no_turn()),
            annotation(4, 1, continue_straight),
            annotation(4, 1, continue_straight),
        ],
        bearing_classes: vec![vec![90, 270]],
        entry_classes: vec![EntryClass(0b11)],
        lane_tuples: vec![LaneTuple::default(); 4],
        timestamp: "2016-05-17T09:30:00Z",
    }
}

/// Edge-based line A - B - C, bidirectional, 5 deci-seconds per segment.
/// V-nodes: 0 = A>B, 1 = B>A (twins on geometry 0); 2 = B>C, 3 = C>B
/// (twins on geometry 1). Coordinate ids 4, 5, 6 are the junctions A, B, C.
pub fn linear_facade() -> OwnedFacade {
    let fixture = linear_fixture();
    OwnedFacade {
        graph: StaticGraph::from_edges(4, fixture.edges),
        core: fixture.core,
        nodes: NodesFile { nodes: fixture.nodes },
        geometry: GeometryFile::from_polylines(&fixture.polylines),
        names: NamesFile::from_strings(&fixture.names),
        annotations: fixture.annotations,
        classes: ClassesFile::from_parts(&fixture.bearing_classes, fixture.entry_classes),
        lanes: LanesFile::from_parts(fixture.lane_tuples, &[]),
        geometry_reversed: vec![false, true, false, true],
        checksum: 0xBEEF_0001,
        timestamp: fixture.timestamp.to_string(),
    }
}

/// Write the linear fixture as a complete artifact set under `dir`.
pub fn write_fixture_artifacts(dir: &Path) -> ArtifactPaths {
    let fixture = linear_fixture();
    let paths = ArtifactPaths::new(dir.join("fixture"));
    GraphFile::write(&paths.hsgr(), &fixture.edges, 4, &fixture.core).unwrap();
    NodesFile::write(&paths.nodes(), &fixture.nodes).unwrap();
    GeometryFile::write(&paths.geometry(), &fixture.polylines).unwrap();
    NamesFile::write(&paths.names(), &fixture.names).unwrap();
    AnnotationsFile::write(&paths.annotations(), &fixture.annotations).unwrap();
    ClassesFile::write(&paths.classes(), &fixture.bearing_classes, &fixture.entry_classes)
        .unwrap();
    LanesFile::write(&paths.lanes(), &fixture.lane_tuples, &[]).unwrap();
    TimestampFile::write(&paths.timestamp(), fixture.timestamp).unwrap();
    paths
}

/// A phantom sitting exactly at the start of `node`'s segment, forward
/// direction only.
pub fn phantom_on_node(facade: &OwnedFacade, node: NodeId) -> PhantomEndpoint {
    use crate::facade::DataFacade;
    PhantomEndpoint {
        forward_segment: SegmentId { id: node, enabled: true },
        reverse_segment: SegmentId::INVALID,
        name_id: 0,
        forward_weight: 0,
        reverse_weight: 0,
        forward_offset: 0,
        reverse_offset: 0,
        packed_geometry_id: facade.geometry_id_of(node),
        component: SegmentComponent { id: 0, is_tiny: false },
        location: facade.coordinate(node),
        input_location: facade.coordinate(node),
        fwd_segment_position: 0,
        forward_mode: TravelMode::DRIVING,
        backward_mode: TravelMode::INACCESSIBLE,
    }
}
