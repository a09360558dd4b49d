//! `.hsgr`: the contracted search graph.
//!
//! Body: u32 edge count, u32 max_node_id, then packed edges of
//! (source u32, target u32, weight i32, flags u8, middle u32).
//! Flag bits: 0 forward, 1 backward, 2 shortcut. After the edges, a packed
//! bitset of max_node_id + 1 bits marks the core nodes retained by the
//! partial contraction.

use anyhow::{ensure, Result};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};
use crate::graph::{EdgeData, NodeId, StaticGraph, INVALID_NODE};

const FLAG_FORWARD: u8 = 1 << 0;
const FLAG_BACKWARD: u8 = 1 << 1;
const FLAG_SHORTCUT: u8 = 1 << 2;

#[derive(Debug)]
pub struct GraphFile {
    pub graph: StaticGraph,
    pub core: Vec<bool>,
    /// CRC-64 of the file body, folded into the facade checksum.
    pub body_checksum: u64,
}

impl GraphFile {
    pub fn write(
        path: &Path,
        edges: &[(NodeId, NodeId, EdgeData)],
        num_nodes: usize,
        core: &[bool],
    ) -> Result<()> {
        ensure!(core.len() == num_nodes, "core bitset must cover every node");
        let mut w = ByteWriter::new();
        w.u32(edges.len() as u32);
        ensure!(num_nodes > 0, "graph without nodes");
        w.u32(num_nodes as u32 - 1);
        for &(source, target, data) in edges {
            ensure!(data.weight >= 1, "edge weight must be strictly positive");
            w.u32(source);
            w.u32(target);
            w.i32(data.weight);
            let mut flags = 0u8;
            if data.forward {
                flags |= FLAG_FORWARD;
            }
            if data.backward {
                flags |= FLAG_BACKWARD;
            }
            if data.shortcut {
                flags |= FLAG_SHORTCUT;
            }
            w.u8(flags);
            w.u32(data.middle);
        }
        let mut bits = vec![0u8; (num_nodes + 7) / 8];
        for (node, &in_core) in core.iter().enumerate() {
            if in_core {
                bits[node / 8] |= 1 << (node % 8);
            }
        }
        w.bytes(&bits);
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let body_checksum = super::crc::checksum(&body);
        let mut r = ByteReader::new(&body);

        let edge_count = r.u32()? as usize;
        let num_nodes = r.u32()? as usize + 1;

        let mut edge_list = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            let source = r.u32()?;
            let target = r.u32()?;
            let weight = r.i32()?;
            let flags = r.u8()?;
            let middle = r.u32()?;
            ensure!(weight >= 1, "edge weight must be strictly positive");
            ensure!(
                (source as usize) < num_nodes && (target as usize) < num_nodes,
                "edge endpoint out of node range"
            );
            let shortcut = flags & FLAG_SHORTCUT != 0;
            ensure!(
                !shortcut || (middle as usize) < num_nodes,
                "shortcut middle out of node range"
            );
            edge_list.push((
                source,
                target,
                EdgeData {
                    weight,
                    forward: flags & FLAG_FORWARD != 0,
                    backward: flags & FLAG_BACKWARD != 0,
                    shortcut,
                    middle: if shortcut { middle } else { INVALID_NODE },
                },
            ));
        }

        let bits = r.bytes((num_nodes + 7) / 8)?;
        let mut core = Vec::with_capacity(num_nodes);
        for node in 0..num_nodes {
            core.push(bits[node / 8] & (1 << (node % 8)) != 0);
        }
        r.finish()?;

        Ok(Self {
            graph: StaticGraph::from_edges(num_nodes, edge_list),
            core,
            body_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_topology_and_core() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.hsgr");
        let edges = vec![
            (0, 1, EdgeData::new(10, true, false)),
            (1, 2, EdgeData::new(20, true, true)),
            (0, 2, EdgeData::shortcut(30, true, false, 1)),
        ];
        GraphFile::write(&path, &edges, 3, &[false, true, false]).unwrap();

        let loaded = GraphFile::read(&path).unwrap();
        assert_eq!(loaded.graph.num_nodes(), 3);
        assert_eq!(loaded.graph.num_edges(), 3);
        assert_eq!(loaded.core, vec![false, true, false]);

        let shortcut = loaded.graph.find_smallest_edge(0, 2, |d| d.shortcut);
        let data = loaded.graph.data(shortcut);
        assert!(data.shortcut);
        assert_eq!(data.middle, 1);
    }
}
