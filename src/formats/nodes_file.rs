//! `.nodes`: coordinate table.
//!
//! Body: u32 count, then 17-byte records of (lon i32, lat i32, osm_id u64,
//! flags u8). Coordinates are fixed-point micro-degrees. Flag bits:
//! 0 barrier, 1 traffic light. The table covers every search node and every
//! via node referenced by the geometry artifact, so any id the engine holds
//! resolves here.

use anyhow::{ensure, Result};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};
use crate::geo::Coordinate;

pub const NODE_FLAG_BARRIER: u8 = 1 << 0;
pub const NODE_FLAG_TRAFFIC_LIGHT: u8 = 1 << 1;

const RECORD_LEN: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalNode {
    pub coordinate: Coordinate,
    pub osm_id: u64,
    pub flags: u8,
}

#[derive(Debug)]
pub struct NodesFile {
    pub nodes: Vec<ExternalNode>,
}

impl NodesFile {
    pub fn write(path: &Path, nodes: &[ExternalNode]) -> Result<()> {
        let mut w = ByteWriter::new();
        w.u32(nodes.len() as u32);
        for node in nodes {
            w.i32(node.coordinate.lon);
            w.i32(node.coordinate.lat);
            w.u64(node.osm_id);
            w.u8(node.flags);
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let (count, records_offset) = Self::parse_header(&body)?;
        let mut nodes = Vec::with_capacity(count);
        let mut r = ByteReader::new(&body[records_offset..]);
        for _ in 0..count {
            nodes.push(ExternalNode {
                coordinate: Coordinate::new(r.i32()?, r.i32()?),
                osm_id: r.u64()?,
                flags: r.u8()?,
            });
        }
        r.finish()?;
        Ok(Self { nodes })
    }

    /// Header check shared with the mapped view: returns (count, body
    /// offset of the first record).
    pub(crate) fn parse_header(body: &[u8]) -> Result<(usize, usize)> {
        let mut r = ByteReader::new(body);
        let count = r.u32()? as usize;
        ensure!(
            body.len() == 4 + count * RECORD_LEN,
            "nodes artifact length does not match its count"
        );
        Ok((count, 4))
    }
}

/// Zero-copy view over a mapped `.nodes` body.
#[derive(Debug, Clone, Copy)]
pub struct NodesView {
    count: usize,
}

impl NodesView {
    pub fn open(body: &[u8]) -> Result<Self> {
        let (count, _) = NodesFile::parse_header(body)?;
        Ok(Self { count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn record(body: &[u8], index: usize) -> &[u8] {
        let start = 4 + index * RECORD_LEN;
        &body[start..start + RECORD_LEN]
    }

    pub fn coordinate(&self, body: &[u8], index: usize) -> Coordinate {
        debug_assert!(index < self.count);
        let rec = Self::record(body, index);
        Coordinate::new(
            i32::from_le_bytes(rec[0..4].try_into().unwrap()),
            i32::from_le_bytes(rec[4..8].try_into().unwrap()),
        )
    }

    pub fn osm_id(&self, body: &[u8], index: usize) -> u64 {
        debug_assert!(index < self.count);
        u64::from_le_bytes(Self::record(body, index)[8..16].try_into().unwrap())
    }

    pub fn flags(&self, body: &[u8], index: usize) -> u8 {
        debug_assert!(index < self.count);
        Self::record(body, index)[16]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_and_view_agree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.nodes");
        let nodes = vec![
            ExternalNode {
                coordinate: Coordinate::from_degrees(13.388, 52.517),
                osm_id: 42,
                flags: NODE_FLAG_TRAFFIC_LIGHT,
            },
            ExternalNode {
                coordinate: Coordinate::from_degrees(13.397, 52.529),
                osm_id: 43,
                flags: 0,
            },
        ];
        NodesFile::write(&path, &nodes).unwrap();

        let loaded = NodesFile::read(&path).unwrap();
        assert_eq!(loaded.nodes, nodes);

        let body = fingerprint::read_file(&path).unwrap();
        let view = NodesView::open(&body).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.coordinate(&body, 0), nodes[0].coordinate);
        assert_eq!(view.osm_id(&body, 1), 43);
        assert_eq!(view.flags(&body, 0), NODE_FLAG_TRAFFIC_LIGHT);
    }
}
