//! `.geometry`: packed polylines of compressed edges.
//!
//! Body: u32 id count, a prefix-sum table of u32 (one sentinel entry past
//! the end), then packed 9-byte tuples of (via_node u32, weight u32,
//! datasource u8). The tuples of geometry id `g` occupy
//! `prefix[g]..prefix[g + 1]`.

use anyhow::{ensure, Result};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};
use crate::graph::{NodeId, Weight};

const TUPLE_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryEntry {
    pub via_node: NodeId,
    pub weight: u32,
    pub datasource: u8,
}

#[derive(Debug)]
pub struct GeometryFile {
    pub prefix: Vec<u32>,
    pub entries: Vec<GeometryEntry>,
}

impl GeometryFile {
    /// Build an in-memory table from explicit polylines.
    pub fn from_polylines(polylines: &[Vec<GeometryEntry>]) -> Self {
        let mut prefix = Vec::with_capacity(polylines.len() + 1);
        let mut entries = Vec::new();
        let mut offset = 0u32;
        for line in polylines {
            prefix.push(offset);
            entries.extend_from_slice(line);
            offset += line.len() as u32;
        }
        prefix.push(offset);
        Self { prefix, entries }
    }

    pub fn write(path: &Path, polylines: &[Vec<GeometryEntry>]) -> Result<()> {
        let mut w = ByteWriter::new();
        w.u32(polylines.len() as u32);
        let mut offset = 0u32;
        for line in polylines {
            w.u32(offset);
            offset += line.len() as u32;
        }
        w.u32(offset);
        for line in polylines {
            for entry in line {
                w.u32(entry.via_node);
                w.u32(entry.weight);
                w.u8(entry.datasource);
            }
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let mut r = ByteReader::new(&body);
        let count = r.u32()? as usize;
        let mut prefix = Vec::with_capacity(count + 1);
        for _ in 0..=count {
            prefix.push(r.u32()?);
        }
        ensure!(
            prefix.windows(2).all(|w| w[0] <= w[1]),
            "geometry prefix table is not monotone"
        );
        let total = *prefix.last().unwrap() as usize;
        let mut entries = Vec::with_capacity(total);
        for _ in 0..total {
            entries.push(GeometryEntry {
                via_node: r.u32()?,
                weight: r.u32()?,
                datasource: r.u8()?,
            });
        }
        r.finish()?;
        Ok(Self { prefix, entries })
    }

    pub fn len(&self) -> usize {
        self.prefix.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries_of(&self, geometry_id: u32) -> &[GeometryEntry] {
        let begin = self.prefix[geometry_id as usize] as usize;
        let end = self.prefix[geometry_id as usize + 1] as usize;
        &self.entries[begin..end]
    }

    pub fn nodes_of(&self, geometry_id: u32) -> Vec<NodeId> {
        self.entries_of(geometry_id)
            .iter()
            .map(|e| e.via_node)
            .collect()
    }

    pub fn weights_of(&self, geometry_id: u32) -> Vec<Weight> {
        self.entries_of(geometry_id)
            .iter()
            .map(|e| e.weight as Weight)
            .collect()
    }
}

/// Zero-copy view over a mapped `.geometry` body.
#[derive(Debug, Clone, Copy)]
pub struct GeometryView {
    count: usize,
    tuples_offset: usize,
}

impl GeometryView {
    pub fn open(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let count = r.u32()? as usize;
        let tuples_offset = 4 + (count + 1) * 4;
        ensure!(body.len() >= tuples_offset, "geometry artifact truncated");
        let total = u32::from_le_bytes(
            body[tuples_offset - 4..tuples_offset].try_into().unwrap(),
        ) as usize;
        ensure!(
            body.len() == tuples_offset + total * TUPLE_LEN,
            "geometry artifact length does not match its prefix table"
        );
        Ok(Self {
            count,
            tuples_offset,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn prefix(&self, body: &[u8], index: usize) -> usize {
        let start = 4 + index * 4;
        u32::from_le_bytes(body[start..start + 4].try_into().unwrap()) as usize
    }

    pub fn range(&self, body: &[u8], geometry_id: u32) -> std::ops::Range<usize> {
        debug_assert!((geometry_id as usize) < self.count);
        self.prefix(body, geometry_id as usize)..self.prefix(body, geometry_id as usize + 1)
    }

    pub fn entry(&self, body: &[u8], tuple_index: usize) -> GeometryEntry {
        let start = self.tuples_offset + tuple_index * TUPLE_LEN;
        let rec = &body[start..start + TUPLE_LEN];
        GeometryEntry {
            via_node: u32::from_le_bytes(rec[0..4].try_into().unwrap()),
            weight: u32::from_le_bytes(rec[4..8].try_into().unwrap()),
            datasource: rec[8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prefix_table_partitions_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.geometry");
        let polylines = vec![
            vec![
                GeometryEntry { via_node: 5, weight: 10, datasource: 0 },
                GeometryEntry { via_node: 6, weight: 12, datasource: 0 },
            ],
            vec![],
            vec![GeometryEntry { via_node: 7, weight: 3, datasource: 1 }],
        ];
        GeometryFile::write(&path, &polylines).unwrap();

        let loaded = GeometryFile::read(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.nodes_of(0), vec![5, 6]);
        assert_eq!(loaded.entries_of(1), &[]);
        assert_eq!(loaded.weights_of(2), vec![3]);

        let body = fingerprint::read_file(&path).unwrap();
        let view = GeometryView::open(&body).unwrap();
        let range = view.range(&body, 0);
        assert_eq!(range, 0..2);
        assert_eq!(view.entry(&body, 2).via_node, 7);
    }
}
