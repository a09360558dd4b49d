//! `.annotations`: per-node query metadata.
//!
//! One 18-byte record per search node: packed turn instruction u8, travel
//! mode u8, name_id u32, geometry_id u32, component u32 (bit 31 flags a
//! tiny strongly-connected component), entry class id u16, bearing class
//! id u16. Everything guidance and snapping need beyond the raw topology.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};
use crate::guidance::instruction::TurnInstruction;

const RECORD_LEN: usize = 18;
const TINY_COMPONENT_BIT: u32 = 1 << 31;

/// Travel mode as assigned by the classification profile. Opaque to the
/// engine except for the inaccessible sentinel; steps may only collapse
/// when modes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelMode(pub u8);

impl TravelMode {
    pub const INACCESSIBLE: TravelMode = TravelMode(0);
    pub const DRIVING: TravelMode = TravelMode(1);
}

/// Strongly-connected component membership of a snapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentComponent {
    pub id: u32,
    pub is_tiny: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAnnotation {
    pub instruction: TurnInstruction,
    pub travel_mode: TravelMode,
    pub name_id: u32,
    pub geometry_id: u32,
    pub component: SegmentComponent,
    pub entry_class_id: u16,
    pub bearing_class_id: u16,
}

#[derive(Debug)]
pub struct AnnotationsFile {
    pub annotations: Vec<NodeAnnotation>,
}

impl AnnotationsFile {
    pub fn write(path: &Path, annotations: &[NodeAnnotation]) -> Result<()> {
        let mut w = ByteWriter::new();
        w.u32(annotations.len() as u32);
        for a in annotations {
            ensure!(
                a.component.id & TINY_COMPONENT_BIT == 0,
                "component id uses the tiny flag bit"
            );
            w.u8(a.instruction.pack());
            w.u8(a.travel_mode.0);
            w.u32(a.name_id);
            w.u32(a.geometry_id);
            let mut component = a.component.id;
            if a.component.is_tiny {
                component |= TINY_COMPONENT_BIT;
            }
            w.u32(component);
            w.u16(a.entry_class_id);
            w.u16(a.bearing_class_id);
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let (count, records_offset) = Self::parse_header(&body)?;
        let mut r = ByteReader::new(&body[records_offset..]);
        let mut annotations = Vec::with_capacity(count);
        for _ in 0..count {
            annotations.push(decode_record(&mut r)?);
        }
        r.finish()?;
        Ok(Self { annotations })
    }

    pub(crate) fn parse_header(body: &[u8]) -> Result<(usize, usize)> {
        let mut r = ByteReader::new(body);
        let count = r.u32()? as usize;
        ensure!(
            body.len() == 4 + count * RECORD_LEN,
            "annotations artifact length does not match its count"
        );
        Ok((count, 4))
    }
}

fn decode_record(r: &mut ByteReader<'_>) -> Result<NodeAnnotation> {
    let instruction = TurnInstruction::unpack(r.u8()?);
    let travel_mode = TravelMode(r.u8()?);
    let name_id = r.u32()?;
    let geometry_id = r.u32()?;
    let component = r.u32()?;
    let entry_class_id = r.u16()?;
    let bearing_class_id = r.u16()?;
    Ok(NodeAnnotation {
        instruction,
        travel_mode,
        name_id,
        geometry_id,
        component: SegmentComponent {
            id: component & !TINY_COMPONENT_BIT,
            is_tiny: component & TINY_COMPONENT_BIT != 0,
        },
        entry_class_id,
        bearing_class_id,
    })
}

/// Zero-copy view over a mapped `.annotations` body.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationsView {
    count: usize,
}

impl AnnotationsView {
    pub fn open(body: &[u8]) -> Result<Self> {
        let (count, _) = AnnotationsFile::parse_header(body)?;
        Ok(Self { count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, body: &[u8], index: usize) -> NodeAnnotation {
        debug_assert!(index < self.count);
        let start = 4 + index * RECORD_LEN;
        let mut r = ByteReader::new(&body[start..start + RECORD_LEN]);
        decode_record(&mut r).expect("record length verified at open")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guidance::instruction::{DirectionModifier, TurnType};
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_tiny_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.annotations");
        let annotations = vec![
            NodeAnnotation {
                instruction: TurnInstruction::new(TurnType::Turn, DirectionModifier::Right),
                travel_mode: TravelMode::DRIVING,
                name_id: 4,
                geometry_id: 0,
                component: SegmentComponent { id: 1, is_tiny: false },
                entry_class_id: 0,
                bearing_class_id: 0,
            },
            NodeAnnotation {
                instruction: TurnInstruction::new(TurnType::NoTurn, DirectionModifier::UTurn),
                travel_mode: TravelMode(3),
                name_id: 8,
                geometry_id: 1,
                component: SegmentComponent { id: 9, is_tiny: true },
                entry_class_id: 2,
                bearing_class_id: 1,
            },
        ];
        AnnotationsFile::write(&path, &annotations).unwrap();

        let loaded = AnnotationsFile::read(&path).unwrap();
        assert_eq!(loaded.annotations, annotations);

        let body = fingerprint::read_file(&path).unwrap();
        let view = AnnotationsView::open(&body).unwrap();
        assert_eq!(view.get(&body, 1), annotations[1]);
    }
}
