//! `.classes`: bearing classes and entry classes.
//!
//! Bearing classes are deduplicated lists of discrete bearings (degrees,
//! i16) of the roads incident to an intersection, stored behind a
//! prefix-sum table. Entry classes are bitsets (u32) over those bearings
//! marking which incident roads may be entered from the annotated edge.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};

/// Bitset over the bearings of one intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryClass(pub u32);

impl EntryClass {
    pub fn allows(&self, bearing_index: usize) -> bool {
        bearing_index < 32 && self.0 & (1 << bearing_index) != 0
    }

    pub fn set(&mut self, bearing_index: usize) {
        debug_assert!(bearing_index < 32);
        self.0 |= 1 << bearing_index;
    }
}

#[derive(Debug)]
pub struct ClassesFile {
    bearing_prefix: Vec<u32>,
    bearing_values: Vec<i16>,
    entry_classes: Vec<EntryClass>,
}

impl ClassesFile {
    /// Build an in-memory table from explicit class lists.
    pub fn from_parts(bearing_classes: &[Vec<i16>], entry_classes: Vec<EntryClass>) -> Self {
        let mut bearing_prefix = Vec::with_capacity(bearing_classes.len() + 1);
        let mut bearing_values = Vec::new();
        let mut offset = 0u32;
        for class in bearing_classes {
            bearing_prefix.push(offset);
            bearing_values.extend_from_slice(class);
            offset += class.len() as u32;
        }
        bearing_prefix.push(offset);
        Self {
            bearing_prefix,
            bearing_values,
            entry_classes,
        }
    }

    pub fn write(path: &Path, bearing_classes: &[Vec<i16>], entry_classes: &[EntryClass]) -> Result<()> {
        let mut w = ByteWriter::new();
        w.u32(bearing_classes.len() as u32);
        let mut offset = 0u32;
        for class in bearing_classes {
            w.u32(offset);
            offset += class.len() as u32;
        }
        w.u32(offset);
        for class in bearing_classes {
            for &bearing in class {
                w.i16(bearing);
            }
        }
        w.u32(entry_classes.len() as u32);
        for entry in entry_classes {
            w.u32(entry.0);
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let mut r = ByteReader::new(&body);
        let class_count = r.u32()? as usize;
        let mut bearing_prefix = Vec::with_capacity(class_count + 1);
        for _ in 0..=class_count {
            bearing_prefix.push(r.u32()?);
        }
        ensure!(
            bearing_prefix.windows(2).all(|w| w[0] <= w[1]),
            "bearing prefix table is not monotone"
        );
        let total = *bearing_prefix.last().unwrap() as usize;
        let mut bearing_values = Vec::with_capacity(total);
        for _ in 0..total {
            bearing_values.push(r.i16()?);
        }
        let entry_count = r.u32()? as usize;
        let mut entry_classes = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entry_classes.push(EntryClass(r.u32()?));
        }
        r.finish()?;
        Ok(Self {
            bearing_prefix,
            bearing_values,
            entry_classes,
        })
    }

    pub fn bearing_class(&self, class_id: u16) -> &[i16] {
        let idx = class_id as usize;
        if idx + 1 >= self.bearing_prefix.len() {
            return &[];
        }
        let begin = self.bearing_prefix[idx] as usize;
        let end = self.bearing_prefix[idx + 1] as usize;
        &self.bearing_values[begin..end]
    }

    pub fn entry_class(&self, class_id: u16) -> EntryClass {
        self.entry_classes
            .get(class_id as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn num_bearing_classes(&self) -> usize {
        self.bearing_prefix.len() - 1
    }
}
