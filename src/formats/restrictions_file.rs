//! `.restrictions`: turn restrictions.
//!
//! Produced by the extractor and consumed by the contractor; the query
//! engine only validates and forwards the artifact during snapshot
//! management. Records are (from u32, via u32, to u32, flags u8) with flag
//! bit 0 marking an only-restriction (as opposed to a no-restriction).

use anyhow::Result;
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};
use crate::graph::NodeId;

const FLAG_IS_ONLY: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRestriction {
    pub from: NodeId,
    pub via: NodeId,
    pub to: NodeId,
    pub is_only: bool,
}

#[derive(Debug)]
pub struct RestrictionsFile {
    pub restrictions: Vec<TurnRestriction>,
}

impl RestrictionsFile {
    pub fn write(path: &Path, restrictions: &[TurnRestriction]) -> Result<()> {
        let mut w = ByteWriter::new();
        w.u32(restrictions.len() as u32);
        for r in restrictions {
            w.u32(r.from);
            w.u32(r.via);
            w.u32(r.to);
            w.u8(if r.is_only { FLAG_IS_ONLY } else { 0 });
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let mut r = ByteReader::new(&body);
        let count = r.u32()? as usize;
        let mut restrictions = Vec::with_capacity(count);
        for _ in 0..count {
            restrictions.push(TurnRestriction {
                from: r.u32()?,
                via: r.u32()?,
                to: r.u32()?,
                is_only: r.u8()? & FLAG_IS_ONLY != 0,
            });
        }
        r.finish()?;
        Ok(Self { restrictions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn restrictions_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.restrictions");
        let restrictions = vec![
            TurnRestriction { from: 1, via: 2, to: 3, is_only: false },
            TurnRestriction { from: 4, via: 5, to: 6, is_only: true },
        ];
        RestrictionsFile::write(&path, &restrictions).unwrap();
        let loaded = RestrictionsFile::read(&path).unwrap();
        assert_eq!(loaded.restrictions, restrictions);
    }
}
