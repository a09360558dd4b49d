//! Persisted artifact formats.
//!
//! Every file starts with a 16-byte fingerprint (magic, version triple,
//! CRC-64 of the body) followed by a little-endian body with explicit
//! integer sizes. Readers verify magic, major/minor version and checksum
//! before touching the body. Writers exist for every reader; the offline
//! tools that normally produce these files are external, but fixtures and
//! tests build them through the same code path.

pub mod annotations_file;
pub mod classes_file;
pub mod crc;
pub mod fingerprint;
pub mod geometry_file;
pub mod graph_file;
pub mod lanes_file;
pub mod names_file;
pub mod nodes_file;
pub mod restrictions_file;
pub mod timestamp_file;

pub use annotations_file::{AnnotationsFile, NodeAnnotation};
pub use classes_file::ClassesFile;
pub use fingerprint::FingerprintError;
pub use geometry_file::GeometryFile;
pub use graph_file::GraphFile;
pub use lanes_file::LanesFile;
pub use names_file::NamesFile;
pub use nodes_file::{ExternalNode, NodesFile};
pub use restrictions_file::{RestrictionsFile, TurnRestriction};
pub use timestamp_file::TimestampFile;

use anyhow::{bail, Result};

/// Sequential little-endian reader over a body slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            bail!(
                "truncated artifact: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len() - self.pos
            );
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            bail!("trailing {} bytes after artifact body", self.remaining());
        }
        Ok(())
    }
}

/// Append-only little-endian body builder.
#[derive(Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
