//! `.names`: the string table.
//!
//! Body: u32 string count, prefix-sum offsets (u32 per string plus one
//! sentinel), then contiguous UTF-8 data. Road signage is stored as four
//! consecutive strings per name id: name, destinations, pronunciation, ref.
//! Callers fetch the siblings by offset arithmetic on the id.

use anyhow::{ensure, Result};
use std::path::Path;

use super::{fingerprint, ByteReader, ByteWriter};

#[derive(Debug)]
pub struct NamesFile {
    offsets: Vec<u32>,
    data: Vec<u8>,
}

impl NamesFile {
    /// Build an in-memory table, four consecutive strings per name id.
    pub fn from_strings(strings: &[&str]) -> Self {
        let mut offsets = Vec::with_capacity(strings.len() + 1);
        let mut data = Vec::new();
        let mut offset = 0u32;
        for s in strings {
            offsets.push(offset);
            data.extend_from_slice(s.as_bytes());
            offset += s.len() as u32;
        }
        offsets.push(offset);
        Self { offsets, data }
    }

    pub fn write(path: &Path, strings: &[&str]) -> Result<()> {
        ensure!(
            strings.len() % 4 == 0,
            "names table must hold four consecutive strings per id"
        );
        let mut w = ByteWriter::new();
        w.u32(strings.len() as u32);
        let mut offset = 0u32;
        for s in strings {
            w.u32(offset);
            offset += s.len() as u32;
        }
        w.u32(offset);
        for s in strings {
            w.bytes(s.as_bytes());
        }
        fingerprint::write_file(path, &w.into_inner())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        let mut r = ByteReader::new(&body);
        let count = r.u32()? as usize;
        let mut offsets = Vec::with_capacity(count + 1);
        for _ in 0..=count {
            offsets.push(r.u32()?);
        }
        ensure!(
            offsets.windows(2).all(|w| w[0] <= w[1]),
            "names offset table is not monotone"
        );
        let total = *offsets.last().unwrap() as usize;
        let data = r.bytes(total)?.to_vec();
        r.finish()?;
        Ok(Self { offsets, data })
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The string at `index`, empty for out-of-range ids (sentinel name
    /// ids on phantom endpoints resolve to no signage).
    pub fn get(&self, index: u32) -> &str {
        if index as usize >= self.len() {
            return "";
        }
        let begin = self.offsets[index as usize] as usize;
        let end = self.offsets[index as usize + 1] as usize;
        std::str::from_utf8(&self.data[begin..end]).unwrap_or("")
    }
}

/// Zero-copy view over a mapped `.names` body.
#[derive(Debug, Clone, Copy)]
pub struct NamesView {
    count: usize,
    data_offset: usize,
}

impl NamesView {
    pub fn open(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let count = r.u32()? as usize;
        let data_offset = 4 + (count + 1) * 4;
        ensure!(body.len() >= data_offset, "names artifact truncated");
        let total =
            u32::from_le_bytes(body[data_offset - 4..data_offset].try_into().unwrap()) as usize;
        ensure!(
            body.len() == data_offset + total,
            "names artifact length does not match its offset table"
        );
        Ok(Self { count, data_offset })
    }

    #[inline]
    fn offset(&self, body: &[u8], index: usize) -> usize {
        let start = 4 + index * 4;
        u32::from_le_bytes(body[start..start + 4].try_into().unwrap()) as usize
    }

    pub fn get<'a>(&self, body: &'a [u8], index: u32) -> &'a str {
        if index as usize >= self.count {
            return "";
        }
        let begin = self.data_offset + self.offset(body, index as usize);
        let end = self.data_offset + self.offset(body, index as usize + 1);
        std::str::from_utf8(&body[begin..end]).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn four_sibling_strings_per_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.names");
        let strings = ["Hauptstrasse", "Berlin", "howpt-shtrah-se", "B96"];
        NamesFile::write(&path, &strings).unwrap();

        let loaded = NamesFile::read(&path).unwrap();
        assert_eq!(loaded.get(0), "Hauptstrasse");
        assert_eq!(loaded.get(1), "Berlin");
        assert_eq!(loaded.get(2), "howpt-shtrah-se");
        assert_eq!(loaded.get(3), "B96");
        assert_eq!(loaded.get(17), "");

        let body = fingerprint::read_file(&path).unwrap();
        let view = NamesView::open(&body).unwrap();
        assert_eq!(view.get(&body, 3), "B96");
        assert_eq!(view.get(&body, 99), "");
    }
}
