//! `.timestamp`: snapshot provenance.
//!
//! Body is a single ASCII ISO-8601 string identifying when the artifacts
//! were extracted. Exposed verbatim through the facade and in server
//! responses; the hot-swap coordinator compares it to detect
//! metadata-only updates.

use anyhow::{ensure, Result};
use std::path::Path;

use super::fingerprint;

#[derive(Debug)]
pub struct TimestampFile {
    pub timestamp: String,
}

impl TimestampFile {
    pub fn write(path: &Path, timestamp: &str) -> Result<()> {
        ensure!(timestamp.is_ascii(), "timestamp must be ASCII");
        fingerprint::write_file(path, timestamp.as_bytes())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fingerprint::read_file(path)?;
        ensure!(body.is_ascii(), "timestamp must be ASCII");
        Ok(Self {
            timestamp: String::from_utf8(body)?,
        })
    }
}
