//! 16-byte fingerprint header carried by every persisted artifact.
//!
//! Layout: magic `MNRH` (4), major/minor/patch (3), reserved (1),
//! CRC-64 of the body (8). A major or minor mismatch means the artifact
//! was produced by an incompatible toolchain and the file is rejected;
//! patch differences are tolerated.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::crc;

pub const MAGIC: [u8; 4] = *b"MNRH";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_PATCH: u8 = 0;
pub const HEADER_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("bad magic, not a routing artifact")]
    BadMagic,
    #[error("artifact version {found_major}.{found_minor} incompatible with {VERSION_MAJOR}.{VERSION_MINOR}")]
    VersionMismatch { found_major: u8, found_minor: u8 },
    #[error("artifact body checksum mismatch")]
    ChecksumMismatch,
    #[error("artifact shorter than its header")]
    Truncated,
}

/// Prepend a fingerprint to `body` and write the file atomically enough
/// for offline tooling (write then rename is the swap daemon's business).
pub fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION_MAJOR);
    out.push(VERSION_MINOR);
    out.push(VERSION_PATCH);
    out.push(0);
    out.extend_from_slice(&crc::checksum(body).to_le_bytes());
    out.extend_from_slice(body);
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Verify the header of an in-memory artifact and return its body slice.
pub fn verify(bytes: &[u8]) -> Result<&[u8], FingerprintError> {
    if bytes.len() < HEADER_LEN {
        return Err(FingerprintError::Truncated);
    }
    if bytes[0..4] != MAGIC {
        return Err(FingerprintError::BadMagic);
    }
    let (major, minor) = (bytes[4], bytes[5]);
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(FingerprintError::VersionMismatch {
            found_major: major,
            found_minor: minor,
        });
    }
    let stored = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let body = &bytes[HEADER_LEN..];
    if crc::checksum(body) != stored {
        return Err(FingerprintError::ChecksumMismatch);
    }
    Ok(body)
}

/// Read a fingerprinted file and return its verified body.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let body = verify(&bytes).with_context(|| format!("verifying {}", path.display()))?;
    Ok(body.to_vec())
}

/// The body CRC stored in the header, for facade checksum derivation.
pub fn stored_checksum(bytes: &[u8]) -> Result<u64, FingerprintError> {
    if bytes.len() < HEADER_LEN {
        return Err(FingerprintError::Truncated);
    }
    Ok(u64::from_le_bytes(bytes[8..16].try_into().unwrap()))
}
