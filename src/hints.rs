//! Opaque snap hints.
//!
//! A hint is a phantom endpoint serialized into a fixed 60-byte record,
//! suffixed with the facade checksum and base64-encoded. Clients pass
//! hints from earlier responses to skip re-snapping; a checksum mismatch
//! after a snapshot swap silently invalidates the hint and the caller
//! falls back to a fresh snap.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{EngineError, EngineResult};
use crate::facade::DataFacade;
use crate::formats::annotations_file::{SegmentComponent, TravelMode};
use crate::geo::Coordinate;
use crate::spatial::{PhantomEndpoint, SegmentId};

const PHANTOM_RECORD_LEN: usize = 60;
const HINT_LEN: usize = PHANTOM_RECORD_LEN + 4;

const FLAG_FORWARD_ENABLED: u8 = 1 << 0;
const FLAG_REVERSE_ENABLED: u8 = 1 << 1;
const FLAG_TINY_COMPONENT: u8 = 1 << 2;

/// Serialize a phantom plus the facade checksum into a base64 hint.
pub fn encode_hint(phantom: &PhantomEndpoint, checksum: u32) -> String {
    let mut buf = Vec::with_capacity(HINT_LEN);
    buf.extend_from_slice(&phantom.forward_segment.id.to_le_bytes());
    buf.extend_from_slice(&phantom.reverse_segment.id.to_le_bytes());
    buf.extend_from_slice(&phantom.name_id.to_le_bytes());
    buf.extend_from_slice(&phantom.forward_weight.to_le_bytes());
    buf.extend_from_slice(&phantom.reverse_weight.to_le_bytes());
    buf.extend_from_slice(&phantom.forward_offset.to_le_bytes());
    buf.extend_from_slice(&phantom.reverse_offset.to_le_bytes());
    buf.extend_from_slice(&phantom.packed_geometry_id.to_le_bytes());
    buf.extend_from_slice(&phantom.component.id.to_le_bytes());
    buf.extend_from_slice(&phantom.location.lon.to_le_bytes());
    buf.extend_from_slice(&phantom.location.lat.to_le_bytes());
    buf.extend_from_slice(&phantom.input_location.lon.to_le_bytes());
    buf.extend_from_slice(&phantom.input_location.lat.to_le_bytes());
    buf.extend_from_slice(&phantom.fwd_segment_position.to_le_bytes());
    buf.push(phantom.forward_mode.0);
    buf.push(phantom.backward_mode.0);
    let mut flags = 0u8;
    if phantom.forward_segment.enabled {
        flags |= FLAG_FORWARD_ENABLED;
    }
    if phantom.reverse_segment.enabled {
        flags |= FLAG_REVERSE_ENABLED;
    }
    if phantom.component.is_tiny {
        flags |= FLAG_TINY_COMPONENT;
    }
    buf.push(flags);
    buf.extend_from_slice(&[0u8; 3]);
    debug_assert_eq!(buf.len(), PHANTOM_RECORD_LEN);
    buf.extend_from_slice(&checksum.to_le_bytes());
    STANDARD.encode(buf)
}

/// Decode a hint against the current facade. `Ok(None)` means the hint is
/// from another snapshot and the coordinate must be re-snapped; an
/// undecodable string is an input error.
pub fn decode_hint(
    facade: &dyn DataFacade,
    hint: &str,
) -> EngineResult<Option<PhantomEndpoint>> {
    let bytes = STANDARD
        .decode(hint)
        .map_err(|_| EngineError::InvalidInput("malformed hint".to_string()))?;
    if bytes.len() != HINT_LEN {
        return Err(EngineError::InvalidInput("malformed hint".to_string()));
    }

    let checksum = u32::from_le_bytes(bytes[60..64].try_into().unwrap());
    if checksum != facade.checksum() {
        return Ok(None);
    }

    let u32_at = |offset: usize| u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
    let i32_at = |offset: usize| i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());

    let flags = bytes[56];
    let phantom = PhantomEndpoint {
        forward_segment: SegmentId {
            id: u32_at(0),
            enabled: flags & FLAG_FORWARD_ENABLED != 0,
        },
        reverse_segment: SegmentId {
            id: u32_at(4),
            enabled: flags & FLAG_REVERSE_ENABLED != 0,
        },
        name_id: u32_at(8),
        forward_weight: i32_at(12),
        reverse_weight: i32_at(16),
        forward_offset: i32_at(20),
        reverse_offset: i32_at(24),
        packed_geometry_id: u32_at(28),
        component: SegmentComponent {
            id: u32_at(32),
            is_tiny: flags & FLAG_TINY_COMPONENT != 0,
        },
        location: Coordinate::new(i32_at(36), i32_at(40)),
        input_location: Coordinate::new(i32_at(44), i32_at(48)),
        fwd_segment_position: u16::from_le_bytes(bytes[52..54].try_into().unwrap()),
        forward_mode: TravelMode(bytes[54]),
        backward_mode: TravelMode(bytes[55]),
    };

    let in_range =
        |segment: &SegmentId| !segment.enabled || (segment.id as usize) < facade.num_nodes();
    if !in_range(&phantom.forward_segment)
        || !in_range(&phantom.reverse_segment)
        || !phantom.is_valid(facade.num_nodes())
    {
        return Err(EngineError::InvalidInput(
            "hint does not describe a valid snap".to_string(),
        ));
    }
    Ok(Some(phantom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::{linear_facade, phantom_on_node};

    #[test]
    fn roundtrip_on_the_same_facade() {
        let facade = linear_facade();
        let phantom = phantom_on_node(&facade, 2);
        let hint = encode_hint(&phantom, facade.checksum());
        let decoded = decode_hint(&facade, &hint).unwrap().expect("hint accepted");
        assert_eq!(decoded, phantom);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let facade = linear_facade();
        let phantom = phantom_on_node(&facade, 2);
        let hint = encode_hint(&phantom, facade.checksum().wrapping_add(1));
        assert!(decode_hint(&facade, &hint).unwrap().is_none());
    }

    #[test]
    fn garbage_is_an_input_error() {
        let facade = linear_facade();
        assert!(matches!(
            decode_hint(&facade, "not-base64!!"),
            Err(EngineError::InvalidInput(_))
        ));
        // valid base64 of the wrong length
        let short = STANDARD.encode(b"short");
        assert!(matches!(
            decode_hint(&facade, &short),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
