//! Generic item identity helpers.
//!
//! The engine treats items as opaque payloads and never looks inside them;
//! callers (or the per-kind adapters in [`crate::adapters`]) supply
//! `extract_slot`/`extract_key` projections. This module only carries the
//! `Slot` type alias and the default-key helpers the adapters use.

/// A monotonically increasing, unsigned chain position.
pub type Slot = u64;

/// Stable identity of an item within a slot. Default is the slot's
/// decimal rendering; per-kind adapters override this.
pub fn default_key(slot: Slot) -> String {
    slot.to_string()
}

/// Transaction key: signature bytes rendered as lowercase hex.
/// Hex rendering is the engine's own job (not a codec capability) because
/// it is purely a fixed, deterministic byte-to-ascii mapping with no
/// chain-specific alphabet, unlike base58/base64 address rendering, which
/// stays out of this crate entirely.
pub fn signature_hex_key(signature: &[u8]) -> String {
    let mut out = String::with_capacity(signature.len() * 2);
    for byte in signature {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Event key: `event_id` if present, else `"{slot}:{call_idx}"`.
pub fn event_key(slot: Slot, event_id: Option<&str>, call_idx: u32) -> String {
    match event_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{slot}:{call_idx}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_key_is_slot_decimal() {
        assert_eq!(default_key(42), "42");
    }

    #[test]
    fn signature_hex_round_trips_known_bytes() {
        assert_eq!(signature_hex_key(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
        assert_eq!(signature_hex_key(&[]), "");
    }

    #[test]
    fn event_key_prefers_event_id() {
        assert_eq!(event_key(10, Some("evt-1"), 3), "evt-1");
        assert_eq!(event_key(10, None, 3), "10:3");
        assert_eq!(event_key(10, Some(""), 3), "10:3");
    }
}
