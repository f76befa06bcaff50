//! UCS-2 helpers shared by the dispatcher (the only component that
//! touches UCS-2 ↔ raw-byte *command buffer* framing, spec.md §4.E) and
//! the authenticator, which needs the same little-endian code-unit
//! encoding to reconstruct the signed message (spec.md §4.C step 2).
//!
//! Variable names are stored internally as `Vec<u16>` code units with no
//! trailing NUL, matching spec.md §3's "no terminator in storage" rule.

/// Encodes an ASCII-only well-known variable name (`"PK"`, `"db"`, ...)
/// into UCS-2 code units. Only used for the small fixed set of Secure
/// Boot hierarchy / mode-control names; arbitrary guest-supplied names
/// arrive already as `Vec<u16>` from the dispatcher's buffer framing.
pub fn encode_ascii(name: &str) -> Vec<u16> {
    name.chars().map(|c| c as u16).collect()
}

/// Little-endian byte encoding of a UCS-2 name, with no terminator —
/// this is exactly the `name_ucs2` component of the signed message in
/// spec.md §4.C step 2 and §6.
pub fn to_le_bytes(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() * 2);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decodes a little-endian UCS-2 byte buffer (no terminator) back into
/// code units. `buf.len()` must be even; an odd length is a caller bug
/// (the dispatcher always hands over whole code units).
pub fn from_le_bytes(buf: &[u8]) -> Vec<u16> {
    buf.chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let units = encode_ascii("PK");
        let bytes = to_le_bytes(&units);
        assert_eq!(bytes, vec![b'P', 0, b'K', 0]);
        assert_eq!(from_le_bytes(&bytes), units);
    }
}
