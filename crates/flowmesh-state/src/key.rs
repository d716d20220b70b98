//! Order-preserving composite key codec.
//!
//! Multi-part keys concatenate their components with a NUL terminator
//! after each one. Byte-lexicographic order of the encoded form then
//! matches tuple-wise order of the components, which is what prefix
//! and range scans over the sorted store rely on: the terminator sorts
//! below every other byte, so `("a",)` encodes strictly before
//! `("ab",)` and no component can be confused with a prefix of
//! another.
//!
//! Components must be NUL-free; that is enforced at encode time rather
//! than silently producing an ambiguous key.

use crate::error::{StateError, StateResult};

const TERMINATOR: u8 = 0x00;

/// Encode key components into their ordered byte representation.
pub fn encode_composite(parts: &[&str]) -> StateResult<Vec<u8>> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        if part.as_bytes().contains(&TERMINATOR) {
            return Err(StateError::CorruptKey(format!(
                "component {part:?} contains a NUL byte"
            )));
        }
        out.extend_from_slice(part.as_bytes());
        out.push(TERMINATOR);
    }
    Ok(out)
}

/// Decode an encoded composite key back into its components.
///
/// Fails with `CorruptKey` on truncated input (missing terminator) or
/// non-UTF-8 component bytes.
pub fn decode_composite(bytes: &[u8]) -> StateResult<Vec<String>> {
    if !bytes.is_empty() && bytes[bytes.len() - 1] != TERMINATOR {
        return Err(StateError::CorruptKey(
            "truncated key: missing terminator".to_string(),
        ));
    }

    // The trailing terminator always produces one final empty chunk;
    // every chunk before it is a component (possibly empty).
    let mut chunks: Vec<&[u8]> = bytes.split(|b| *b == TERMINATOR).collect();
    chunks.pop();

    let mut parts = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let part = std::str::from_utf8(chunk)
            .map_err(|e| StateError::CorruptKey(format!("invalid UTF-8 component: {e}")))?;
        parts.push(part.to_string());
    }
    Ok(parts)
}

/// Encode only the first components of a composite key, for prefix
/// scans over all keys sharing them.
pub fn encode_prefix(parts: &[&str]) -> StateResult<Vec<u8>> {
    encode_composite(parts)
}
