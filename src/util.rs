//! Small shared helpers that don't deserve their own subsystem module.

use sha1::{Digest, Sha1};
use uuid::Uuid;

/// SHA-1 of `bytes`, truncated/fixed to the 20-byte SourceID width every
/// artifact format and metadata index in this crate expects.
pub fn sha1_20(bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// A fresh, unique message ID suitable for `samlp:*/@ID`. The `xsd:ID` type
/// requires a NCName (no leading digit), so the UUID is prefixed with `_`.
pub fn generate_message_id() -> String {
    format!("_{}", Uuid::new_v4())
}
