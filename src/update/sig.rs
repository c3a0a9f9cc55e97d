//! SIG(0) verification for SRP updates.
//!
//! The signature covers the entire received message with the SIG RDATA's
//! signature field zeroed in place. The ECDSA-P256/SHA-256 primitive comes
//! from ring; the 64-byte DNS key (x || y) is presented to ring with the
//! uncompressed-point tag prepended.

use std::ops::Range;

use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

use crate::registry::KeyRecord;

/// Verify an update signature against the host's KEY record.
///
/// `signature_range` locates the signature field inside `message`; the
/// canonical signed form is the message with exactly those bytes zeroed.
#[must_use]
pub(crate) fn verify_signature(
    key: &KeyRecord,
    message: &[u8],
    signature_range: Range<usize>,
    signature: &[u8],
) -> bool {
    if signature_range.end > message.len() || signature_range.is_empty() {
        return false;
    }

    let mut canonical = message.to_vec();
    for byte in &mut canonical[signature_range] {
        *byte = 0;
    }

    let mut point = Vec::with_capacity(1 + key.public_key().len());
    point.push(0x04);
    point.extend_from_slice(key.public_key());

    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point)
        .verify(&canonical, signature)
        .is_ok()
}
