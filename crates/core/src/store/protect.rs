// SPDX-License-Identifier: Apache-2.0

//! Opaque protect/unprotect facility for `sensitive` resources, scoped by
//! storage namespace (spec.md §3, §6's `value_enc` wire key). The real
//! cryptography is deliberately out of scope (spec.md §1); this module only
//! defines the seam a production KMS-backed implementation plugs into.

/// Encrypts/decrypts resource values at rest, namespaced so the same
/// plaintext under different namespaces need not produce the same
/// ciphertext.
pub trait SensitiveValueProtector: Send + Sync {
    fn protect(&self, namespace: &str, plaintext: &str) -> String;
    fn unprotect(&self, namespace: &str, ciphertext: &str) -> Result<String, ProtectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectError;

impl std::fmt::Display for ProtectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to unprotect value")
    }
}

impl std::error::Error for ProtectError {}

/// A reversible, namespace-salted codec. Good enough to prove the
/// round-trip and monotonicity invariants spec.md §8 requires; production
/// deployments inject a real implementation backed by a platform keystore.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReversibleProtector;

impl ReversibleProtector {
    fn keystream_byte(namespace: &str, index: usize) -> u8 {
        let salt = namespace.bytes().fold(0u8, |acc, b| acc.wrapping_add(b).rotate_left(3));
        salt.wrapping_add(index as u8)
    }
}

impl SensitiveValueProtector for ReversibleProtector {
    fn protect(&self, namespace: &str, plaintext: &str) -> String {
        let bytes: Vec<u8> = plaintext
            .as_bytes()
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ Self::keystream_byte(namespace, i))
            .collect();
        format!("v1:{}", encode_hex(&bytes))
    }

    fn unprotect(&self, namespace: &str, ciphertext: &str) -> Result<String, ProtectError> {
        let hex = ciphertext.strip_prefix("v1:").ok_or(ProtectError)?;
        let bytes = decode_hex(hex).ok_or(ProtectError)?;
        let plain: Vec<u8> = bytes
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ Self::keystream_byte(namespace, i))
            .collect();
        String::from_utf8(plain).map_err(|_| ProtectError)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
#[path = "protect_tests.rs"]
mod tests;
