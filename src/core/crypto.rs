//! WireGuard X25519 key material (C1).
//!
//! A [`Keypair`] is generated once during `setup` or `rotate` and stored
//! inside a [`crate::core::host::HostRecord`]. Encoding between base64 and
//! hex is total for any already-valid 32-byte key; decoding is the only
//! place that can fail.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// A 32-byte X25519 private/public keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    private: [u8; 32],
    public: [u8; 32],
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("private", &"<redacted>")
            .field("public", &hex::encode(self.public))
            .finish()
    }
}

impl Keypair {
    /// Generate a new keypair with a cryptographic RNG, clamped per X25519.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self {
            private: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    /// Reconstruct a keypair from a raw 32-byte private key, deriving the
    /// matching public key. The X25519 clamp is applied by `StaticSecret`.
    pub fn from_private_bytes(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self {
            private: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    pub fn private_bytes(&self) -> [u8; 32] {
        self.private
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    pub fn private_base64(&self) -> String {
        BASE64.encode(self.private)
    }

    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public)
    }

    pub fn private_hex(&self) -> String {
        hex::encode(self.private)
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public)
    }
}

/// Decode a base64-encoded 32-byte key. Fails if the input is not valid
/// base64 or does not decode to exactly 32 bytes.
pub fn decode_base64_key(field: &'static str, value: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(value.trim())
        .map_err(|err| Error::InvalidKey {
            field,
            reason: format!("input is not valid base64: {err}"),
        })?;
    to_32(field, &bytes)
}

/// Decode a lowercase-hex-encoded 32-byte key.
pub fn decode_hex_key(field: &'static str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value.trim()).map_err(|err| Error::InvalidKey {
        field,
        reason: format!("input is not valid hex: {err}"),
    })?;
    to_32(field, &bytes)
}

/// Re-encode a base64 key as lowercase hex; pure transform used when
/// deriving a `TunnelConfig` from a `HostRecord`.
pub fn base64_to_hex(field: &'static str, value: &str) -> Result<String> {
    let bytes = decode_base64_key(field, value)?;
    Ok(hex::encode(bytes))
}

fn to_32(field: &'static str, bytes: &[u8]) -> Result<[u8; 32]> {
    if bytes.len() != 32 {
        return Err(Error::InvalidKey {
            field,
            reason: format!("decoded length {} != 32", bytes.len()),
        });
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_keys() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.private_bytes(), b.private_bytes());
    }

    #[test]
    fn base64_round_trips_through_decode() {
        let kp = Keypair::generate();
        let decoded = decode_base64_key("private_key", &kp.private_base64()).unwrap();
        assert_eq!(decoded, kp.private_bytes());
    }

    #[test]
    fn hex_matches_base64_of_same_bytes() {
        let kp = Keypair::generate();
        let hex_of_bytes = hex::encode(kp.public_bytes());
        let via_transform = base64_to_hex("peer_public_key", &kp.public_base64()).unwrap();
        assert_eq!(hex_of_bytes, via_transform);
        assert_eq!(hex_of_bytes, kp.public_hex());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let short = BASE64.encode([0u8; 16]);
        let err = decode_base64_key("private_key", &short).unwrap_err();
        match err {
            Error::InvalidKey { field, .. } => assert_eq!(field, "private_key"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_non_base64() {
        let err = decode_base64_key("private_key", "not base64!!").unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }

    #[test]
    fn from_private_bytes_recovers_keypair() {
        let kp = Keypair::generate();
        let rebuilt = Keypair::from_private_bytes(kp.private_bytes());
        assert_eq!(rebuilt.public_bytes(), kp.public_bytes());
    }
}
