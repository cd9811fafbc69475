//! Per-tenant envelope encryption.
//!
//! Sensitive fact fields (content and meta) are wrapped at rest with
//! AES-256-GCM under a tenant-derived key: HKDF-SHA256 expands the
//! process-wide master key with the `tenant_id` as info, so no two tenants
//! share a data key and the master key never touches a row directly.
//!
//! Envelope wire form: `cenc1:aes256gcm:<base64(nonce ‖ ciphertext)>`.
//! Rows without the prefix are legacy plaintext and pass through on read.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use cortex_types::error::CryptoError;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Envelope prefix carrying the format version and algorithm identifier.
pub const ENVELOPE_PREFIX: &str = "cenc1:aes256gcm:";

/// Fields at or above this many bytes are encrypted when a key is present.
pub const ENCRYPTION_THRESHOLD: usize = 64;

const HKDF_SALT: &[u8] = b"cortex.tenant-key.v1";
const NONCE_LEN: usize = 12;

/// The process-wide 32-byte master secret, supplied out-of-band
/// (`CORTEX_MASTER_KEY`, base64). Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Decodes a base64 master key; must decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = B64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidMasterKey(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidMasterKey("key must be 32 bytes".to_string()))?;
        Ok(MasterKey(key))
    }

    /// Generates a fresh random master key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        MasterKey(key)
    }

    /// Derives the 32-byte data key for a tenant.
    fn tenant_key(&self, tenant_id: &str) -> Result<[u8; 32], CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.0);
        let mut okm = [0u8; 32];
        hk.expand(tenant_id.as_bytes(), &mut okm)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        Ok(okm)
    }
}

/// Seals and opens tenant-scoped envelopes. Holds an optional master key;
/// without one, non-sensitive values stay plaintext and sensitive values
/// refuse persistence.
pub struct Encrypter {
    master: Option<MasterKey>,
}

impl Encrypter {
    /// An encrypter over an optional master key.
    pub fn new(master: Option<MasterKey>) -> Self {
        Encrypter { master }
    }

    /// An encrypter with no key: plaintext passthrough for non-sensitive
    /// values only.
    pub fn disabled() -> Self {
        Encrypter { master: None }
    }

    /// True when a master key is present.
    pub fn has_key(&self) -> bool {
        self.master.is_some()
    }

    /// Wraps a value for persistence.
    ///
    /// With a key: values at or above [`ENCRYPTION_THRESHOLD`] bytes, and
    /// all `sensitive` values, are enveloped; short non-sensitive values
    /// stay plaintext. Without a key: sensitive values are refused
    /// ([`CryptoError::MasterKeyMissing`]); everything else passes through.
    pub fn seal(
        &self,
        plaintext: &str,
        tenant_id: &str,
        sensitive: bool,
    ) -> Result<String, CryptoError> {
        let Some(master) = &self.master else {
            if sensitive {
                return Err(CryptoError::MasterKeyMissing);
            }
            return Ok(plaintext.to_string());
        };
        if !sensitive && plaintext.len() < ENCRYPTION_THRESHOLD {
            return Ok(plaintext.to_string());
        }

        let mut key_bytes = master.tenant_key(tenant_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        key_bytes.zeroize();

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENVELOPE_PREFIX}{}", B64.encode(payload)))
    }

    /// Opens a stored value. Values without the envelope prefix are legacy
    /// plaintext and are returned unchanged.
    pub fn open(&self, stored: &str, tenant_id: &str) -> Result<String, CryptoError> {
        let Some(encoded) = stored.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(stored.to_string());
        };
        let master = self
            .master
            .as_ref()
            .ok_or(CryptoError::MasterKeyMissing)?;

        let payload = B64
            .decode(encoded)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        if payload.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt("envelope too short".to_string()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

        let mut key_bytes = master.tenant_key(tenant_id)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        key_bytes.zeroize();

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc() -> Encrypter {
        Encrypter::new(Some(MasterKey::generate()))
    }

    const LONG: &str = "This content is comfortably longer than the sixty-four byte envelope threshold.";

    #[test]
    fn round_trip() {
        let e = enc();
        let sealed = e.seal(LONG, "tenant-a", false).unwrap();
        assert!(sealed.starts_with(ENVELOPE_PREFIX));
        assert_eq!(e.open(&sealed, "tenant-a").unwrap(), LONG);
    }

    #[test]
    fn tenant_keys_do_not_cross() {
        let e = enc();
        let sealed = e.seal(LONG, "tenant-a", false).unwrap();
        assert!(e.open(&sealed, "tenant-b").is_err());
    }

    #[test]
    fn short_values_stay_plaintext() {
        let e = enc();
        assert_eq!(e.seal("tiny", "t", false).unwrap(), "tiny");
    }

    #[test]
    fn sensitive_short_values_are_enveloped() {
        let e = enc();
        let sealed = e.seal("sk_live_secret", "t", true).unwrap();
        assert!(sealed.starts_with(ENVELOPE_PREFIX));
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let e = enc();
        assert_eq!(e.open("plain old row", "t").unwrap(), "plain old row");
    }

    #[test]
    fn missing_key_refuses_sensitive() {
        let e = Encrypter::disabled();
        assert!(matches!(
            e.seal("sk_live_secret", "t", true),
            Err(CryptoError::MasterKeyMissing)
        ));
        assert_eq!(e.seal(LONG, "t", false).unwrap(), LONG);
    }

    #[test]
    fn master_key_base64_round_trip() {
        use base64::engine::general_purpose::STANDARD;
        let raw = [7u8; 32];
        let key = MasterKey::from_base64(&STANDARD.encode(raw)).unwrap();
        let e = Encrypter::new(Some(key));
        let sealed = e.seal(LONG, "t", false).unwrap();
        assert_eq!(e.open(&sealed, "t").unwrap(), LONG);
        assert!(MasterKey::from_base64("dG9vLXNob3J0").is_err());
    }
}
