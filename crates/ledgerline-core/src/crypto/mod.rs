//! Envelope encryption for per-tenant secrets and field values.
//!
//! Each tenant owns a 32-byte data key (its signing and field-encryption
//! secret). The registry stores that key only in wrapped form: encrypted
//! under a key-encryption key derived from the process master key. Field
//! values inside tenant schemas are encrypted with the tenant key directly.
//!
//! Wire format for both layers: `nonceHex:tagHex:ciphertextHex`, all
//! lowercase hex. A value without exactly two colon separators is legacy
//! plaintext and is treated as non-decryptable for authenticated reads.
//!
//! AES-256-GCM throughout: 96-bit nonces, 128-bit tags. A fresh nonce is
//! drawn from the OS RNG for every encryption. Tag verification is never
//! optional; a mismatch aborts the operation with
//! [`CoreError::DecryptionFailed`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::CoreError;

/// Key size in bytes (256 bits)
pub const KEY_SIZE: usize = 32;
/// Nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Fixed salt for deriving the key-encryption key from the master key.
/// Changing it invalidates every stored tenant secret.
const KEK_SALT: &[u8] = b"ledgerline.tenant-secret.kek.v1";

/// Process master key, validated once at startup.
///
/// Debug output is redacted and the material is zeroized on drop.
pub struct MasterKey {
    material: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Parse the 64-hex-char master key from the environment.
    pub fn from_hex(value: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(value.trim()).map_err(|_| {
            CoreError::configuration("GLOBAL_MASTER_KEY must be hex-encoded")
        })?;
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::configuration(format!(
                "GLOBAL_MASTER_KEY must decode to {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut material = [0u8; KEY_SIZE];
        material.copy_from_slice(&bytes);
        Ok(Self { material })
    }

    fn as_bytes(&self) -> &[u8] {
        &self.material
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Wraps and unwraps tenant secrets under the process master key.
pub struct EnvelopeCrypto {
    kek: [u8; KEY_SIZE],
}

impl EnvelopeCrypto {
    /// Derive the key-encryption key from the master key with a fixed salt.
    pub fn new(master_key: &MasterKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(master_key.as_bytes());
        hasher.update(KEK_SALT);
        let digest = hasher.finalize();

        let mut kek = [0u8; KEY_SIZE];
        kek.copy_from_slice(&digest);
        Self { kek }
    }

    /// Generate a fresh 32-byte tenant secret.
    pub fn generate_tenant_secret() -> Vec<u8> {
        let mut secret = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut secret);
        secret
    }

    /// Encrypt a tenant secret for storage in the registry.
    pub fn wrap(&self, secret: &[u8]) -> Result<String, CoreError> {
        encrypt_with_key(secret, &self.kek)
    }

    /// Decrypt a stored tenant secret blob.
    pub fn unwrap(&self, blob: &str) -> Result<Vec<u8>, CoreError> {
        decrypt_with_key(blob, &self.kek)
    }
}

impl Drop for EnvelopeCrypto {
    fn drop(&mut self) {
        self.kek.zeroize();
    }
}

/// Encrypt a field value with the tenant's data key.
pub fn encrypt_field(plaintext: &str, tenant_secret: &[u8]) -> Result<String, CoreError> {
    encrypt_with_key(plaintext.as_bytes(), tenant_secret)
}

/// Decrypt a field value with the tenant's data key.
pub fn decrypt_field(blob: &str, tenant_secret: &[u8]) -> Result<String, CoreError> {
    let bytes = decrypt_with_key(blob, tenant_secret)?;
    String::from_utf8(bytes).map_err(|_| CoreError::DecryptionFailed)
}

/// Whether a stored value is in the encrypted wire format.
///
/// Legacy plaintext rows lack the two colon separators; they must not be
/// fed to [`decrypt_field`].
pub fn is_encrypted_format(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 3
        && parts[0].len() == NONCE_SIZE * 2
        && parts[1].len() == TAG_SIZE * 2
        && !parts[2].is_empty()
        && parts
            .iter()
            .all(|p| p.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CoreError> {
    if key.len() != KEY_SIZE {
        return Err(CoreError::Crypto {
            message: format!("expected {}-byte key, got {}", KEY_SIZE, key.len()),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CoreError::Crypto {
        message: format!("cipher setup failed: {}", e),
    })
}

fn encrypt_with_key(plaintext: &[u8], key: &[u8]) -> Result<String, CoreError> {
    let cipher = cipher_for(key)?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    // aes-gcm appends the 16-byte tag to the ciphertext
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CoreError::Crypto {
            message: "encryption failed".to_string(),
        })?;
    let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    Ok(format!(
        "{}:{}:{}",
        hex::encode(nonce),
        hex::encode(tag),
        hex::encode(body)
    ))
}

fn decrypt_with_key(blob: &str, key: &[u8]) -> Result<Vec<u8>, CoreError> {
    let cipher = cipher_for(key)?;

    let mut parts = blob.splitn(3, ':');
    let (nonce_hex, tag_hex, body_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(n), Some(t), Some(b)) => (n, t, b),
        _ => return Err(CoreError::DecryptionFailed),
    };

    let nonce = hex::decode(nonce_hex).map_err(|_| CoreError::DecryptionFailed)?;
    let tag = hex::decode(tag_hex).map_err(|_| CoreError::DecryptionFailed)?;
    let body = hex::decode(body_hex).map_err(|_| CoreError::DecryptionFailed)?;
    if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(CoreError::DecryptionFailed);
    }

    let mut sealed = body;
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
        .map_err(|_| CoreError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_key() -> MasterKey {
        MasterKey::from_hex(&"ab".repeat(KEY_SIZE)).unwrap()
    }

    #[test]
    fn test_master_key_validation() {
        assert!(MasterKey::from_hex(&"ab".repeat(KEY_SIZE)).is_ok());
        assert!(MasterKey::from_hex("deadbeef").is_err());
        assert!(MasterKey::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let envelope = EnvelopeCrypto::new(&master_key());
        let secret = EnvelopeCrypto::generate_tenant_secret();

        let blob = envelope.wrap(&secret).expect("wrap");
        assert!(is_encrypted_format(&blob));

        let recovered = envelope.unwrap(&blob).expect("unwrap");
        assert_eq!(recovered, secret);
    }

    #[test]
    fn test_unwrap_detects_tampering() {
        let envelope = EnvelopeCrypto::new(&master_key());
        let blob = envelope
            .wrap(&EnvelopeCrypto::generate_tenant_secret())
            .unwrap();

        // Flip one nibble in the ciphertext section
        let mut tampered: Vec<char> = blob.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == '0' { '1' } else { '0' };
        let tampered: String = tampered.into_iter().collect();

        assert!(matches!(
            envelope.unwrap(&tampered),
            Err(CoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_unwrap_rejects_wrong_master_key() {
        let envelope_a = EnvelopeCrypto::new(&master_key());
        let envelope_b = EnvelopeCrypto::new(&MasterKey::from_hex(&"cd".repeat(KEY_SIZE)).unwrap());

        let blob = envelope_a
            .wrap(&EnvelopeCrypto::generate_tenant_secret())
            .unwrap();
        assert!(matches!(
            envelope_b.unwrap(&blob),
            Err(CoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_field_encryption_format() {
        let secret = EnvelopeCrypto::generate_tenant_secret();
        let blob = encrypt_field("High Value Client", &secret).unwrap();

        assert_eq!(blob.matches(':').count(), 2);
        assert_ne!(blob, "High Value Client");
        assert!(is_encrypted_format(&blob));
        assert_eq!(decrypt_field(&blob, &secret).unwrap(), "High Value Client");
    }

    #[test]
    fn test_fresh_nonce_every_encryption() {
        let secret = EnvelopeCrypto::generate_tenant_secret();
        let a = encrypt_field("same plaintext", &secret).unwrap();
        let b = encrypt_field("same plaintext", &secret).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_legacy_plaintext_not_decryptable() {
        assert!(!is_encrypted_format("Just A Customer Name"));
        assert!(!is_encrypted_format("a:b"));
        let secret = EnvelopeCrypto::generate_tenant_secret();
        assert!(decrypt_field("Just A Customer Name", &secret).is_err());
    }

    #[test]
    fn test_tenant_secret_is_key_sized() {
        assert_eq!(EnvelopeCrypto::generate_tenant_secret().len(), KEY_SIZE);
    }
}
