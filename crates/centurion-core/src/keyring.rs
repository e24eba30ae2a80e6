//! AES-GCM secret keyring: decrypts `tool_configs`/`mcp_servers` auth
//! blobs stored as `v1:{iv_b64}:{tag_b64}:{ct_b64}`, with a previous-key
//! fallback so a key rotation doesn't break in-flight blobs. Key
//! provisioning/rotation infrastructure itself stays out of scope —
//! this only implements the wire format.

use crate::error::{CenturionError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

const WIRE_PREFIX: &str = "v1";

/// Derives a 256-bit AES key from an arbitrary-length keyring entry, the
/// same SHA-256-of-passphrase scheme.
fn derive_key(entry: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.as_bytes());
    hasher.finalize().into()
}

/// Encrypts `plaintext` under `key_entry`, producing the `v1:{iv_b64}:{tag_b64}:{ct_b64}`
/// wire format. AES-GCM's 16-byte tag is returned appended to the
/// ciphertext by the `aes-gcm` crate; it is split back out here so the
/// wire format keeps the tag addressable on its own.
pub fn encrypt(plaintext: &str, key_entry: &str) -> Result<String> {
    let key = derive_key(key_entry);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CenturionError::Internal(format!("keyring init: {e}")))?;
    let mut iv = [0u8; 12];
    rand::Rng::fill(&mut rand::thread_rng(), &mut iv);
    let nonce = Nonce::from_slice(&iv);

    let mut sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext.as_bytes(), aad: &[] })
        .map_err(|e| CenturionError::Internal(format!("keyring encrypt: {e}")))?;
    let tag = sealed.split_off(sealed.len() - 16);

    Ok(format!(
        "{WIRE_PREFIX}:{}:{}:{}",
        BASE64.encode(iv),
        BASE64.encode(tag),
        BASE64.encode(sealed),
    ))
}

/// Decrypts a `v1:{iv_b64}:{tag_b64}:{ct_b64}` blob under `key_entry`.
fn decrypt_with(blob_parts: (&str, &str, &str), key_entry: &str) -> Result<String> {
    let (iv_b64, tag_b64, ct_b64) = blob_parts;
    let iv = BASE64.decode(iv_b64).map_err(|e| CenturionError::InvalidInput(format!("bad iv: {e}")))?;
    let tag = BASE64.decode(tag_b64).map_err(|e| CenturionError::InvalidInput(format!("bad tag: {e}")))?;
    let ct = BASE64.decode(ct_b64).map_err(|e| CenturionError::InvalidInput(format!("bad ciphertext: {e}")))?;

    let key = derive_key(key_entry);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| CenturionError::Internal(format!("keyring init: {e}")))?;
    let nonce = Nonce::from_slice(&iv);

    let mut sealed = ct;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: &sealed, aad: &[] })
        .map_err(|_| CenturionError::InvalidInput("keyring decrypt failed".to_string()))?;
    String::from_utf8(plaintext).map_err(|e| CenturionError::Internal(format!("decrypted blob not utf8: {e}")))
}

/// Resolves encrypted secret blobs against an ordered list of candidate
/// keys: the current key first, then any previous keys kept around to
/// support rotation ("a previous-key fallback supports rotation").
pub struct Keyring {
    keys: Vec<String>,
}

impl Keyring {
    /// `current` must be non-empty; `previous` is tried in order if
    /// `current` fails to decrypt a given blob.
    pub fn new(current: String, previous: Vec<String>) -> Self {
        let mut keys = vec![current];
        keys.extend(previous);
        Self { keys }
    }

    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let mut parts = blob.splitn(4, ':');
        let prefix = parts.next().unwrap_or("");
        let iv = parts.next();
        let tag = parts.next();
        let ct = parts.next();
        let (Some(iv), Some(tag), Some(ct)) = (iv, tag, ct) else {
            return Err(CenturionError::InvalidInput("malformed secret blob".to_string()));
        };
        if prefix != WIRE_PREFIX {
            return Err(CenturionError::InvalidInput(format!("unsupported secret blob version '{prefix}'")));
        }

        let mut last_err = None;
        for key in &self.keys {
            match decrypt_with((iv, tag, ct), key) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| CenturionError::InvalidInput("no keys configured".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let blob = encrypt("sk-live-secret", "key-v2").unwrap();
        let keyring = Keyring::new("key-v2".to_string(), vec![]);
        assert_eq!(keyring.decrypt(&blob).unwrap(), "sk-live-secret");
    }

    #[test]
    fn falls_back_to_previous_key_after_rotation() {
        let blob = encrypt("sk-old-secret", "key-v1").unwrap();
        let keyring = Keyring::new("key-v2".to_string(), vec!["key-v1".to_string()]);
        assert_eq!(keyring.decrypt(&blob).unwrap(), "sk-old-secret");
    }

    #[test]
    fn rejects_malformed_blob() {
        let keyring = Keyring::new("key-v1".to_string(), vec![]);
        let err = keyring.decrypt("not-a-blob").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn rejects_blob_wrong_key() {
        let blob = encrypt("sk-live-secret", "key-v1").unwrap();
        let keyring = Keyring::new("key-v9".to_string(), vec![]);
        let err = keyring.decrypt(&blob);
        assert!(err.is_err());
    }
}
