//! At-rest encryption for message content.
//!
//! Format: `enc:` + base64(nonce ‖ ciphertext ‖ tag), AES-256-GCM with a random
//! 96-bit nonce per value. Values without the prefix are legacy plaintext and
//! pass through [`MessageCodec::decrypt`] unchanged.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use tracing::{debug, warn};

pub const ENCRYPTED_PREFIX: &str = "enc:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct MessageCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageCodec([REDACTED])")
    }
}

impl MessageCodec {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) }
    }

    /// Key material is base64 of exactly 32 bytes
    pub fn from_base64_key(encoded: &str) -> anyhow::Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY is not valid base64: {}", e))?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!("ENCRYPTION_KEY must decode to {} bytes, got {}", KEY_LEN, bytes.len())
        })?;
        Ok(Self::new(&key))
    }

    /// Random process-lifetime key. Anything it encrypts is lost on restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill(&mut key[..]);
        Self::new(&key)
    }

    /// Build from the configured key, falling back to an ephemeral key with a warning
    pub fn from_config(key: Option<&str>) -> anyhow::Result<Self> {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(encoded) => Self::from_base64_key(encoded),
            None => {
                warn!("ENCRYPTION_KEY not set; using a temporary key. Messages stored now will be unreadable after restart.");
                warn!("Generate a key with: openssl rand -base64 32");
                Ok(Self::ephemeral())
            }
        }
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Message encryption failed"))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(packed)))
    }

    /// Strict decryption; errors on anything that is not a value this key produced
    pub fn try_decrypt(&self, value: &str) -> anyhow::Result<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        let encoded = value
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("Value is not encrypted"))?;
        let packed = STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Invalid ciphertext encoding: {}", e))?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(anyhow::anyhow!("Ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("Ciphertext failed authentication"))?;
        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("Decrypted text is not UTF-8: {}", e))
    }

    /// Tolerant decryption: anything that fails to decrypt is returned as-is
    pub fn decrypt(&self, value: &str) -> String {
        match self.try_decrypt(value) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                if Self::is_encrypted(value) {
                    warn!("Returning undecryptable message unchanged: {}", e);
                } else {
                    debug!("Treating unencrypted message as legacy plaintext");
                }
                value.to_string()
            }
        }
    }
}
