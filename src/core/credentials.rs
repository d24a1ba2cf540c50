use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Decrypts agent passwords stored by the administrative layer.
///
/// Stored values are base64(nonce || AES-256-GCM ciphertext) under a key
/// derived from the configured encryption key. Without a configured key the
/// stored value is used as-is.
pub struct CredentialCipher {
    cipher: Option<Aes256Gcm>,
}

/// HMAC-SHA256(secret, "filestage-credentials-v1") so any passphrase length
/// yields a 256-bit key.
fn derive_key(secret: &str) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"filestage-credentials-v1")
        .map_err(|e| anyhow::anyhow!("HMAC key rejected: {}", e))?;
    mac.update(secret.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

impl CredentialCipher {
    pub fn new(encryption_key: Option<&str>) -> Result<Self> {
        let cipher = match encryption_key.filter(|k| !k.is_empty()) {
            Some(secret) => {
                let key = derive_key(secret)?;
                Some(
                    Aes256Gcm::new_from_slice(&key)
                        .map_err(|e| anyhow::anyhow!("Invalid AES-256 key: {}", e))?,
                )
            }
            None => None,
        };
        Ok(Self { cipher })
    }

    #[cfg(test)]
    pub fn plaintext() -> Self {
        Self { cipher: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt a password for storage. Used by operators seeding agents.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let Some(cipher) = &self.cipher else {
            return Err(anyhow::anyhow!("No encryption key configured"));
        };
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(cipher) = &self.cipher else {
            return Ok(stored.to_string());
        };
        let combined = base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }
}
