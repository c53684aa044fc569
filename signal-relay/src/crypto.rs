use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::Sha256;

use crate::{Error, Result};

const KEY_SALT: &[u8] = b"signal-relay/credential-store/v1";
const KDF_ROUNDS: u32 = 10_000;
const NONCE_SIZE: usize = 12;
const SECRET_BYTES: usize = 32;

/// Encrypts exchange credentials at rest with AES-256-GCM.
///
/// The key is derived once from the configured passphrase. Every call to
/// `encrypt` draws a fresh nonce, which is stored in front of the ciphertext
/// and the whole thing hex encoded.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Derive the cipher key from a passphrase
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::Crypto("Encryption passphrase is empty".to_string()));
        }

        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KEY_SALT, KDF_ROUNDS, &mut key);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;

        Ok(Self { cipher })
    }

    /// Encrypt an optional value; `None` passes through untouched.
    pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|text| self.seal(text)).transpose()
    }

    /// Decrypt an optional value; `None` passes through untouched.
    pub fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<String>> {
        ciphertext.map(|text| self.open(text)).transpose()
    }

    fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    fn open(&self, encoded: &str) -> Result<String> {
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))?;
        if bytes.len() <= NONCE_SIZE {
            return Err(Error::Crypto("Decryption failed: ciphertext too short".to_string()));
        }

        let (nonce, sealed) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
    }
}

/// Random hex token used as a bot's webhook secret
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::from_passphrase("test-passphrase").unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher();
        let encrypted = cipher.encrypt(Some("api-key-123")).unwrap().unwrap();

        assert_ne!(encrypted, "api-key-123");
        assert_eq!(
            cipher.decrypt(Some(&encrypted)).unwrap().as_deref(),
            Some("api-key-123")
        );
    }

    #[test]
    fn test_none_passes_through() {
        let cipher = cipher();
        assert_eq!(cipher.encrypt(None).unwrap(), None);
        assert_eq!(cipher.decrypt(None).unwrap(), None);
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let cipher = cipher();
        let first = cipher.encrypt(Some("same")).unwrap();
        let second = cipher.encrypt(Some("same")).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let encrypted = cipher().encrypt(Some("secret")).unwrap();
        let decrypted = cipher().decrypt(encrypted.as_deref()).unwrap();

        assert_eq!(decrypted.as_deref(), Some("secret"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = cipher().encrypt(Some("secret")).unwrap();
        let other = CredentialCipher::from_passphrase("other-passphrase").unwrap();

        assert!(matches!(
            other.decrypt(encrypted.as_deref()),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_malformed_ciphertext_fails() {
        let cipher = cipher();
        assert!(cipher.decrypt(Some("not-hex")).is_err());
        assert!(cipher.decrypt(Some("abcd")).is_err());

        let mut tampered = cipher.encrypt(Some("secret")).unwrap().unwrap();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(cipher.decrypt(Some(&tampered)).is_err());
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();

        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
