//! RSA cipher for config values
//!
//! Values are encrypted with PKCS#1 v1.5 in blocks of at most `k - 11` bytes
//! (`k` being the key size in bytes); the concatenated ciphertext is base64
//! encoded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

const PKCS1_PADDING_LEN: usize = 11;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("failed to read private key: {0}")]
    Io(#[from] std::io::Error),

    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("invalid base64 ciphertext: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext length {len} is not a multiple of the key size {key_size}")]
    BadLength { len: usize, key_size: usize },

    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub struct RsaCipher {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaCipher {
    pub fn new(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Load a PKCS#8 or PKCS#1 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, CipherError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self::new(private))
    }

    pub fn from_file(path: &str) -> Result<Self, CipherError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    pub fn generate(bits: usize) -> Result<Self, CipherError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
        Ok(Self::new(private))
    }

    fn key_size(&self) -> usize {
        self.public.size()
    }

    pub fn encrypt(&self, plain: &str) -> Result<String, CipherError> {
        let block = self.key_size() - PKCS1_PADDING_LEN;
        let mut rng = rand::thread_rng();
        let mut out = Vec::new();

        if plain.is_empty() {
            out.extend(self.public.encrypt(&mut rng, Pkcs1v15Encrypt, &[])?);
        }
        for chunk in plain.as_bytes().chunks(block) {
            out.extend(self.public.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?);
        }
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let data = STANDARD.decode(encoded.trim())?;
        let key_size = self.key_size();
        if data.is_empty() || data.len() % key_size != 0 {
            return Err(CipherError::BadLength {
                len: data.len(),
                key_size,
            });
        }

        let mut plain = Vec::with_capacity(data.len());
        for chunk in data.chunks(key_size) {
            plain.extend(self.private.decrypt(Pkcs1v15Encrypt, chunk)?);
        }
        Ok(String::from_utf8(plain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn cipher() -> &'static RsaCipher {
        static CIPHER: OnceLock<RsaCipher> = OnceLock::new();
        CIPHER.get_or_init(|| RsaCipher::generate(1024).unwrap())
    }

    #[test]
    fn test_short_value() {
        let enc = cipher().encrypt("s3cr3t").unwrap();
        assert_ne!(enc, "s3cr3t");
        assert_eq!(cipher().decrypt(&enc).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_value_longer_than_one_block() {
        let long = "x".repeat(300);
        let enc = cipher().encrypt(&long).unwrap();
        assert_eq!(cipher().decrypt(&enc).unwrap(), long);
    }

    #[test]
    fn test_empty_value() {
        let enc = cipher().encrypt("").unwrap();
        assert_eq!(cipher().decrypt(&enc).unwrap(), "");
    }

    #[test]
    fn test_decrypt_garbage() {
        assert!(matches!(
            cipher().decrypt("not base64!"),
            Err(CipherError::Base64(_))
        ));
        assert!(matches!(
            cipher().decrypt(&STANDARD.encode([1u8, 2, 3])),
            Err(CipherError::BadLength { .. })
        ));
    }

    #[test]
    fn test_invalid_pem() {
        assert!(matches!(
            RsaCipher::from_pem("-----BEGIN NOTHING-----"),
            Err(CipherError::InvalidKey(_))
        ));
    }
}
