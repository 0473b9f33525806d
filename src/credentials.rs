use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AES-GCM nonce length; the nonce is prepended to the ciphertext.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("ciphertext is too short to carry a nonce")]
    TooShort,
    #[error("decryption failed; wrong key or tampered data")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("credential payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The portal credentials a client hands over once; they travel onward only
/// inside an encrypted cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Serializes and seals the credentials. Output is `nonce || ciphertext`
    /// with a fresh random nonce per call.
    pub fn encrypt(&self, key: &[u8; 32]) -> Result<Vec<u8>, CredentialsError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let plaintext = serde_json::to_vec(self)?;
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| CredentialsError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn decrypt(key: &[u8; 32], sealed: &[u8]) -> Result<Self, CredentialsError> {
        if sealed.len() < NONCE_LEN {
            return Err(CredentialsError::TooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialsError::Decrypt)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
