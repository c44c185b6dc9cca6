/// Credential sealing using AES-256-GCM.
///
/// Tenant API keys are stored as a JSON envelope holding the base64
/// ciphertext and nonce. A single process-wide key opens every envelope;
/// plaintext only ever leaves this module as a zeroize-on-drop
/// [`SecretString`].
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use broker_core::SecretString;
use errors::EncryptionError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const ALGORITHM: &str = "AES-256-GCM";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Sealed credential as persisted in `CredentialRecord::encrypted_secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Base64-encoded ciphertext
    pub ciphertext: String,

    /// Base64-encoded nonce
    pub nonce: String,

    pub algorithm: String,
}

/// Opens and seals tenant credentials with the process key.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Builds a cipher from exactly 32 key bytes.
    pub fn new(key_bytes: &[u8]) -> Result<Self, EncryptionError> {
        if key_bytes.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKey {
                reason: "Key must be 32 bytes (256 bits)".to_string(),
            });
        }
        let cipher =
            Aes256Gcm::new_from_slice(key_bytes).map_err(|e| EncryptionError::InvalidKey {
                reason: e.to_string(),
            })?;
        Ok(Self { cipher })
    }

    /// Accepts the configured key material: base64 of 32 bytes, or a raw
    /// 32-byte string.
    pub fn from_key_material(material: &str) -> Result<Self, EncryptionError> {
        let material = material.trim();
        if let Ok(decoded) = general_purpose::STANDARD.decode(material) {
            let decoded = Zeroizing::new(decoded);
            if decoded.len() == KEY_LEN {
                return Self::new(&decoded);
            }
        }
        if material.len() == KEY_LEN {
            return Self::new(material.as_bytes());
        }
        Err(EncryptionError::InvalidKey {
            reason: "Expected base64 of 32 bytes or a 32-byte string".to_string(),
        })
    }

    /// Builds the process cipher from configuration. A missing key is a
    /// configuration problem, reported before any credential is touched.
    pub fn from_config(secrets: &config::SecretsConfig) -> Result<Self, EncryptionError> {
        let material = secrets
            .security_key
            .as_deref()
            .ok_or_else(|| EncryptionError::InvalidKey {
                reason: "security key is not configured".to_string(),
            })?;
        Self::from_key_material(material)
    }

    /// Fresh random key, base64 encoded, suitable for `BROKER_SECURITY_KEY`.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        general_purpose::STANDARD.encode(key.as_slice())
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed {
                reason: e.to_string(),
            })?;

        let sealed = SealedSecret {
            ciphertext: general_purpose::STANDARD.encode(&ciphertext),
            nonce: general_purpose::STANDARD.encode(nonce.as_slice()),
            algorithm: ALGORITHM.to_string(),
        };
        serde_json::to_string(&sealed).map_err(|e| EncryptionError::EncryptionFailed {
            reason: e.to_string(),
        })
    }

    pub fn open(&self, sealed: &str) -> Result<SecretString, EncryptionError> {
        let sealed: SealedSecret =
            serde_json::from_str(sealed).map_err(|e| EncryptionError::InvalidFormat {
                reason: e.to_string(),
            })?;

        if sealed.algorithm != ALGORITHM {
            return Err(EncryptionError::InvalidFormat {
                reason: format!("unsupported algorithm {}", sealed.algorithm),
            });
        }

        let ciphertext = general_purpose::STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| EncryptionError::InvalidFormat {
                reason: e.to_string(),
            })?;
        let nonce_bytes = general_purpose::STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| EncryptionError::InvalidFormat {
                reason: e.to_string(),
            })?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(EncryptionError::InvalidFormat {
                reason: format!("nonce must be {NONCE_LEN} bytes"),
            });
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|e| EncryptionError::DecryptionFailed {
                reason: e.to_string(),
            })?;

        let text = std::str::from_utf8(&plaintext).map_err(|e| {
            EncryptionError::DecryptionFailed {
                reason: e.to_string(),
            }
        })?;
        Ok(SecretString::new(text.to_string()))
    }
}
