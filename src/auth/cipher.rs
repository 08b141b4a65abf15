use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use tracing::error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// A stored field value: hex ciphertext plus its IV when encryption is
/// on, the plaintext with no IV otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    pub value: String,
    pub iv: Option<String>,
}

#[derive(Debug, Error)]
pub enum CipherError {
    /// Wrong key, wrong IV or corrupted ciphertext. Fatal for the
    /// record read; never downgraded to a missing-record outcome.
    #[error("field decryption failed")]
    Decrypt,
    #[error("stored field is not valid hex")]
    Encoding,
    #[error("encrypted field is missing its IV")]
    MissingIv,
    #[error("decrypted field is not valid UTF-8")]
    Utf8,
}

/// Symmetric protection for PII fields. `seal`/`open` guard the value
/// at rest; `lookup_key` yields a deterministic key so equality lookups
/// (email uniqueness, login) work without the plaintext in the table.
pub trait FieldCipher: Send + Sync {
    fn seal(&self, plaintext: &str) -> SealedField;
    fn open(&self, field: &SealedField) -> Result<String, CipherError>;
    fn lookup_key(&self, plaintext: &str) -> String;
}

/// Plaintext passthrough for deployments without an encryption key.
pub struct NoopCipher;

impl FieldCipher for NoopCipher {
    fn seal(&self, plaintext: &str) -> SealedField {
        SealedField {
            value: plaintext.to_owned(),
            iv: None,
        }
    }

    fn open(&self, field: &SealedField) -> Result<String, CipherError> {
        Ok(field.value.clone())
    }

    fn lookup_key(&self, plaintext: &str) -> String {
        plaintext.to_owned()
    }
}

/// AES-256-CBC with a fresh random 128-bit IV per field per record.
/// The lookup key is an HMAC-SHA256 blind index keyed off the same
/// server secret, so ciphertext never needs equality matching.
pub struct AesCbcCipher {
    key: [u8; 32],
}

impl AesCbcCipher {
    /// `hex_key` is the 64-hex-char server secret from configuration.
    pub fn new(hex_key: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY is not valid hex: {e}"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("ENCRYPTION_KEY must be exactly 32 bytes"))?;
        Ok(Self { key })
    }

    fn generate_iv() -> [u8; 16] {
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);
        iv
    }
}

impl FieldCipher for AesCbcCipher {
    fn seal(&self, plaintext: &str) -> SealedField {
        let iv = Self::generate_iv();
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        SealedField {
            value: hex::encode(ciphertext),
            iv: Some(hex::encode(iv)),
        }
    }

    fn open(&self, field: &SealedField) -> Result<String, CipherError> {
        let iv_hex = field.iv.as_deref().ok_or(CipherError::MissingIv)?;
        let iv: [u8; 16] = hex::decode(iv_hex)
            .map_err(|_| CipherError::Encoding)?
            .try_into()
            .map_err(|_| CipherError::Encoding)?;
        let ciphertext = hex::decode(&field.value).map_err(|_| CipherError::Encoding)?;
        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| {
                error!("aes-cbc unpad failure, wrong key or corrupted ciphertext");
                CipherError::Decrypt
            })?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    fn lookup_key(&self, plaintext: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("hmac accepts any key length");
        mac.update(b"email-index:");
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn seal_open_roundtrip() {
        let cipher = AesCbcCipher::new(KEY).expect("key parses");
        let sealed = cipher.seal("alice@example.com");
        assert_ne!(sealed.value, "alice@example.com");
        assert!(sealed.iv.is_some());
        assert_eq!(cipher.open(&sealed).expect("open"), "alice@example.com");
    }

    #[test]
    fn each_seal_uses_a_fresh_iv() {
        let cipher = AesCbcCipher::new(KEY).expect("key parses");
        let a = cipher.seal("same-plaintext");
        let b = cipher.seal("same-plaintext");
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.value, b.value);
    }

    #[test]
    fn lookup_key_is_deterministic_and_opaque() {
        let cipher = AesCbcCipher::new(KEY).expect("key parses");
        let first = cipher.lookup_key("alice@example.com");
        let second = cipher.lookup_key("alice@example.com");
        assert_eq!(first, second);
        assert_ne!(first, "alice@example.com");
        assert_ne!(first, cipher.lookup_key("bob@example.com"));
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let cipher = AesCbcCipher::new(KEY).expect("key parses");
        let other = AesCbcCipher::new(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("key parses");
        let sealed = cipher.seal("secret value");
        let err = other.open(&sealed).unwrap_err();
        assert!(matches!(err, CipherError::Decrypt | CipherError::Utf8));
    }

    #[test]
    fn open_rejects_missing_iv_and_bad_hex() {
        let cipher = AesCbcCipher::new(KEY).expect("key parses");
        let no_iv = SealedField {
            value: "deadbeef".into(),
            iv: None,
        };
        assert!(matches!(cipher.open(&no_iv), Err(CipherError::MissingIv)));

        let bad_hex = SealedField {
            value: "not-hex".into(),
            iv: Some(hex::encode([0u8; 16])),
        };
        assert!(matches!(cipher.open(&bad_hex), Err(CipherError::Encoding)));
    }

    #[test]
    fn new_rejects_short_keys() {
        assert!(AesCbcCipher::new("abcd").is_err());
        assert!(AesCbcCipher::new("zz").is_err());
    }

    #[test]
    fn noop_passes_values_through() {
        let cipher = NoopCipher;
        let sealed = cipher.seal("bob@example.com");
        assert_eq!(sealed.value, "bob@example.com");
        assert!(sealed.iv.is_none());
        assert_eq!(cipher.open(&sealed).expect("open"), "bob@example.com");
        assert_eq!(cipher.lookup_key("bob@example.com"), "bob@example.com");
    }
}
