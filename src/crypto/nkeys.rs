/// Ed25519 key pairs with typed, checksummed base32 encoding
///
/// Public keys are rendered as base32 (RFC 4648, no padding) over
/// `role byte || 32 key bytes || crc16`. The role byte makes the first
/// character of every key identify its role: `O` operator, `A` account,
/// `U` user. Seeds carry an extra `S` prefix ahead of the role.
use crc::{Crc, CRC_16_XMODEM};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

const PREFIX_BYTE_SEED: u8 = 18 << 3;
const PREFIX_BYTE_OPERATOR: u8 = 14 << 3;
const PREFIX_BYTE_ACCOUNT: u8 = 0;
const PREFIX_BYTE_USER: u8 = 20 << 3;

const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// Errors raised while decoding or using keys
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key encoding")]
    InvalidEncoding,

    #[error("invalid key checksum")]
    InvalidChecksum,

    #[error("unexpected key role: expected {expected:?}, found {found}")]
    WrongRole { expected: KeyRole, found: String },

    #[error("invalid key length")]
    InvalidLength,

    #[error("signature verification failed")]
    BadSignature,
}

/// Role a key plays in the trust hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Operator,
    Account,
    User,
}

impl KeyRole {
    fn prefix_byte(self) -> u8 {
        match self {
            KeyRole::Operator => PREFIX_BYTE_OPERATOR,
            KeyRole::Account => PREFIX_BYTE_ACCOUNT,
            KeyRole::User => PREFIX_BYTE_USER,
        }
    }

    fn from_prefix_byte(b: u8) -> Option<Self> {
        match b {
            PREFIX_BYTE_OPERATOR => Some(KeyRole::Operator),
            PREFIX_BYTE_ACCOUNT => Some(KeyRole::Account),
            PREFIX_BYTE_USER => Some(KeyRole::User),
            _ => None,
        }
    }
}

/// CRC-16/XMODEM, appended little-endian to every encoded key
const KEY_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

fn crc16(data: &[u8]) -> u16 {
    KEY_CRC.checksum(data)
}

fn encode_with_checksum(mut raw: Vec<u8>) -> String {
    let crc = crc16(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    base32::encode(ALPHABET, &raw)
}

fn decode_with_checksum(text: &str) -> Result<Vec<u8>, KeyError> {
    let mut raw = base32::decode(ALPHABET, text).ok_or(KeyError::InvalidEncoding)?;
    if raw.len() < 3 {
        return Err(KeyError::InvalidLength);
    }
    let split = raw.len() - 2;
    let expected = u16::from_le_bytes([raw[split], raw[split + 1]]);
    raw.truncate(split);
    if crc16(&raw) != expected {
        return Err(KeyError::InvalidChecksum);
    }
    Ok(raw)
}

/// Encode raw Ed25519 public key bytes as a public key of the given role
pub fn encode_public_key(role: KeyRole, key: &[u8; 32]) -> String {
    let mut raw = Vec::with_capacity(35);
    raw.push(role.prefix_byte());
    raw.extend_from_slice(key);
    encode_with_checksum(raw)
}

/// Decode a public key, returning its role and raw bytes
pub fn decode_public_key(text: &str) -> Result<(KeyRole, [u8; 32]), KeyError> {
    let raw = decode_with_checksum(text)?;
    if raw.len() != 33 {
        return Err(KeyError::InvalidLength);
    }
    let role = KeyRole::from_prefix_byte(raw[0]).ok_or(KeyError::InvalidEncoding)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&raw[1..]);
    Ok((role, key))
}

/// Decode a public key and require it to have the given role
pub fn decode_public_key_as(role: KeyRole, text: &str) -> Result<[u8; 32], KeyError> {
    let (found, key) = decode_public_key(text)?;
    if found != role {
        return Err(KeyError::WrongRole {
            expected: role,
            found: text.chars().next().map(String::from).unwrap_or_default(),
        });
    }
    Ok(key)
}

/// True when `text` is a well-formed public key of the given role
pub fn is_public_key(role: KeyRole, text: &str) -> bool {
    decode_public_key_as(role, text).is_ok()
}

/// Verify an Ed25519 signature made by the holder of `public_key`
pub fn verify(public_key: &str, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
    let (_, key) = decode_public_key(public_key)?;
    let verifying_key = VerifyingKey::from_bytes(&key).map_err(|_| KeyError::InvalidEncoding)?;
    let signature = Signature::from_slice(signature).map_err(|_| KeyError::BadSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| KeyError::BadSignature)
}

/// Ed25519 key pair bound to a role
#[derive(Clone)]
pub struct KeyPair {
    role: KeyRole,
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("role", &self.role)
            .field("public_key", &self.public_key())
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(role: KeyRole) -> Self {
        Self {
            role,
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn new_operator() -> Self {
        Self::generate(KeyRole::Operator)
    }

    pub fn new_account() -> Self {
        Self::generate(KeyRole::Account)
    }

    /// Restore a key pair from its encoded seed
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let raw = decode_with_checksum(seed)?;
        if raw.len() != 34 {
            return Err(KeyError::InvalidLength);
        }
        if raw[0] & 0xF8 != PREFIX_BYTE_SEED {
            return Err(KeyError::InvalidEncoding);
        }
        let role_byte = ((raw[0] & 0x07) << 5) | ((raw[1] & 0xF8) >> 3);
        let role = KeyRole::from_prefix_byte(role_byte).ok_or(KeyError::InvalidEncoding)?;
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&raw[2..]);
        Ok(Self {
            role,
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    /// Encoded public key, e.g. `ABCD...` for an account
    pub fn public_key(&self) -> String {
        encode_public_key(self.role, self.signing_key.verifying_key().as_bytes())
    }

    /// Encoded seed, e.g. `SA...` for an account
    pub fn seed(&self) -> String {
        let role = self.role.prefix_byte();
        let mut raw = Vec::with_capacity(36);
        raw.push(PREFIX_BYTE_SEED | (role >> 5));
        raw.push((role & 0x1F) << 3);
        raw.extend_from_slice(self.signing_key.as_bytes());
        encode_with_checksum(raw)
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_prefixes() {
        assert!(KeyPair::new_operator().public_key().starts_with('O'));
        assert!(KeyPair::new_account().public_key().starts_with('A'));
        assert!(KeyPair::generate(KeyRole::User).public_key().starts_with('U'));
        assert_eq!(KeyPair::new_account().public_key().len(), 56);
    }

    #[test]
    fn test_seed_restores_same_key() {
        let kp = KeyPair::new_account();
        let seed = kp.seed();
        assert!(seed.starts_with("SA"));

        let restored = KeyPair::from_seed(&seed).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
        assert_eq!(restored.role(), KeyRole::Account);
    }

    #[test]
    fn test_role_is_enforced() {
        let operator = KeyPair::new_operator().public_key();
        assert!(is_public_key(KeyRole::Operator, &operator));
        assert!(!is_public_key(KeyRole::Account, &operator));
        assert!(!is_public_key(KeyRole::Account, "five"));
        assert!(!is_public_key(KeyRole::Account, ""));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let key = KeyPair::new_account().public_key();
        let mut chars: Vec<char> = key.chars().collect();
        chars[10] = if chars[10] == 'B' { 'C' } else { 'B' };
        let corrupted: String = chars.into_iter().collect();
        assert!(decode_public_key(&corrupted).is_err());
    }

    #[test]
    fn test_checksum_is_crc16_xmodem() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::new_operator();
        let sig = kp.sign(b"payload");
        assert!(verify(&kp.public_key(), b"payload", &sig).is_ok());
        assert_eq!(
            verify(&kp.public_key(), b"tampered", &sig),
            Err(KeyError::BadSignature)
        );

        let other = KeyPair::new_operator();
        assert!(verify(&other.public_key(), b"payload", &sig).is_err());
    }
}
