//! AES-256-GCM key encryption with an argon2id password KDF.
//!
//! The KDF cost parameters travel with the ciphertext, so keys encrypted
//! under different settings stay readable.
//!
//! # Wire format
//! ```text
//! version (1) || m_cost (4, BE) || t_cost (4, BE) || p_cost (4, BE)
//!     || salt (16) || nonce (12) || ciphertext + auth_tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use hdtree_core::error::KeyError;

/// Current wire format version.
const FORMAT_VERSION: u8 = 1;

/// Header length: version plus three cost parameters.
const HEADER_LEN: usize = 1 + 4 + 4 + 4;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Minimum encrypted payload size (header + salt + nonce + auth tag).
const MIN_ENCRYPTED_LEN: usize = HEADER_LEN + SALT_LEN + NONCE_LEN + 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Number of passes.
    pub t_cost: u32,
    /// Degree of parallelism.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests and throwaway wallets.
    pub fn light() -> Self {
        Self {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Derive a 256-bit encryption key from a password and salt.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KeyError> {
    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| KeyError::Encryption(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|e| KeyError::Encryption(e.to_string()))?;
    Ok(key)
}

/// Encrypt plaintext with a password.
///
/// Generates a random salt and nonce for every call.
pub fn encrypt(plaintext: &[u8], password: &[u8], params: KdfParams) -> Result<Vec<u8>, KeyError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| KeyError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| KeyError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + SALT_LEN + NONCE_LEN + ciphertext.len());
    result.push(FORMAT_VERSION);
    result.extend_from_slice(&params.m_cost.to_be_bytes());
    result.extend_from_slice(&params.t_cost.to_be_bytes());
    result.extend_from_slice(&params.p_cost.to_be_bytes());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(buf)
}

/// Decrypt data produced by [`encrypt`].
///
/// Returns [`KeyError::InvalidPassword`] when the authentication tag does not
/// verify.
pub fn decrypt(encrypted: &[u8], password: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    if encrypted.len() < MIN_ENCRYPTED_LEN {
        return Err(KeyError::Malformed(format!(
            "encrypted data too short: {} < {MIN_ENCRYPTED_LEN}",
            encrypted.len()
        )));
    }
    if encrypted[0] != FORMAT_VERSION {
        return Err(KeyError::Malformed(format!(
            "unknown format version {}",
            encrypted[0]
        )));
    }
    let params = KdfParams {
        m_cost: read_u32(encrypted, 1),
        t_cost: read_u32(encrypted, 5),
        p_cost: read_u32(encrypted, 9),
    };
    let salt = &encrypted[HEADER_LEN..HEADER_LEN + SALT_LEN];
    let nonce_bytes = &encrypted[HEADER_LEN + SALT_LEN..HEADER_LEN + SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted[HEADER_LEN + SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| KeyError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeyError::InvalidPassword)
}
