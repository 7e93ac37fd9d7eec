//! Default [`KeyCrypto`] implementation.
//!
//! Private keys are 64-byte extended keys (see [`crate::keys`]) stored as hex,
//! encrypted with [`crate::encryption`] when a password is supplied.

use zeroize::Zeroizing;

use hdtree_core::error::KeyError;
use hdtree_core::traits::{KeyCrypto, RawKey};
use hdtree_core::tree::KeyInsert;
use hdtree_core::types::KeyRow;

use crate::encryption::{self, KdfParams};
use crate::keys::ExtendedPrivateKey;

/// Argon2id + AES-256-GCM protection, curve25519 child derivation.
#[derive(Debug, Clone, Default)]
pub struct StandardKeyCrypto {
    kdf: KdfParams,
}

impl StandardKeyCrypto {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }
}

impl KeyCrypto for StandardKeyCrypto {
    fn decrypt_key(&self, row: &KeyRow, password: Option<&[u8]>) -> Result<RawKey, KeyError> {
        let stored = hex::decode(&row.hash)
            .map_err(|e| KeyError::Malformed(format!("key {}: {e}", row.id)))?;
        let stored = Zeroizing::new(stored);
        if !row.is_encrypted {
            return Ok(RawKey::new(stored.to_vec()));
        }
        let password = password.ok_or(KeyError::PasswordRequired)?;
        let plain = encryption::decrypt(&stored, password)?;
        Ok(RawKey::new(plain.to_vec()))
    }

    fn encrypt_key(&self, key: &RawKey, password: Option<&[u8]>) -> Result<KeyInsert, KeyError> {
        match password {
            None => Ok(KeyInsert::plain(key.as_bytes())),
            Some(password) => {
                let sealed = encryption::encrypt(key.as_bytes(), password, self.kdf)?;
                Ok(KeyInsert {
                    hash: hex::encode(sealed),
                    is_encrypted: true,
                    password_last_update: None,
                })
            }
        }
    }

    fn normalize_key_to_level(
        &self,
        row: &KeyRow,
        password: Option<&[u8]>,
        path: &[u32],
    ) -> Result<RawKey, KeyError> {
        let raw = self.decrypt_key(row, password)?;
        let key = ExtendedPrivateKey::from_bytes(raw.as_bytes())?;
        Ok(RawKey::new(key.derive_path(path).to_bytes().to_vec()))
    }

    fn to_public(&self, private: &RawKey) -> Result<RawKey, KeyError> {
        let key = ExtendedPrivateKey::from_bytes(private.as_bytes())?;
        Ok(RawKey::new(key.public().to_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Seed;
    use hdtree_core::constants::HARDENED;
    use hdtree_core::types::KeyId;

    fn crypto() -> StandardKeyCrypto {
        StandardKeyCrypto::new(KdfParams::light())
    }

    fn row(insert: KeyInsert) -> KeyRow {
        KeyRow {
            id: KeyId(1),
            hash: insert.hash,
            is_encrypted: insert.is_encrypted,
            password_last_update: insert.password_last_update,
        }
    }

    fn root() -> RawKey {
        let key = ExtendedPrivateKey::from_seed(&Seed::from_bytes([3; 32]));
        RawKey::new(key.to_bytes().to_vec())
    }

    #[test]
    fn encrypted_key_roundtrips_with_password() {
        let c = crypto();
        let stored = row(c.encrypt_key(&root(), Some(b"pw")).unwrap());
        assert!(stored.is_encrypted);
        assert_eq!(c.decrypt_key(&stored, Some(b"pw")).unwrap(), root());
    }

    #[test]
    fn encrypted_key_needs_password() {
        let c = crypto();
        let stored = row(c.encrypt_key(&root(), Some(b"pw")).unwrap());
        assert_eq!(c.decrypt_key(&stored, None).unwrap_err(), KeyError::PasswordRequired);
        assert_eq!(
            c.decrypt_key(&stored, Some(b"nope")).unwrap_err(),
            KeyError::InvalidPassword
        );
    }

    #[test]
    fn plain_key_ignores_password() {
        let c = crypto();
        let stored = row(c.encrypt_key(&root(), None).unwrap());
        assert!(!stored.is_encrypted);
        assert_eq!(c.decrypt_key(&stored, Some(b"anything")).unwrap(), root());
    }

    #[test]
    fn normalize_matches_direct_derivation() {
        let c = crypto();
        let stored = row(c.encrypt_key(&root(), Some(b"pw")).unwrap());
        let path = [HARDENED + 44, HARDENED + 1815, HARDENED];
        let normalized = c.normalize_key_to_level(&stored, Some(b"pw"), &path).unwrap();
        let direct = ExtendedPrivateKey::from_bytes(root().as_bytes())
            .unwrap()
            .derive_path(&path);
        assert_eq!(normalized.as_bytes(), &direct.to_bytes()[..]);
    }

    #[test]
    fn garbage_hash_is_malformed() {
        let stored = KeyRow {
            id: KeyId(9),
            hash: "zz".into(),
            is_encrypted: false,
            password_last_update: None,
        };
        assert!(matches!(
            crypto().decrypt_key(&stored, None),
            Err(KeyError::Malformed(_))
        ));
    }
}
