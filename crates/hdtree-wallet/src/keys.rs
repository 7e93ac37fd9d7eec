//! Seeds and hierarchical key derivation over curve25519.
//!
//! An extended key is 64 bytes: the key (a scalar for private keys, a
//! compressed Edwards point for public keys) followed by a 32-byte chain
//! code. Child tweaks come from BLAKE3 keyed by the parent chain code:
//!
//! ```text
//! hardened: XOF(chain_code; 0x00 || scalar || index)
//! soft:     XOF(chain_code; 0x02 || point  || index)
//! tweak = wide_reduce(out[..64]), child chain code = out[64..96]
//! ```
//!
//! The child private scalar is `s + tweak` and the child public point is
//! `P + tweak·G`, so soft children can be derived from either side.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use hdtree_core::address::{AddressType, encode_address};
use hdtree_core::constants::is_hardened;
use hdtree_core::error::KeyError;

/// BLAKE3 KDF context for turning a seed into a root key.
const ROOT_CONTEXT: &str = "hdtree 2024-06 root key derivation v1";

/// Length of an encoded extended key.
pub const EXTENDED_KEY_LEN: usize = 64;

const HARDENED_TAG: u8 = 0x00;
const SOFT_TAG: u8 = 0x02;

/// A 32-byte master seed.
///
/// Secret material is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    /// Generate a random seed from the OS cryptographic RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

fn tweak(chain_code: &[u8; 32], tag: u8, key: &[u8; 32], index: u32) -> (Scalar, [u8; 32]) {
    let mut hasher = blake3::Hasher::new_keyed(chain_code);
    hasher.update(&[tag]);
    hasher.update(key);
    hasher.update(&index.to_be_bytes());
    let mut out = [0u8; 96];
    hasher.finalize_xof().fill(&mut out);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&out[..64]);
    let mut next_chain = [0u8; 32];
    next_chain.copy_from_slice(&out[64..]);
    let t = Scalar::from_bytes_mod_order_wide(&wide);
    out.zeroize();
    wide.zeroize();
    (t, next_chain)
}

fn split(bytes: &[u8]) -> Result<([u8; 32], [u8; 32]), KeyError> {
    if bytes.len() != EXTENDED_KEY_LEN {
        return Err(KeyError::Malformed(format!(
            "extended key must be {EXTENDED_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&bytes[..32]);
    chain_code.copy_from_slice(&bytes[32..]);
    Ok((key, chain_code))
}

/// A private scalar with its chain code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExtendedPrivateKey {
    scalar: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedPrivateKey {
    /// Root key of a seed.
    pub fn from_seed(seed: &Seed) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(ROOT_CONTEXT);
        hasher.update(seed.as_bytes());
        let mut out = [0u8; 96];
        hasher.finalize_xof().fill(&mut out);
        let mut wide = [0u8; 64];
        wide.copy_from_slice(&out[..64]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&out[64..]);
        let scalar = Scalar::from_bytes_mod_order_wide(&wide).to_bytes();
        out.zeroize();
        wide.zeroize();
        Self { scalar, chain_code }
    }

    /// Decode the 64-byte form produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let (scalar, chain_code) = split(bytes)?;
        let canonical: Option<Scalar> = Scalar::from_canonical_bytes(scalar).into();
        if canonical.is_none() {
            return Err(KeyError::Malformed("non-canonical scalar".into()));
        }
        Ok(Self { scalar, chain_code })
    }

    pub fn to_bytes(&self) -> [u8; EXTENDED_KEY_LEN] {
        let mut out = [0u8; EXTENDED_KEY_LEN];
        out[..32].copy_from_slice(&self.scalar);
        out[32..].copy_from_slice(&self.chain_code);
        out
    }

    fn as_scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.scalar)
    }

    pub fn public(&self) -> ExtendedPublicKey {
        ExtendedPublicKey {
            point: EdwardsPoint::mul_base(&self.as_scalar()).compress().to_bytes(),
            chain_code: self.chain_code,
        }
    }

    /// Child at `index`; indices with the high bit set are hardened.
    pub fn derive_child(&self, index: u32) -> Self {
        let (t, chain_code) = if is_hardened(index) {
            tweak(&self.chain_code, HARDENED_TAG, &self.scalar, index)
        } else {
            let point = self.public().point;
            tweak(&self.chain_code, SOFT_TAG, &point, index)
        };
        Self {
            scalar: (self.as_scalar() + t).to_bytes(),
            chain_code,
        }
    }

    /// Descendant along `path`.
    pub fn derive_path(&self, path: &[u32]) -> Self {
        path.iter()
            .fold(self.clone(), |key, index| key.derive_child(*index))
    }
}

impl fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPrivateKey")
            .field("scalar", &"[REDACTED]")
            .finish()
    }
}

/// A compressed public point with its chain code.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    point: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let (point, chain_code) = split(bytes)?;
        if CompressedEdwardsY(point).decompress().is_none() {
            return Err(KeyError::Malformed("public key is not a curve point".into()));
        }
        Ok(Self { point, chain_code })
    }

    pub fn to_bytes(&self) -> [u8; EXTENDED_KEY_LEN] {
        let mut out = [0u8; EXTENDED_KEY_LEN];
        out[..32].copy_from_slice(&self.point);
        out[32..].copy_from_slice(&self.chain_code);
        out
    }

    /// The 32-byte compressed point, which is what addresses commit to.
    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.point
    }

    /// Soft child at `index`. Hardened indices need the private key.
    pub fn derive_child(&self, index: u32) -> Result<Self, KeyError> {
        if is_hardened(index) {
            return Err(KeyError::Derivation(format!(
                "hardened index {index:#x} cannot be derived from a public key"
            )));
        }
        let parent = CompressedEdwardsY(self.point)
            .decompress()
            .ok_or_else(|| KeyError::Malformed("public key is not a curve point".into()))?;
        let (t, chain_code) = tweak(&self.chain_code, SOFT_TAG, &self.point, index);
        Ok(Self {
            point: (parent + EdwardsPoint::mul_base(&t)).compress().to_bytes(),
            chain_code,
        })
    }

    pub fn derive_path(&self, path: &[u32]) -> Result<Self, KeyError> {
        path.iter()
            .try_fold(*self, |key, index| key.derive_child(*index))
    }
}

impl fmt::Debug for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtendedPublicKey({})", hex::encode(self.point))
    }
}

/// Address of `account/chain/index` given the account public key.
pub fn address_for(
    account: &ExtendedPublicKey,
    chain: u32,
    index: u32,
    protocol_magic: u32,
    kind: AddressType,
) -> Result<String, KeyError> {
    let key = account.derive_path(&[chain, index])?;
    Ok(encode_address(key.key_bytes(), protocol_magic, kind))
}
