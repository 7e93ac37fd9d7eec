//! Address encoding for derived public keys.
//!
//! An address is the Base58 encoding of
//!
//! ```text
//! header (1) || protocol magic (4, BE) || BLAKE3(pubkey)[..28] || checksum (4)
//! ```
//!
//! where the checksum is the first four bytes of the BLAKE3 hash of everything
//! before it. The header byte identifies the [`AddressType`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AddressError;

/// Length of the truncated public key hash.
pub const PUBKEY_HASH_LEN: usize = 28;

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 1 + 4 + PUBKEY_HASH_LEN;

/// Kind of address attached to an address-level node.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum AddressType {
    #[default]
    Legacy,
    Enterprise,
}

impl AddressType {
    fn header(self) -> u8 {
        match self {
            Self::Legacy => 0x82,
            Self::Enterprise => 0x61,
        }
    }

    fn from_header(byte: u8) -> Result<Self, AddressError> {
        match byte {
            0x82 => Ok(Self::Legacy),
            0x61 => Ok(Self::Enterprise),
            other => Err(AddressError::UnknownHeader(other)),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Enterprise => f.write_str("enterprise"),
        }
    }
}

/// Decoded form of an address string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedAddress {
    pub kind: AddressType,
    pub protocol_magic: u32,
    pub pubkey_hash: [u8; PUBKEY_HASH_LEN],
}

/// Encode a public key as an address of the given kind.
pub fn encode_address(public_key: &[u8], protocol_magic: u32, kind: AddressType) -> String {
    let digest = blake3::hash(public_key);
    let mut bytes = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    bytes.push(kind.header());
    bytes.extend_from_slice(&protocol_magic.to_be_bytes());
    bytes.extend_from_slice(&digest.as_bytes()[..PUBKEY_HASH_LEN]);
    let checksum = blake3::hash(&bytes);
    bytes.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);
    bs58::encode(bytes).into_string()
}

/// Decode and verify an address string.
pub fn decode_address(s: &str) -> Result<DecodedAddress, AddressError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    if bytes.len() != PAYLOAD_LEN + CHECKSUM_LEN {
        return Err(AddressError::InvalidLength(bytes.len()));
    }
    let (payload, checksum) = bytes.split_at(PAYLOAD_LEN);
    if &blake3::hash(payload).as_bytes()[..CHECKSUM_LEN] != checksum {
        return Err(AddressError::InvalidChecksum);
    }
    let kind = AddressType::from_header(payload[0])?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&payload[1..5]);
    let mut pubkey_hash = [0u8; PUBKEY_HASH_LEN];
    pubkey_hash.copy_from_slice(&payload[5..]);
    Ok(DecodedAddress {
        kind,
        protocol_magic: u32::from_be_bytes(magic),
        pubkey_hash,
    })
}
