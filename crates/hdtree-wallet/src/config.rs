//! Wallet behaviour settings.

use serde::{Deserialize, Serialize};

use hdtree_core::address::AddressType;
use hdtree_core::constants::{DEFAULT_CUTOFF_HEADROOM, DEFAULT_GAP_LIMIT, MAINNET_PROTOCOL_MAGIC};

use crate::encryption::KdfParams;

/// Settings shared by every public deriver opened through one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Consecutive unused addresses that end a chain scan.
    pub gap_limit: u32,
    /// Unused addresses kept displayed past the last used one.
    pub cutoff_headroom: u32,
    pub protocol_magic: u32,
    /// Address type handed out by `next unused` lookups.
    pub address_type: AddressType,
    pub kdf: KdfParams,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
            cutoff_headroom: DEFAULT_CUTOFF_HEADROOM,
            protocol_magic: MAINNET_PROTOCOL_MAGIC,
            address_type: AddressType::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl WalletConfig {
    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit;
        self
    }

    pub fn with_protocol_magic(mut self, magic: u32) -> Self {
        self.protocol_magic = magic;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}
