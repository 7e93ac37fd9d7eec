//! Derivation constants shared by every crate in the workspace.

/// Offset added to an index to mark it as hardened.
pub const HARDENED: u32 = 0x8000_0000;

/// BIP-44 purpose, hardened.
pub const BIP44_PURPOSE: u32 = HARDENED + 44;

/// CIP-1852 purpose, hardened.
pub const CIP1852_PURPOSE: u32 = HARDENED + 1852;

/// Registered coin type, hardened.
pub const COIN_TYPE: u32 = HARDENED + 1815;

/// Receiving chain under an account.
pub const EXTERNAL: u32 = 0;

/// Change chain under an account.
pub const INTERNAL: u32 = 1;

/// Number of consecutive unused addresses that ends a chain scan.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Unused addresses kept visible past the last used one when a cutoff is
/// raised after an insert.
pub const DEFAULT_CUTOFF_HEADROOM: u32 = 1;

/// Protocol magic of the main network.
pub const MAINNET_PROTOCOL_MAGIC: u32 = 764_824_073;

/// Protocol magic of the public test network.
pub const TESTNET_PROTOCOL_MAGIC: u32 = 1_097_911_063;

/// Returns `true` when `index` lies in the hardened range.
pub fn is_hardened(index: u32) -> bool {
    index >= HARDENED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_and_coin_are_hardened() {
        assert!(is_hardened(BIP44_PURPOSE));
        assert!(is_hardened(CIP1852_PURPOSE));
        assert!(is_hardened(COIN_TYPE));
        assert!(!is_hardened(EXTERNAL));
        assert!(!is_hardened(INTERNAL));
    }

    #[test]
    fn chains_are_distinct() {
        assert_ne!(EXTERNAL, INTERNAL);
    }
}
