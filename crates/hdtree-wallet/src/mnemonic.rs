//! BIP-39 mnemonic backup and restoration of wallet seeds.

use bip39::{Language, Mnemonic};

use crate::error::WalletError;
use crate::keys::Seed;

/// Convert a 32-byte seed to a 24-word BIP-39 mnemonic phrase.
pub fn seed_to_mnemonic(seed: &Seed) -> Result<String, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, seed.as_bytes())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(m.to_string())
}

/// Parse a BIP-39 mnemonic phrase and extract the 32-byte entropy as a Seed.
///
/// Normalizes whitespace and case before parsing.
pub fn mnemonic_to_seed(phrase: &str) -> Result<Seed, WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let m = Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    let entropy = m.to_entropy();
    if entropy.len() != 32 {
        return Err(WalletError::InvalidMnemonic(format!(
            "expected 24 words (32 bytes of entropy), got {} bytes",
            entropy.len()
        )));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&entropy);
    Ok(Seed::from_bytes(bytes))
}
