//! Error types for the derivation-tree engine.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend: {0}")] Backend(String),
    #[error("transaction conflict: {0}")] Conflict(String),
    #[error("codec: {0}")] Codec(String),
    #[error("table {0} not declared for this transaction")] UndeclaredTable(&'static str),
    #[error("missing column family: {0}")] MissingColumnFamily(&'static str),
}

/// Structural failures of the derivation tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The operation cannot apply to this node or wallet configuration.
    #[error("stale state: {0}")] StaleState(String),
    /// An expected row or linkage is absent.
    #[error("not found: {0}")] NotFound(String),
    /// A subtree description does not fit the tree it is added to.
    #[error("invalid tree: {0}")] InvalidTree(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid encoding: {0}")] InvalidEncoding(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("unknown header byte: {0:#04x}")] UnknownHeader(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid password")] InvalidPassword,
    #[error("password required for encrypted key")] PasswordRequired,
    #[error("malformed key material: {0}")] Malformed(String),
    #[error("derivation: {0}")] Derivation(String),
    #[error("encryption: {0}")] Encryption(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("usage oracle: {0}")] Oracle(String),
    #[error(transparent)] Key(#[from] KeyError),
}

/// Umbrella error of the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HdError {
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Tree(#[from] TreeError),
}

impl HdError {
    pub fn stale(msg: impl Into<String>) -> Self {
        TreeError::StaleState(msg.into()).into()
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TreeError::NotFound(msg.into()).into()
    }

    pub fn invalid_tree(msg: impl Into<String>) -> Self {
        TreeError::InvalidTree(msg.into()).into()
    }

    /// Whether a retry of the whole operation may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, HdError::Storage(StorageError::Conflict(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_detected() {
        let e: HdError = StorageError::Conflict("busy".into()).into();
        assert!(e.is_conflict());
        assert!(!HdError::stale("x").is_conflict());
    }

    #[test]
    fn display_is_transparent() {
        let e = HdError::not_found("key 3");
        assert_eq!(e.to_string(), "not found: key 3");
    }

    #[test]
    fn key_error_lifts_into_discovery() {
        let e: DiscoveryError = KeyError::InvalidPassword.into();
        assert_eq!(e.to_string(), "invalid password");
    }
}
