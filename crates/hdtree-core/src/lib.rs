//! # hdtree-core
//! Foundation types and traits for the HD derivation-tree engine.

pub mod address;
pub mod constants;
pub mod error;
pub mod path;
pub mod traits;
pub mod tree;
pub mod types;
