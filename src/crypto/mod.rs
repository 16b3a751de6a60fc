/// Cryptographic primitives for account keys
pub mod nkeys;

pub use nkeys::{KeyError, KeyPair, KeyRole};
