/// Signed account tokens
///
/// Claim types, the compact codec and the human-readable expansion used
/// by the resolver's `decode` modifier.

pub mod claims;
pub mod codec;
pub mod render;

pub use claims::{
    AccountClaims, AccountFields, ActivationClaims, ActivationFields, ClaimType, Claims,
    ExportType, Header, Import, OperatorClaims, OperatorFields,
};
pub use codec::{decode, encode, Token};

use crate::crypto::KeyError;
use thiserror::Error;

pub type AccountToken = Token<AccountFields>;
pub type ActivationToken = Token<ActivationFields>;
pub type OperatorToken = Token<OperatorFields>;

/// Decode-time failures; all of them make a token malformed
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token format: {0}")]
    Format(String),

    #[error("invalid claims: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid signature: {0}")]
    Key(#[from] KeyError),
}
