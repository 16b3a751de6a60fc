/// Claim types carried by operator, account and activation tokens
use serde::{Deserialize, Serialize};

/// JOSE header used by every token this service handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub typ: String,
    pub alg: String,
}

pub const TOKEN_TYPE: &str = "jwt";
pub const ALGORITHM: &str = "ed25519";

impl Default for Header {
    fn default() -> Self {
        Self {
            typ: TOKEN_TYPE.to_string(),
            alg: ALGORITHM.to_string(),
        }
    }
}

/// Discriminates what a token describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Operator,
    Account,
    Activation,
    User,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Operator => "operator",
            ClaimType::Account => "account",
            ClaimType::Activation => "activation",
            ClaimType::User => "user",
        }
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Registered claims plus the type-specific `nats` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims<T> {
    #[serde(default)]
    pub jti: String,

    #[serde(default)]
    pub iat: i64,

    pub iss: String,

    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Unix seconds; 0 means the token never expires
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exp: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub nbf: i64,

    #[serde(rename = "type")]
    pub claim_type: ClaimType,

    #[serde(default)]
    pub nats: T,
}

impl<T: Default> Claims<T> {
    /// New unsigned claims for `subject`; issuer and id are filled in on encode
    pub fn new(claim_type: ClaimType, subject: impl Into<String>) -> Self {
        Self {
            jti: String::new(),
            iat: 0,
            iss: String::new(),
            sub: subject.into(),
            name: String::new(),
            exp: 0,
            nbf: 0,
            claim_type,
            nats: T::default(),
        }
    }
}

/// Operator section: keys the operator authorizes to sign on its behalf
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<String>,
}

/// Stream or service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Stream,
    Service,
}

/// An import of another account's export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub subject: String,

    /// Public key of the exporting account
    pub account: String,

    /// Activation token; empty for public exports
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,

    #[serde(rename = "type")]
    pub kind: ExportType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    pub subject: String,

    #[serde(rename = "type")]
    pub kind: ExportType,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub token_req: bool,
}

/// Account section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<Export>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<serde_json::Value>,
}

/// Activation section: what the importing account is allowed to import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationFields {
    pub subject: String,

    #[serde(rename = "type")]
    pub kind: ExportType,
}

impl Default for ActivationFields {
    fn default() -> Self {
        Self {
            subject: String::new(),
            kind: ExportType::Stream,
        }
    }
}

pub type OperatorClaims = Claims<OperatorFields>;
pub type AccountClaims = Claims<AccountFields>;
pub type ActivationClaims = Claims<ActivationFields>;
