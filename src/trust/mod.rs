/// Trust validation for uploaded tokens
///
/// Decides whether a token may enter the store: it must decode and verify,
/// be issued by a trust anchor (or, for activations, by the exporting
/// account), and be within its validity window. Rejection is an ordinary
/// outcome returned as a value.
use crate::{
    crypto::{nkeys, KeyRole},
    jwt::{
        self, render::unix_to_date, AccountToken, ActivationToken, ClaimType, Claims,
        OperatorFields, JwtError,
    },
};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Why a token was not accepted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("untrusted signer: {0}")]
    UntrustedSigner(String),

    #[error("token expired: {0}")]
    Expired(String),
}

impl From<JwtError> for Rejection {
    fn from(e: JwtError) -> Self {
        Rejection::Malformed(e.to_string())
    }
}

/// Issuer keys accepted as authoritative for account tokens
#[derive(Debug, Clone, Default)]
pub struct TrustAnchors {
    keys: HashSet<String>,
    operator_jwt: Option<String>,
}

impl TrustAnchors {
    /// Anchors from raw operator public keys
    pub fn from_keys<I, S>(keys: I) -> Result<Self, Rejection>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut anchors = Self::default();
        for key in keys {
            anchors.add_key(key.into())?;
        }
        Ok(anchors)
    }

    /// Anchors from a self-signed operator token: its subject plus its signing keys
    pub fn from_operator_jwt(raw: &str) -> Result<Self, Rejection> {
        let token = jwt::decode::<OperatorFields>(raw)?;
        let claims = &token.claims;

        if claims.claim_type != ClaimType::Operator {
            return Err(Rejection::Malformed(format!(
                "expected an operator token, found {}",
                claims.claim_type.as_str()
            )));
        }
        if claims.iss != claims.sub {
            return Err(Rejection::UntrustedSigner(
                "operator token must be self-signed".to_string(),
            ));
        }

        let mut anchors = Self::from_keys(
            std::iter::once(claims.sub.clone()).chain(claims.nats.signing_keys.iter().cloned()),
        )?;
        anchors.operator_jwt = Some(token.into_raw());
        Ok(anchors)
    }

    /// Merge another anchor set into this one
    pub fn extend(&mut self, other: TrustAnchors) {
        self.keys.extend(other.keys);
        if self.operator_jwt.is_none() {
            self.operator_jwt = other.operator_jwt;
        }
    }

    fn add_key(&mut self, key: String) -> Result<(), Rejection> {
        nkeys::decode_public_key_as(KeyRole::Operator, &key)
            .map_err(|e| Rejection::Malformed(format!("trust anchor {}: {}", key, e)))?;
        self.keys.insert(key);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// The operator token the anchors were loaded from, if any
    pub fn operator_jwt(&self) -> Option<&str> {
        self.operator_jwt.as_deref()
    }
}

/// Reject tokens whose validity window does not contain `now`
pub fn check_expiry<T>(claims: &Claims<T>, now: i64) -> Result<(), Rejection> {
    if claims.exp != 0 && claims.exp < now {
        return Err(Rejection::Expired(format!(
            "{} expired at {}",
            claims.sub,
            unix_to_date(claims.exp)
        )));
    }
    if claims.nbf != 0 && claims.nbf > now {
        return Err(Rejection::Expired(format!(
            "{} is not valid until {}",
            claims.sub,
            unix_to_date(claims.nbf)
        )));
    }
    Ok(())
}

/// Validate a decoded account token against `anchors` at time `now`
pub fn validate(token: &AccountToken, anchors: &TrustAnchors, now: i64) -> Result<(), Rejection> {
    let claims = &token.claims;

    if claims.claim_type != ClaimType::Account {
        return Err(Rejection::Malformed(format!(
            "expected an account token, found {}",
            claims.claim_type.as_str()
        )));
    }
    if !nkeys::is_public_key(KeyRole::Account, &claims.sub) {
        return Err(Rejection::Malformed(format!(
            "subject {:?} is not an account key",
            claims.sub
        )));
    }
    if claims.iss == claims.sub {
        return Err(Rejection::UntrustedSigner(format!(
            "{} is self-signed",
            claims.sub
        )));
    }
    if !anchors.contains(&claims.iss) {
        return Err(Rejection::UntrustedSigner(format!(
            "issuer {} is not a trusted operator",
            claims.iss
        )));
    }

    check_expiry(claims, now)?;

    for import in &claims.nats.imports {
        if import.token.is_empty() {
            continue;
        }
        validate_activation_for(&import.token, &import.account, &claims.sub, now).map_err(|e| {
            debug!("import {:?} of {} rejected: {}", import.subject, claims.sub, e);
            e
        })?;
    }

    Ok(())
}

/// Decode and validate an activation carried by an import
///
/// The activation must be issued by the exporting account and name the
/// importing account as its subject.
fn validate_activation_for(
    raw: &str,
    exporter: &str,
    importer: &str,
    now: i64,
) -> Result<ActivationToken, Rejection> {
    let activation = validate_activation(raw, now)?;
    if activation.claims.iss != exporter {
        return Err(Rejection::UntrustedSigner(format!(
            "activation for {} is signed by {}, not exporter {}",
            activation.claims.nats.subject, activation.claims.iss, exporter
        )));
    }
    if activation.claims.sub != importer {
        return Err(Rejection::Malformed(format!(
            "activation subject {} does not match importing account {}",
            activation.claims.sub, importer
        )));
    }
    Ok(activation)
}

/// Decode and validate a standalone activation token
pub fn validate_activation(raw: &str, now: i64) -> Result<ActivationToken, Rejection> {
    let activation = jwt::decode::<jwt::ActivationFields>(raw)?;
    let claims = &activation.claims;

    if claims.claim_type != ClaimType::Activation {
        return Err(Rejection::Malformed(format!(
            "expected an activation token, found {}",
            claims.claim_type.as_str()
        )));
    }
    if !nkeys::is_public_key(KeyRole::Account, &claims.iss) {
        return Err(Rejection::UntrustedSigner(format!(
            "activation issuer {} is not an account",
            claims.iss
        )));
    }
    if claims.jti.is_empty() {
        return Err(Rejection::Malformed("activation has no id".to_string()));
    }
    check_expiry(claims, now)?;

    Ok(activation)
}

/// Trust anchors plus the validation entry points used by the resolver
#[derive(Debug, Clone)]
pub struct TrustEngine {
    anchors: TrustAnchors,
}

impl TrustEngine {
    pub fn new(anchors: TrustAnchors) -> Self {
        Self { anchors }
    }

    pub fn anchors(&self) -> &TrustAnchors {
        &self.anchors
    }

    /// Decode `raw` and validate it as an account token at `now`
    pub fn validate_account(&self, raw: &str, now: i64) -> Result<AccountToken, Rejection> {
        let token = jwt::decode(raw)?;
        validate(&token, &self.anchors, now)?;
        Ok(token)
    }

    pub fn validate_activation(&self, raw: &str, now: i64) -> Result<ActivationToken, Rejection> {
        validate_activation(raw, now)
    }
}
