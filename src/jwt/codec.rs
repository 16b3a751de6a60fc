/// Compact token encoding: `base64url(header).base64url(claims).base64url(sig)`
///
/// The signature is an Ed25519 signature by the issuer key over the first
/// two segments joined by a dot. Decoding always verifies it against the
/// key named in `iss`, so a decoded token is known to be issued by `iss`.
use crate::{
    crypto::KeyPair,
    jwt::{
        claims::{Claims, Header, ALGORITHM, TOKEN_TYPE},
        JwtError,
    },
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// A decoded, signature-verified token
#[derive(Debug, Clone)]
pub struct Token<T> {
    pub header: Header,
    pub claims: Claims<T>,
    raw: String,
}

impl<T> Token<T> {
    /// The exact text the token was decoded from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// Raw segments of a token before any JSON parsing
pub(crate) struct Segments<'a> {
    pub header: &'a str,
    pub claims: &'a str,
    pub signature: &'a str,
}

impl<'a> Segments<'a> {
    pub fn split(raw: &'a str) -> Result<Self, JwtError> {
        let mut parts = raw.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(claims), Some(signature), None)
                if !header.is_empty() && !claims.is_empty() && !signature.is_empty() =>
            {
                Ok(Self {
                    header,
                    claims,
                    signature,
                })
            }
            _ => Err(JwtError::Format(
                "expected three dot-separated segments".to_string(),
            )),
        }
    }

    /// Bytes covered by the signature
    pub fn signed_part(&self) -> String {
        format!("{}.{}", self.header, self.claims)
    }
}

pub(crate) fn decode_segment(segment: &str) -> Result<Vec<u8>, JwtError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JwtError::Format(format!("bad base64 segment: {}", e)))
}

pub(crate) fn parse_header(segment: &str) -> Result<Header, JwtError> {
    let header: Header = serde_json::from_slice(&decode_segment(segment)?)?;
    if !header.typ.eq_ignore_ascii_case(TOKEN_TYPE) {
        return Err(JwtError::Format(format!("unexpected token type {:?}", header.typ)));
    }
    if !header.alg.eq_ignore_ascii_case(ALGORITHM) {
        return Err(JwtError::Format(format!("unsupported algorithm {:?}", header.alg)));
    }
    Ok(header)
}

/// Decode `raw` and verify its signature against the issuer key
pub fn decode<T: DeserializeOwned + Default>(raw: &str) -> Result<Token<T>, JwtError> {
    let raw = raw.trim();
    let segments = Segments::split(raw)?;
    let header = parse_header(segments.header)?;
    let claims: Claims<T> = serde_json::from_slice(&decode_segment(segments.claims)?)?;

    if claims.iss.is_empty() {
        return Err(JwtError::Format("missing issuer".to_string()));
    }
    let signature = decode_segment(segments.signature)?;
    crate::crypto::nkeys::verify(&claims.iss, segments.signed_part().as_bytes(), &signature)?;

    Ok(Token {
        header,
        claims,
        raw: raw.to_string(),
    })
}

/// Content hash used as the token id
pub fn hash_claims<T: Serialize>(claims: &Claims<T>) -> Result<String, JwtError> {
    let bytes = serde_json::to_vec(claims)?;
    let digest = Sha256::digest(&bytes);
    Ok(base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &digest))
}

/// Sign `claims` with `signer`, filling in issuer, issue time and id
pub fn encode<T: Serialize>(claims: &mut Claims<T>, signer: &KeyPair) -> Result<String, JwtError> {
    claims.iss = signer.public_key();
    if claims.iat == 0 {
        claims.iat = chrono::Utc::now().timestamp();
    }
    claims.jti = String::new();
    claims.jti = hash_claims(claims)?;

    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Header::default())?);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signed = format!("{}.{}", header, body);
    let signature = URL_SAFE_NO_PAD.encode(signer.sign(signed.as_bytes()));

    Ok(format!("{}.{}", signed, signature))
}
