/// Upload and fetch orchestration for account tokens
///
/// Ties the trust engine, the store and the notification bus together.
/// Everything HTTP-specific stays in the api layer; this module only deals
/// in subjects, token text and fetch outcomes.
use crate::{
    bus::{account_notification_subject, NotificationBus},
    crypto::{nkeys, KeyRole},
    error::{ResolverError, ResolverResult},
    jwt::{self, render, AccountFields, ActivationFields},
    metrics,
    store::JwtStore,
    trust::{self, Rejection, TrustEngine},
};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

pub const JWT_CONTENT_TYPE: &str = "application/jwt";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
pub const DECODED_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Query modifiers accepted by fetch endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Hide tokens that are expired or no longer decode
    pub check: bool,
    /// Serve as plain text
    pub text: bool,
    /// Serve the expanded, human-readable form; wins over `text`
    pub decode: bool,
    /// Re-announce the stored token
    pub notify: bool,
}

impl FetchOptions {
    /// Read modifiers from query parameters; `true` and `1` enable a flag
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        let flag = |name: &str| {
            params
                .get(name)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };
        Self {
            check: flag("check"),
            text: flag("text"),
            decode: flag("decode"),
            notify: flag("notify"),
        }
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Body {
        body: String,
        content_type: &'static str,
        etag: String,
    },
    NotModified {
        etag: String,
    },
}

impl FetchOutcome {
    pub fn etag(&self) -> &str {
        match self {
            FetchOutcome::Body { etag, .. } | FetchOutcome::NotModified { etag } => etag,
        }
    }
}

/// Strong validator over the exact response bytes
pub fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// Whether an `If-None-Match` header value matches `etag`
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let bare = etag.trim_matches('"');
    if_none_match.split(',').map(str::trim).any(|candidate| {
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate == "*" || candidate == etag || candidate == bare
    })
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn outcome_label<T>(result: &ResolverResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ResolverError::Rejected(Rejection::Malformed(_))) => "malformed",
        Err(ResolverError::Rejected(Rejection::UntrustedSigner(_))) => "untrusted",
        Err(ResolverError::Rejected(Rejection::Expired(_))) => "expired",
        Err(ResolverError::NotFound(_)) => "not_found",
        Err(ResolverError::ReadOnly) => "read_only",
        Err(_) => "error",
    }
}

/// Account resolver core
pub struct ResolverService {
    store: Arc<dyn JwtStore>,
    trust: TrustEngine,
    bus: Arc<dyn NotificationBus>,
}

impl ResolverService {
    pub fn new(store: Arc<dyn JwtStore>, trust: TrustEngine, bus: Arc<dyn NotificationBus>) -> Self {
        Self { store, trust, bus }
    }

    pub fn store(&self) -> &Arc<dyn JwtStore> {
        &self.store
    }

    pub fn trust(&self) -> &TrustEngine {
        &self.trust
    }

    /// Configured operator token, if anchors came from one
    pub fn operator_jwt(&self) -> Option<&str> {
        self.trust.anchors().operator_jwt()
    }

    /// Validate and store an account token, then announce it
    pub async fn upload_account(&self, subject: &str, body: &[u8]) -> ResolverResult<()> {
        let result = self.store_account(subject, body).await;
        metrics::record_upload("account", outcome_label(&result));
        result
    }

    async fn store_account(&self, subject: &str, body: &[u8]) -> ResolverResult<()> {
        let raw = body_text(body)?;
        let token = jwt::decode::<AccountFields>(raw).map_err(Rejection::from)?;
        // A token for another account is malformed whoever signed it
        if token.claims.sub != subject {
            return Err(Rejection::Malformed(format!(
                "token subject {} does not match {}",
                token.claims.sub, subject
            ))
            .into());
        }
        trust::validate(&token, self.trust.anchors(), now())?;

        self.store.save(subject, raw).await?;
        info!("Stored account JWT for {}", subject);

        self.announce(subject, raw.to_string());
        Ok(())
    }

    /// Fetch the stored token for an account
    pub async fn fetch_account(
        &self,
        subject: &str,
        options: FetchOptions,
        if_none_match: Option<&str>,
    ) -> ResolverResult<FetchOutcome> {
        let result = self.load_for_fetch::<AccountFields>(subject, options).await;
        let result = match result {
            Ok(token) => {
                if options.notify {
                    self.announce(subject, token.clone());
                }
                respond(token, options, if_none_match)
            }
            Err(e) => Err(e),
        };
        metrics::record_fetch("account", outcome_label(&result));
        result
    }

    /// Validate and store an activation under its id; returns the id
    pub async fn upload_activation(&self, body: &[u8]) -> ResolverResult<String> {
        let result = self.store_activation(body).await;
        metrics::record_upload("activation", outcome_label(&result));
        result
    }

    async fn store_activation(&self, body: &[u8]) -> ResolverResult<String> {
        let raw = body_text(body)?;
        let activation = self.trust.validate_activation(raw, now())?;
        let hash = activation.claims.jti;

        self.store.save(&hash, raw).await?;
        info!(
            "Stored activation {} issued by {}",
            hash, activation.claims.iss
        );
        Ok(hash)
    }

    /// Fetch a stored activation by id
    pub async fn fetch_activation(
        &self,
        hash: &str,
        options: FetchOptions,
        if_none_match: Option<&str>,
    ) -> ResolverResult<FetchOutcome> {
        let result = match self.load_for_fetch::<ActivationFields>(hash, options).await {
            Ok(token) => respond(token, options, if_none_match),
            Err(e) => Err(e),
        };
        metrics::record_fetch("activation", outcome_label(&result));
        result
    }

    /// Stored subjects that are account public keys
    pub async fn list_accounts(&self) -> Vec<String> {
        self.store
            .subjects()
            .await
            .into_iter()
            .filter(|subject| nkeys::is_public_key(KeyRole::Account, subject))
            .collect()
    }

    /// Announce the currently stored token for `subject`
    ///
    /// Used when the store reports a change it did not receive through
    /// an upload. Non-account subjects are ignored.
    pub async fn republish(&self, subject: &str) -> ResolverResult<()> {
        if !nkeys::is_public_key(KeyRole::Account, subject) {
            debug!("Not announcing change to non-account subject {}", subject);
            return Ok(());
        }
        let token = self.store.load(subject).await?;
        self.announce(subject, token);
        Ok(())
    }

    async fn load_for_fetch<T: DeserializeOwned + Default>(
        &self,
        subject: &str,
        options: FetchOptions,
    ) -> ResolverResult<String> {
        let token = self.store.load(subject).await?;

        if options.check {
            let current = jwt::decode::<T>(&token)
                .map_err(Rejection::from)
                .and_then(|decoded| trust::check_expiry(&decoded.claims, now()));
            if let Err(rejection) = current {
                debug!("Hiding stored JWT for {}: {}", subject, rejection);
                return Err(ResolverError::NotFound(format!(
                    "{} is no longer valid",
                    subject
                )));
            }
        }

        Ok(token)
    }

    /// Publish on a detached task; failures are logged and counted only
    fn announce(&self, account: &str, token: String) {
        let bus = Arc::clone(&self.bus);
        let subject = account_notification_subject(account);
        tokio::spawn(async move {
            match bus.publish(&subject, token.into_bytes()).await {
                Ok(()) => {
                    metrics::record_notification(true);
                    debug!("Published {}", subject);
                }
                Err(e) => {
                    metrics::record_notification(false);
                    warn!("Failed to publish {}: {}", subject, e);
                }
            }
        });
    }
}

fn body_text(body: &[u8]) -> ResolverResult<&str> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Rejection::Malformed("request body is not UTF-8".to_string()))?;
    Ok(text.trim())
}

fn respond(
    token: String,
    options: FetchOptions,
    if_none_match: Option<&str>,
) -> ResolverResult<FetchOutcome> {
    let (body, content_type) = if options.decode {
        let expanded = render::expand(&token)
            .map_err(|e| ResolverError::Internal(format!("stored token does not decode: {}", e)))?;
        (expanded, DECODED_CONTENT_TYPE)
    } else if options.text {
        (token, TEXT_CONTENT_TYPE)
    } else {
        (token, JWT_CONTENT_TYPE)
    };

    let etag = etag_for(body.as_bytes());
    if if_none_match.map_or(false, |header| etag_matches(header, &etag)) {
        return Ok(FetchOutcome::NotModified { etag });
    }

    Ok(FetchOutcome::Body {
        body,
        content_type,
        etag,
    })
}
