//! Handshake identity resolution.
//!
//! Credential sources are tried in ranked order: a bearer token from the
//! `token` query parameter, then the signed session cookie, then (when
//! enabled) a bare `userId` query parameter admitted without verification.
//! The unverified path exists because the WebSocket channel only receives
//! pushed events; every mutating operation is re-authenticated by the HTTP
//! API with a verified token.

use std::fmt;
use std::sync::Arc;

use crate::config::AuthConfig;

use super::JwtValidator;

/// Name of the session cookie carrying the JWT
pub const SESSION_COOKIE: &str = "jwt";

/// Why a handshake could not be authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    MissingCredential,
    InvalidSignature,
    Expired,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingCredential => write!(f, "no credential found"),
            RejectionReason::InvalidSignature => write!(f, "invalid token signature"),
            RejectionReason::Expired => write!(f, "token expired"),
        }
    }
}

/// Credential material extracted from the connection handshake
#[derive(Debug, Default, Clone)]
pub struct HandshakeMeta {
    pub query_token: Option<String>,
    pub cookie_token: Option<String>,
    pub claimed_user_id: Option<String>,
}

/// An identity admitted to the relay, with its provenance
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub verified: bool,
}

/// Outcome of a single credential strategy
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    /// Credential present and usable
    Resolved(ResolvedIdentity),
    /// This strategy's credential source is not present in the handshake
    Unavailable,
    /// Credential present but rejected
    Invalid(RejectionReason),
}

pub trait CredentialStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, meta: &HandshakeMeta) -> StrategyOutcome;
}

/// Bearer token from the `token` query parameter
pub struct QueryTokenStrategy {
    validator: Arc<JwtValidator>,
}

impl QueryTokenStrategy {
    pub fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

impl CredentialStrategy for QueryTokenStrategy {
    fn name(&self) -> &'static str {
        "query-token"
    }

    fn resolve(&self, meta: &HandshakeMeta) -> StrategyOutcome {
        let Some(ref token) = meta.query_token else {
            return StrategyOutcome::Unavailable;
        };

        match self.validator.validate(token) {
            Ok(claims) => StrategyOutcome::Resolved(ResolvedIdentity {
                user_id: claims.sub,
                verified: true,
            }),
            Err(reason) => StrategyOutcome::Invalid(reason),
        }
    }
}

/// JWT from the signed session cookie
pub struct CookieTokenStrategy {
    validator: Arc<JwtValidator>,
}

impl CookieTokenStrategy {
    pub fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

impl CredentialStrategy for CookieTokenStrategy {
    fn name(&self) -> &'static str {
        "session-cookie"
    }

    fn resolve(&self, meta: &HandshakeMeta) -> StrategyOutcome {
        let Some(ref token) = meta.cookie_token else {
            return StrategyOutcome::Unavailable;
        };

        match self.validator.validate(token) {
            Ok(claims) => StrategyOutcome::Resolved(ResolvedIdentity {
                user_id: claims.sub,
                verified: true,
            }),
            Err(reason) => StrategyOutcome::Invalid(reason),
        }
    }
}

/// Unverified `userId` query parameter, admitted leniently
pub struct ClaimedIdentityStrategy;

impl CredentialStrategy for ClaimedIdentityStrategy {
    fn name(&self) -> &'static str {
        "claimed-identity"
    }

    fn resolve(&self, meta: &HandshakeMeta) -> StrategyOutcome {
        match meta.claimed_user_id {
            Some(ref user_id) if !user_id.is_empty() => {
                StrategyOutcome::Resolved(ResolvedIdentity {
                    user_id: user_id.clone(),
                    verified: false,
                })
            }
            _ => StrategyOutcome::Unavailable,
        }
    }
}

/// Resolves a handshake to an identity by trying strategies in rank order.
pub struct IdentityResolver {
    strategies: Vec<Box<dyn CredentialStrategy>>,
}

impl IdentityResolver {
    pub fn new(validator: Arc<JwtValidator>, auth: &AuthConfig) -> Self {
        let mut strategies: Vec<Box<dyn CredentialStrategy>> = vec![
            Box::new(QueryTokenStrategy::new(validator.clone())),
            Box::new(CookieTokenStrategy::new(validator)),
        ];

        if auth.allow_claimed_identity {
            strategies.push(Box::new(ClaimedIdentityStrategy));
        }

        Self { strategies }
    }

    /// Resolve the handshake to an identity.
    ///
    /// A failed higher-ranked credential does not abort resolution while a
    /// lower-ranked source remains; the failure is logged and the fallback
    /// admits the connection. Only when every strategy is exhausted does the
    /// first observed failure (or `MissingCredential`) reject the handshake.
    pub fn resolve(&self, meta: &HandshakeMeta) -> Result<ResolvedIdentity, RejectionReason> {
        let mut first_failure: Option<(&'static str, RejectionReason)> = None;

        for strategy in &self.strategies {
            match strategy.resolve(meta) {
                StrategyOutcome::Resolved(identity) => {
                    if let Some((failed_strategy, reason)) = first_failure {
                        tracing::warn!(
                            failed_strategy = failed_strategy,
                            reason = %reason,
                            admitted_via = strategy.name(),
                            user_id = %identity.user_id,
                            "Credential path failed, admitting via fallback"
                        );
                    }
                    if !identity.verified {
                        tracing::warn!(
                            user_id = %identity.user_id,
                            "Admitting connection with unverified claimed identity"
                        );
                    }
                    return Ok(identity);
                }
                StrategyOutcome::Unavailable => continue,
                StrategyOutcome::Invalid(reason) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        reason = %reason,
                        "Credential strategy rejected handshake"
                    );
                    if first_failure.is_none() {
                        first_failure = Some((strategy.name(), reason));
                    }
                }
            }
        }

        Err(first_failure
            .map(|(_, reason)| reason)
            .unwrap_or(RejectionReason::MissingCredential))
    }
}

/// Extract a named cookie value from a `Cookie` header string.
pub fn parse_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
