use core::fmt;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use picky::jose::jws::JwsAlg;
use picky::jose::jwt::{CheckedJwtSig, JwtDate, JwtSig, JwtValidator};
use picky::key::{PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use soberdev_task::{ShutdownSignal, Task};
use time::OffsetDateTime;
use user_store::User;
use uuid::Uuid;

const LEEWAY_SECS: u16 = 60 * 5; // 5 minutes
const CLEANUP_TASK_INTERVAL: Duration = Duration::from_secs(60 * 30); // 30 minutes

/// Refresh tokens already redeemed, kept until they expire on their own.
///
/// Refresh tokens are single-use: redeeming one issues a fresh pair and
/// retires the presented token, so a replayed token is rejected.
pub type TokenCache = Mutex<HashMap<Uuid, i64>>;

pub fn new_token_cache() -> TokenCache {
    Mutex::new(HashMap::new())
}

// ----- token types -----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentType {
    Access,
    Refresh,
}

impl FromStr for ContentType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCESS" => Ok(ContentType::Access),
            "REFRESH" => Ok(ContentType::Refresh),
            unexpected => Err(TokenError::UnexpectedContentType(unexpected.to_owned())),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Access => f.write_str("ACCESS"),
            ContentType::Refresh => f.write_str("REFRESH"),
        }
    }
}

#[derive(Debug)]
pub enum TokenError {
    /// Signature, structure or time-based validation failed.
    Decode(anyhow::Error),
    UnexpectedContentType(String),
    /// The refresh token was already redeemed once.
    Replayed,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => e.fmt(f),
            Self::UnexpectedContentType(cty) => write!(f, "unexpected content type: {cty}"),
            Self::Replayed => write!(f, "refresh token was already used"),
        }
    }
}

impl std::error::Error for TokenError {}

// ----- claims ----- //

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AccessTokenClaims {
    /// Unique ID for this token
    pub jti: Uuid,
    /// ID of the authenticated user
    pub sub: Uuid,
    /// Email of the authenticated user at signing time
    pub email: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RefreshTokenClaims {
    /// Unique ID for this token
    pub jti: Uuid,
    /// ID of the authenticated user
    pub sub: Uuid,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Clone, Debug)]
pub enum TokenClaims {
    Access(AccessTokenClaims),
    Refresh(RefreshTokenClaims),
}

impl AccessTokenClaims {
    pub fn for_user(user: &User, now: OffsetDateTime, lifetime: Duration) -> Self {
        let now = now.unix_timestamp();

        Self {
            jti: Uuid::new_v4(),
            sub: user.id,
            email: user.email.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
        }
    }
}

impl RefreshTokenClaims {
    pub fn for_user(user: &User, now: OffsetDateTime, lifetime: Duration) -> Self {
        let now = now.unix_timestamp();

        Self {
            jti: Uuid::new_v4(),
            sub: user.id,
            iat: now,
            nbf: now,
            exp: now.saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
        }
    }
}

// ----- signing ----- //

pub fn sign_access_token(key: &PrivateKey, claims: &AccessTokenClaims) -> anyhow::Result<String> {
    let jwt_sig = CheckedJwtSig::new_with_cty(JwsAlg::RS256, ContentType::Access.to_string(), claims);
    jwt_sig.encode(key).context("sign ACCESS token")
}

pub fn sign_refresh_token(key: &PrivateKey, claims: &RefreshTokenClaims) -> anyhow::Result<String> {
    let jwt_sig = CheckedJwtSig::new_with_cty(JwsAlg::RS256, ContentType::Refresh.to_string(), claims);
    jwt_sig.encode(key).context("sign REFRESH token")
}

// ----- validation ----- //

pub fn validate_token(token: &str, provisioner_key: &PublicKey) -> Result<TokenClaims, TokenError> {
    let timestamp_now = OffsetDateTime::now_utc().unix_timestamp();
    let now = JwtDate::new_with_leeway(timestamp_now, LEEWAY_SECS);
    let validator = JwtValidator::strict(&now);

    let jwt = JwtSig::<serde_json::Value>::decode(token, provisioner_key, &validator)
        .map_err(|e| TokenError::Decode(anyhow::Error::new(e).context("failed to decode signed payload")))?;

    let content_type = jwt
        .header
        .cty
        .as_deref()
        .ok_or_else(|| TokenError::UnexpectedContentType("<missing>".to_owned()))?
        .parse::<ContentType>()?;

    let claims = match content_type {
        ContentType::Access => serde_json::from_value(jwt.claims)
            .map(TokenClaims::Access)
            .map_err(|e| TokenError::Decode(anyhow::Error::new(e).context("invalid ACCESS claims")))?,
        ContentType::Refresh => serde_json::from_value(jwt.claims)
            .map(TokenClaims::Refresh)
            .map_err(|e| TokenError::Decode(anyhow::Error::new(e).context("invalid REFRESH claims")))?,
    };

    Ok(claims)
}

/// Retires a refresh token so it can't be redeemed twice.
pub fn consume_refresh_token(claims: &RefreshTokenClaims, cache: &TokenCache) -> Result<(), TokenError> {
    use std::collections::hash_map::Entry;

    match cache.lock().entry(claims.jti) {
        Entry::Occupied(_) => Err(TokenError::Replayed),
        Entry::Vacant(bucket) => {
            bucket.insert(claims.exp);
            Ok(())
        }
    }
}

// ----- cache cleanup ----- //

pub struct CacheCleanupTask {
    pub cache: Arc<TokenCache>,
}

#[async_trait]
impl Task for CacheCleanupTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "token cache cleanup";

    async fn run(self, shutdown_signal: ShutdownSignal) -> Self::Output {
        cleanup_task(self.cache, shutdown_signal).await;
        Ok(())
    }
}

#[instrument(skip_all)]
async fn cleanup_task(cache: Arc<TokenCache>, mut shutdown_signal: ShutdownSignal) {
    use tokio::time::sleep;

    debug!("Task started");

    loop {
        tokio::select! {
            _ = sleep(CLEANUP_TASK_INTERVAL) => {}
            _ = shutdown_signal.wait() => {
                break;
            }
        }

        let clean_threshold = OffsetDateTime::now_utc().unix_timestamp() - i64::from(LEEWAY_SECS);
        cache.lock().retain(|_, exp| *exp > clean_threshold);
    }

    debug!("Task terminated");
}
