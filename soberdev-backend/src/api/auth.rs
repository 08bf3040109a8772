use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse as _, Response};
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::TypedHeader;
use axum_extra::headers;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AppState;
use crate::http::HttpError;
use crate::token::{
    AccessTokenClaims, RefreshTokenClaims, TokenClaims, consume_refresh_token, sign_access_token, sign_refresh_token,
    validate_token,
};

pub fn make_router<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/token", post(obtain_token_pair))
        .route("/token/refresh", post(refresh_token_pair))
        .route("/token/verify", post(verify_token))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenObtainRequest {
    /// Email address identifying the user.
    email: Option<String>,
    /// Cleartext password, verified against the stored hash.
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenPairResponse {
    access: String,
    refresh: String,
}

/// Authenticates a user and grants an access/refresh token pair
pub(crate) async fn obtain_token_pair(
    State(AppState {
        conf_handle,
        user_store,
        ..
    }): State<AppState>,
    ConnectInfo(source_addr): ConnectInfo<SocketAddr>,
    Json(req): Json<TokenObtainRequest>,
) -> Result<Response, HttpError> {
    let conf = conf_handle.get_conf();

    let provisioner_key = conf
        .provisioner_private_key
        .as_ref()
        .ok_or_else(|| HttpError::internal().msg("provisioner private key is missing"))?;

    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(HttpError::bad_request().msg("email and password fields are required"));
    };

    match login_rate_limit::check(email.clone(), source_addr.ip(), conf.login_rate_limit) {
        Ok(()) => {}
        Err(()) => {
            warn!(user = email, "Detected too many login attempts");
            return Err(HttpError::unauthorized().msg("too many login attempts"));
        }
    }

    let now = OffsetDateTime::now_utc();

    let user = user_store
        .user_by_email(&email)
        .await
        .map_err(HttpError::internal().err())?
        .ok_or_else(|| HttpError::unauthorized().msg("no active account found with the given credentials"))?;

    if !user.is_active {
        debug!(user = %user.email, "Rejected inactive user");
        return Err(HttpError::unauthorized().msg("no active account found with the given credentials"));
    }

    if user.is_account_locked(now) {
        warn!(user = %user.email, "Rejected login on a locked account");
        return Err(HttpError::unauthorized().msg("account is locked"));
    }

    if !user.password_hash.verify(&password) {
        let updated = user_store
            .record_login_failure(user.id, now)
            .await
            .map_err(HttpError::internal().err())?;

        if updated.is_account_locked(now) {
            warn!(user = %updated.email, "Account locked after repeated failures");
        }

        return Err(HttpError::unauthorized().msg("no active account found with the given credentials"));
    }

    user_store
        .record_login_success(user.id, now)
        .await
        .map_err(HttpError::internal().err())?;

    let access_claims = AccessTokenClaims::for_user(&user, now, conf.access_token_lifetime);
    let refresh_claims = RefreshTokenClaims::for_user(&user, now, conf.refresh_token_lifetime);

    let access = sign_access_token(provisioner_key, &access_claims).map_err(HttpError::internal().err())?;
    let refresh = sign_refresh_token(provisioner_key, &refresh_claims).map_err(HttpError::internal().err())?;

    info!(user = %user.email, "Granted a token pair");

    let cache_control = TypedHeader(headers::CacheControl::new().with_no_cache().with_no_store());

    Ok((cache_control, Json(TokenPairResponse { access, refresh })).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenRefreshRequest {
    refresh: Option<String>,
}

/// Exchanges a refresh token for a fresh access/refresh token pair
///
/// The presented refresh token is retired; redeeming it a second time fails.
pub(crate) async fn refresh_token_pair(
    State(AppState {
        conf_handle,
        token_cache,
        user_store,
    }): State<AppState>,
    Json(req): Json<TokenRefreshRequest>,
) -> Result<Response, HttpError> {
    let conf = conf_handle.get_conf();

    let provisioner_key = conf
        .provisioner_private_key
        .as_ref()
        .ok_or_else(|| HttpError::internal().msg("provisioner private key is missing"))?;

    let Some(refresh_token) = req.refresh else {
        return Err(HttpError::bad_request().msg("refresh field is required"));
    };

    let claims = validate_token(&refresh_token, &conf.provisioner_public_key)
        .map_err(HttpError::unauthorized().with_msg("invalid refresh token").err())?;

    let TokenClaims::Refresh(claims) = claims else {
        return Err(HttpError::unauthorized().msg("token not allowed (expected REFRESH)"));
    };

    consume_refresh_token(&claims, &token_cache).map_err(HttpError::unauthorized().err())?;

    let now = OffsetDateTime::now_utc();

    let user = user_store
        .user_by_id(claims.sub)
        .await
        .map_err(HttpError::internal().err())?
        .ok_or_else(|| HttpError::unauthorized().msg("user no longer exists"))?;

    if !user.is_active {
        return Err(HttpError::unauthorized().msg("user is inactive"));
    }

    let access_claims = AccessTokenClaims::for_user(&user, now, conf.access_token_lifetime);
    let refresh_claims = RefreshTokenClaims::for_user(&user, now, conf.refresh_token_lifetime);

    let access = sign_access_token(provisioner_key, &access_claims).map_err(HttpError::internal().err())?;
    let refresh = sign_refresh_token(provisioner_key, &refresh_claims).map_err(HttpError::internal().err())?;

    debug!(user = %user.email, "Rotated a refresh token");

    let cache_control = TypedHeader(headers::CacheControl::new().with_no_cache().with_no_store());

    Ok((cache_control, Json(TokenPairResponse { access, refresh })).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenVerifyRequest {
    token: Option<String>,
}

/// Checks that a token is well-formed, signed by us and not expired
pub(crate) async fn verify_token(
    State(AppState { conf_handle, .. }): State<AppState>,
    Json(req): Json<TokenVerifyRequest>,
) -> Result<Response, HttpError> {
    let conf = conf_handle.get_conf();

    let Some(token) = req.token else {
        return Err(HttpError::bad_request().msg("token field is required"));
    };

    validate_token(&token, &conf.provisioner_public_key)
        .map_err(HttpError::unauthorized().with_msg("invalid token").err())?;

    Ok(Json(serde_json::json!({})).into_response())
}

mod login_rate_limit {
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::LazyLock;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    type LoginAttempts = Mutex<HashMap<(String, IpAddr), u8>>;

    static LOGIN_ATTEMPTS: LazyLock<LoginAttempts> = LazyLock::new(|| Mutex::new(HashMap::new()));
    static LAST_RESET: LazyLock<Mutex<Instant>> = LazyLock::new(|| Mutex::new(Instant::now()));

    const PERIOD: Duration = Duration::from_secs(60);

    pub(crate) fn check(email: String, address: IpAddr, rate_limit: u8) -> Result<(), ()> {
        {
            // Reset if necessary.

            let now = Instant::now();
            let mut last_reset = LAST_RESET.lock();

            if now - *last_reset > PERIOD {
                *last_reset = now;
                LOGIN_ATTEMPTS.lock().clear();
            }
        }

        {
            // Check for the number of attempts within the period.

            let mut attempts = LOGIN_ATTEMPTS.lock();

            let num_attempts = attempts.entry((email, address)).or_insert(0);
            *num_attempts = num_attempts.checked_add(1).ok_or(())?;

            if *num_attempts > rate_limit { Err(()) } else { Ok(()) }
        }
    }
}
