use axum::RequestPartsExt as _;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use time::OffsetDateTime;

use crate::AppState;
use crate::http::HttpError;
use crate::token::{self, TokenClaims};

const AUTH_EXCEPTIONS: &[(&Method, &str)] = &[
    (&Method::GET, "/health"),
    (&Method::POST, "/v1/auth/token"),
    (&Method::POST, "/v1/auth/token/refresh"),
    (&Method::POST, "/v1/auth/token/verify"),
];

pub async fn auth_middleware(
    State(AppState {
        conf_handle,
        user_store,
        ..
    }): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, HttpError> {
    let method = request.method();
    let uri_path = request.uri().path();

    if AUTH_EXCEPTIONS.contains(&(method, uri_path)) {
        trace!("unauthenticated route");
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();

    let extract_header = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| HttpError::unauthorized().msg("authorization header invalid or missing"))?;

    let token = extract_header.token();

    let conf = conf_handle.get_conf();

    if conf.debug.dump_tokens {
        debug!(token, "**DEBUG OPTION**");
    }

    let claims = token::validate_token(token, &conf.provisioner_public_key)
        .map_err(HttpError::unauthorized().err())?;

    let mut request = Request::from_parts(parts, body);

    // For access tokens, resolve the subject eagerly so handlers always see a
    // live, active user even when the account changed after signing.
    if let TokenClaims::Access(claims) = &claims {
        let user = user_store
            .user_by_id(claims.sub)
            .await
            .map_err(HttpError::internal().err())?
            .ok_or_else(|| HttpError::unauthorized().msg("user no longer exists"))?;

        if !user.is_active {
            return Err(HttpError::unauthorized().msg("user is inactive"));
        }

        if user.is_account_locked(OffsetDateTime::now_utc()) {
            return Err(HttpError::unauthorized().msg("account is locked"));
        }

        request.extensions_mut().insert(user);
    }

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
