use axum::Extension;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use user_store::User;

use crate::http::HttpError;
use crate::token::{AccessTokenClaims, TokenClaims};

/// Claims of the bearer access token put in place by the auth middleware.
#[derive(Clone)]
pub struct AccessToken(pub AccessTokenClaims);

impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = Extension::<TokenClaims>::from_request_parts(parts, state)
            .await
            .map_err(HttpError::internal().err())?
            .0;

        if let TokenClaims::Access(claims) = claims {
            Ok(Self(claims))
        } else {
            Err(HttpError::forbidden().msg("token not allowed (expected ACCESS)"))
        }
    }
}

/// The live user record resolved by the auth middleware from the access token.
#[derive(Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Reject non-access tokens with a forbidden status first; a missing
        // user extension past that point is a middleware wiring bug.
        let _claims = AccessToken::from_request_parts(parts, state).await?;

        let user = Extension::<User>::from_request_parts(parts, state)
            .await
            .map_err(HttpError::internal().err())?
            .0;

        Ok(Self(user))
    }
}

/// Proof that the requester is a staff member.
#[derive(Clone)]
pub struct StaffAccess(pub User);

impl<S> FromRequestParts<S> for StaffAccess
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;

        if user.is_staff {
            Ok(Self(user))
        } else {
            Err(HttpError::forbidden().msg("staff access required"))
        }
    }
}

/// Proof that the requester is a superuser.
#[derive(Clone)]
pub struct SuperuserAccess(pub User);

impl<S> FromRequestParts<S> for SuperuserAccess
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;

        if user.is_superuser {
            Ok(Self(user))
        } else {
            Err(HttpError::forbidden().msg("superuser access required"))
        }
    }
}
