use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse as _, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use user_store::{Language, NewUser, ProfileUpdate, User};
use uuid::Uuid;

use super::{format_date, map_store_error, parse_date};
use crate::AppState;
use crate::extract::{CurrentUser, StaffAccess};
use crate::http::HttpError;

pub fn make_router<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/", post(create_user))
        .route("/me", get(get_me).patch(patch_me))
        .route("/{id}", get(get_user))
        .route("/{id}/verify-email", post(verify_user_email))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub(crate) struct UserResponse {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    full_name: String,
    initials: String,
    phone_number: Option<String>,
    date_of_birth: Option<String>,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
    is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    date_joined: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    email_verified_at: Option<OffsetDateTime>,
    preferred_language: Language,
    timezone: String,
    email_notifications: bool,
    marketing_emails: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            initials: user.initials(),
            phone_number: user.phone_number.clone(),
            date_of_birth: user.date_of_birth.and_then(format_date),
            is_active: user.is_active,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            is_verified: user.is_verified,
            date_joined: user.date_joined,
            last_login: user.last_login,
            email_verified_at: user.email_verified_at,
            preferred_language: user.preferred_language,
            timezone: user.timezone.clone(),
            email_notifications: user.email_notifications,
            marketing_emails: user.marketing_emails,
        }
    }
}

/// Returns the authenticated user's profile
pub(crate) async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProfileUpdateRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    date_of_birth: Option<String>,
    preferred_language: Option<Language>,
    timezone: Option<String>,
    email_notifications: Option<bool>,
    marketing_emails: Option<bool>,
}

impl ProfileUpdateRequest {
    fn into_update(self) -> Result<ProfileUpdate, HttpError> {
        let date_of_birth = self
            .date_of_birth
            .as_deref()
            .map(|value| parse_date(value, "date_of_birth"))
            .transpose()?;

        Ok(ProfileUpdate {
            first_name: self.first_name,
            last_name: self.last_name,
            phone_number: self.phone_number,
            date_of_birth,
            preferred_language: self.preferred_language,
            timezone: self.timezone,
            email_notifications: self.email_notifications,
            marketing_emails: self.marketing_emails,
        })
    }
}

/// Applies a partial update to the authenticated user's profile
pub(crate) async fn patch_me(
    State(AppState { user_store, .. }): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<UserResponse>, HttpError> {
    let update = req.into_update()?;

    let updated = user_store
        .update_profile(user.id, update)
        .await
        .map_err(map_store_error)?;

    debug!(user = %updated.email, "Updated profile");

    Ok(Json(UserResponse::from(&updated)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateUserRequest {
    email: Option<String>,
    password: Option<String>,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    phone_number: Option<String>,
    date_of_birth: Option<String>,
    preferred_language: Option<Language>,
    timezone: Option<String>,
}

/// Creates a regular user (staff only)
pub(crate) async fn create_user(
    State(AppState { user_store, .. }): State<AppState>,
    StaffAccess(staff): StaffAccess,
    Json(req): Json<CreateUserRequest>,
) -> Result<Response, HttpError> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(HttpError::bad_request().msg("email and password fields are required"));
    };

    let date_of_birth = req
        .date_of_birth
        .as_deref()
        .map(|value| parse_date(value, "date_of_birth"))
        .transpose()?;

    let mut new_user = NewUser::new(email, password);
    new_user.first_name = req.first_name;
    new_user.last_name = req.last_name;
    new_user.phone_number = req.phone_number;
    new_user.date_of_birth = date_of_birth;
    if let Some(language) = req.preferred_language {
        new_user.preferred_language = language;
    }
    if let Some(timezone) = req.timezone {
        new_user.timezone = timezone;
    }

    let user = User::create(new_user, OffsetDateTime::now_utc()).map_err(map_store_error)?;

    user_store.insert_user(&user).await.map_err(map_store_error)?;

    info!(user = %user.email, created_by = %staff.email, "Created a new user");

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))).into_response())
}

/// Returns a user by ID (staff only)
pub(crate) async fn get_user(
    State(AppState { user_store, .. }): State<AppState>,
    _staff: StaffAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, HttpError> {
    let user = user_store
        .user_by_id(id)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| HttpError::not_found().msg("no such user"))?;

    Ok(Json(UserResponse::from(&user)))
}

/// Marks a user's email address as verified (staff only)
pub(crate) async fn verify_user_email(
    State(AppState { user_store, .. }): State<AppState>,
    StaffAccess(staff): StaffAccess,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, HttpError> {
    let user = user_store
        .mark_email_verified(id, OffsetDateTime::now_utc())
        .await
        .map_err(map_store_error)?;

    info!(user = %user.email, verified_by = %staff.email, "Marked email as verified");

    Ok(Json(UserResponse::from(&user)))
}
