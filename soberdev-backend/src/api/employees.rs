use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use user_store::{EmployeeProfile, Gender};
use uuid::Uuid;

use super::{format_date, map_store_error, parse_date};
use crate::AppState;
use crate::extract::StaffAccess;
use crate::http::HttpError;

pub fn make_router<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/{user_id}", get(get_employee_profile).put(put_employee_profile))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub(crate) struct EmployeeProfileResponse {
    user_id: Uuid,
    national_id: Option<String>,
    gender: Option<Gender>,
    insurance_number: Option<String>,
    employment_status: Option<String>,
    contract_months: u32,
    contract_start_date: Option<String>,
}

impl From<&EmployeeProfile> for EmployeeProfileResponse {
    fn from(profile: &EmployeeProfile) -> Self {
        Self {
            user_id: profile.user_id,
            national_id: profile.national_id.clone(),
            gender: profile.gender,
            insurance_number: profile.insurance_number.clone(),
            employment_status: profile.employment_status.clone(),
            contract_months: profile.contract_months,
            contract_start_date: profile.contract_start_date.and_then(format_date),
        }
    }
}

/// Returns the employment record of a user (staff only)
pub(crate) async fn get_employee_profile(
    State(AppState { user_store, .. }): State<AppState>,
    _staff: StaffAccess,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EmployeeProfileResponse>, HttpError> {
    let profile = user_store
        .employee_profile(user_id)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| HttpError::not_found().msg("no employment record for this user"))?;

    Ok(Json(EmployeeProfileResponse::from(&profile)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct EmployeeProfileRequest {
    national_id: Option<String>,
    gender: Option<Gender>,
    insurance_number: Option<String>,
    employment_status: Option<String>,
    #[serde(default)]
    contract_months: u32,
    contract_start_date: Option<String>,
}

/// Creates or replaces the employment record of a user (staff only)
pub(crate) async fn put_employee_profile(
    State(AppState { user_store, .. }): State<AppState>,
    StaffAccess(staff): StaffAccess,
    Path(user_id): Path<Uuid>,
    Json(req): Json<EmployeeProfileRequest>,
) -> Result<Json<EmployeeProfileResponse>, HttpError> {
    // The foreign key would catch this too, but a 404 beats a constraint error.
    let user = user_store
        .user_by_id(user_id)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| HttpError::not_found().msg("no such user"))?;

    let contract_start_date = req
        .contract_start_date
        .as_deref()
        .map(|value| parse_date(value, "contract_start_date"))
        .transpose()?;

    let profile = EmployeeProfile {
        user_id: user.id,
        national_id: req.national_id,
        gender: req.gender,
        insurance_number: req.insurance_number,
        employment_status: req.employment_status,
        contract_months: req.contract_months,
        contract_start_date,
    };

    user_store
        .upsert_employee_profile(&profile)
        .await
        .map_err(map_store_error)?;

    info!(user = %user.email, updated_by = %staff.email, "Updated employment record");

    Ok(Json(EmployeeProfileResponse::from(&profile)))
}
