pub mod auth;
pub mod employees;
pub mod health;
pub mod users;

use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::http::HttpError;

pub(crate) const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

pub fn make_router<S>(state: crate::AppState) -> axum::Router<S> {
    axum::Router::new()
        .route("/health", axum::routing::get(health::get_health))
        .nest("/v1/auth", auth::make_router(state.clone()))
        .nest("/v1/users", users::make_router(state.clone()))
        .nest("/v1/employees", employees::make_router(state.clone()))
        .with_state(state)
}

#[track_caller]
pub(crate) fn map_store_error(e: user_store::StoreError) -> HttpError {
    use user_store::StoreError;

    match &e {
        StoreError::NotFound => HttpError::not_found().build(e),
        StoreError::DuplicateEmail => HttpError::conflict().build(e),
        StoreError::Invalid { .. } => HttpError::bad_request().build(e),
        StoreError::Backend(_) => HttpError::internal().build(e),
    }
}

pub(crate) fn parse_date(value: &str, field: &'static str) -> Result<Date, HttpError> {
    Date::parse(value, DATE_FORMAT).map_err(HttpError::bad_request().with_msg(field).err())
}

pub(crate) fn format_date(date: Date) -> Option<String> {
    date.format(DATE_FORMAT).ok()
}
