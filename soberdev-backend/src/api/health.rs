use axum::Json;
use axum::extract::State;
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;

#[derive(Serialize)]
pub(crate) struct Identity {
    /// This backend's unique ID
    id: Option<Uuid>,
    /// This backend's hostname
    hostname: String,
    /// Backend service version
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
}

/// Performs a health check
pub(super) async fn get_health(State(AppState { conf_handle, .. }): State<AppState>) -> Json<Identity> {
    let conf = conf_handle.get_conf();

    Json(Identity {
        id: conf.id,
        hostname: conf.hostname.clone(),
        version: Some(env!("CARGO_PKG_VERSION")),
    })
}
