mod common;

use axum::http::{self, StatusCode};
use serde_json::json;
use tower::Service as _;

use common::*;

#[tokio::test]
async fn me_returns_the_full_profile() {
    let state = mock_state().await;

    let mut user = user_store::User::create(
        user_store::NewUser::new("profile@example.com", "testpass123"),
        time::OffsetDateTime::now_utc(),
    )
    .expect("valid user");
    user.first_name = "John".to_owned();
    user.last_name = "Doe".to_owned();
    state.user_store.insert_user(&user).await.expect("insert user");

    let mut app = make_app(state);

    let (access, _) = obtain_token_pair(&mut app, "profile@example.com", "testpass123").await;

    let response = app
        .call(authed_request(http::Method::GET, "/v1/users/me", &access))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["email"], "profile@example.com");
    assert_eq!(body["full_name"], "John Doe");
    assert_eq!(body["initials"], "JD");
    assert_eq!(body["preferred_language"], "en");
    assert_eq!(body["timezone"], "UTC");
    assert_eq!(body["is_staff"], false);
    assert_eq!(body["is_verified"], false);
    // A successful login stamps last_login.
    assert!(body["last_login"].is_string());
}

#[tokio::test]
async fn me_can_be_patched() {
    let state = mock_state().await;
    seed_user(&state, "patch@example.com", "testpass123").await;
    let mut app = make_app(state);

    let (access, _) = obtain_token_pair(&mut app, "patch@example.com", "testpass123").await;

    let response = app
        .call(authed_json_request(
            http::Method::PATCH,
            "/v1/users/me",
            &access,
            json!({
                "first_name": "Jane",
                "phone_number": "+6281234567890",
                "preferred_language": "id",
                "marketing_emails": true
            }),
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["first_name"], "Jane");
    assert_eq!(body["phone_number"], "+6281234567890");
    assert_eq!(body["preferred_language"], "id");
    assert_eq!(body["marketing_emails"], true);

    // An invalid phone number is rejected without touching the profile.
    let response = app
        .call(authed_json_request(
            http::Method::PATCH,
            "/v1/users/me",
            &access,
            json!({ "phone_number": "not-a-number" }),
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_creation_is_staff_only() {
    let state = mock_state().await;
    seed_user(&state, "pleb@example.com", "testpass123").await;
    seed_staff_user(&state, "staff@example.com", "staffpass123").await;
    let mut app = make_app(state);

    let payload = json!({
        "email": "newhire@example.com",
        "password": "newhirepass123",
        "first_name": "New",
        "last_name": "Hire"
    });

    // A regular user is refused.
    let (access, _) = obtain_token_pair(&mut app, "pleb@example.com", "testpass123").await;
    let response = app
        .call(authed_json_request(http::Method::POST, "/v1/users", &access, payload.clone()))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A staff member is allowed.
    let (access, _) = obtain_token_pair(&mut app, "staff@example.com", "staffpass123").await;
    let response = app
        .call(authed_json_request(http::Method::POST, "/v1/users", &access, payload.clone()))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["email"], "newhire@example.com");
    assert_eq!(body["full_name"], "New Hire");
    assert_eq!(body["is_staff"], false);

    // Duplicated email is a conflict.
    let response = app
        .call(authed_json_request(http::Method::POST, "/v1/users", &access, payload))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Missing password is a bad request.
    let response = app
        .call(authed_json_request(
            http::Method::POST,
            "/v1/users",
            &access,
            json!({ "email": "incomplete@example.com" }),
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_can_look_up_and_verify_users() {
    let state = mock_state().await;
    let target = seed_user(&state, "target@example.com", "testpass123").await;
    seed_staff_user(&state, "admin@example.com", "staffpass123").await;
    let mut app = make_app(state);

    let (access, _) = obtain_token_pair(&mut app, "admin@example.com", "staffpass123").await;

    let response = app
        .call(authed_request(
            http::Method::GET,
            &format!("/v1/users/{}", target.id),
            &access,
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"], "target@example.com");
    assert_eq!(body["is_verified"], false);

    let response = app
        .call(authed_request(
            http::Method::POST,
            &format!("/v1/users/{}/verify-email", target.id),
            &access,
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_verified"], true);
    assert!(body["email_verified_at"].is_string());

    // Unknown users yield a not found.
    let response = app
        .call(authed_request(
            http::Method::GET,
            &format!("/v1/users/{}", uuid::Uuid::new_v4()),
            &access,
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn employee_profiles_roundtrip() {
    let state = mock_state().await;
    let target = seed_user(&state, "worker@example.com", "testpass123").await;
    seed_staff_user(&state, "hr@example.com", "staffpass123").await;
    let mut app = make_app(state);

    let (access, _) = obtain_token_pair(&mut app, "hr@example.com", "staffpass123").await;

    // Nothing recorded yet.
    let response = app
        .call(authed_request(
            http::Method::GET,
            &format!("/v1/employees/{}", target.id),
            &access,
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .call(authed_json_request(
            http::Method::PUT,
            &format!("/v1/employees/{}", target.id),
            &access,
            json!({
                "national_id": "3174012345678901",
                "gender": "female",
                "employment_status": "contract",
                "contract_months": 12,
                "contract_start_date": "2025-02-01"
            }),
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .call(authed_request(
            http::Method::GET,
            &format!("/v1/employees/{}", target.id),
            &access,
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["gender"], "female");
    assert_eq!(body["contract_months"], 12);
    assert_eq!(body["contract_start_date"], "2025-02-01");

    // Records can't be attached to unknown users.
    let response = app
        .call(authed_json_request(
            http::Method::PUT,
            &format!("/v1/employees/{}", uuid::Uuid::new_v4()),
            &access,
            json!({ "contract_months": 1 }),
        ))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
