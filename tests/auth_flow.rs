mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{acquire_db_lock, json_body, TestApp};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct AuthenticatedUser {
    email: String,
    role: String,
}

fn refresh_cookie(response: &hyper::Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::to_owned)
}

#[tokio::test]
async fn signup_login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/auth/signup",
            &json!({
                "name": "Asha Rao",
                "email": "Asha@Example.com",
                "password": "password123",
                "country": "IN"
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = refresh_cookie(&response).expect("signup sets refresh cookie");
    assert!(cookie.starts_with("refresh_token="));

    let token = app.login_token("asha@example.com", "password123").await?;
    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let user: AuthenticatedUser = serde_json::from_value(json_body(response).await?)?;
    assert_eq!(user.email, "asha@example.com");
    assert_eq!(user.role, "user");

    let response = app.get("/api/users/me", Some(&token)).await?;
    let profile = json_body(response).await?;
    assert_eq!(profile["user"]["plan"], "free");
    assert_eq!(profile["user"]["slug"], "asha-rao");
    assert_eq!(profile["project_limit"], 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signup_rejects_duplicates_and_blank_fields() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let payload = json!({
        "name": "Dev",
        "email": "dev@example.com",
        "password": "password123"
    });
    let response = app.post_json("/api/auth/signup", &payload, None).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.post_json("/api/auth/signup", &payload, None).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            "/api/auth/signup",
            &json!({ "name": " ", "email": "x@example.com", "password": "password123" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/auth/signup",
            &json!({ "name": "Short", "email": "short@example.com", "password": "abc" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Mira", "mira@example.com", "password123", "user")
        .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "mira@example.com", "password": "nope-nope" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/auth/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_revokes_cookie() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("Ravi", "ravi@example.com", "password123", "user")
        .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "ravi@example.com", "password": "password123" }),
            None,
        )
        .await?;
    let first = refresh_cookie(&response).expect("login sets refresh cookie");

    let refresh = |cookie: String| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/auth/refresh")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
    };

    let response = app.send_request(refresh(first.clone())?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = refresh_cookie(&response).expect("refresh sets a new cookie");
    assert_ne!(first, second);

    let response = app.send_request(refresh(first)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
