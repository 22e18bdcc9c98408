mod common;

use anyhow::{Context, Result};
use axum::http::{header::SET_COOKIE, StatusCode};
use common::{acquire_db_lock, read_json, LoginResponse, TestApp};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct Me {
    email: String,
    privilege: String,
    is_owner: bool,
    role: Option<String>,
}

#[tokio::test]
async fn register_verify_login_and_me() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let login = app.signup("ada@example.com", "s3cret").await?;

    let response = app.get("/me", Some(&login.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Me = read_json(response).await?;
    assert_eq!(me.email, "ada@example.com");
    assert_eq!(me.privilege, "owner");
    assert!(me.is_owner);
    assert_eq!(me.role.as_deref(), Some("Owner"));

    let response = app.get("/auth/check", Some(&login.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = read_json(response).await?;
    assert_eq!(body["status"], "authorized");
    assert_eq!(body["user"]["id"], login.user_id.to_string());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_email_is_rejected_regardless_of_password() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.register("dup@example.com", "first").await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.register("DUP@example.com", "second").await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unverified_user_cannot_log_in() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.register("pending@example.com", "s3cret").await?;
    let response = app.login("pending@example.com", "s3cret").await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn verification_link_works_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.register("link@example.com", "s3cret").await?;
    let token = app.mailer().last_token_for("link@example.com").await?;

    let response = app.get(&format!("/verify?token={token}"), None).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get(&format!("/verify?token={token}"), None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.login("link@example.com", "s3cret").await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.signup("grace@example.com", "right").await?;
    let response = app.login("grace@example.com", "wrong").await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn revoked_session_rejects_a_validly_signed_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let login = app.signup("logout@example.com", "s3cret").await?;

    let response = app
        .post_json("/logout", &json!({}), Some(&login.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get(SET_COOKIE)
        .context("logout should clear the refresh cookie")?
        .to_str()?;
    assert!(cleared.contains("Max-Age=0"));

    assert!(app.state.tokens.verify_access(&login.access_token).is_ok());
    let response = app.get("/me", Some(&login.access_token)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn missing_or_garbage_bearer_is_unauthorized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/templates/all", Some("not-a-jwt")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn refresh_cookie_mints_a_new_session() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.signup("refresh@example.com", "s3cret").await?;
    let response = app.login("refresh@example.com", "s3cret").await?;
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("login should set a refresh cookie")?
        .to_str()?
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("refresh_token="));

    let response = app.post_with_cookie("/refresh", &cookie).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_some());
    let refreshed: LoginResponse = read_json(response).await?;

    let response = app.get("/me", Some(&refreshed.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.post_with_cookie("/refresh", "refresh_token=bogus").await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn invited_member_sets_password_and_joins_the_organization() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.signup("boss@example.com", "s3cret").await?;
    let member = app
        .invite_member(&owner.access_token, "new@example.com", None)
        .await?;

    let response = app.get("/me", Some(&member.access_token)).await?;
    let me: Me = read_json(response).await?;
    assert_eq!(me.privilege, "member");
    assert!(!me.is_owner);
    assert_eq!(me.role.as_deref(), Some("Member"));

    let response = app
        .post_json(
            "/invite",
            &json!({ "email": "other@example.com" }),
            Some(&member.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.login("new@example.com", "member-pass").await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn invitation_token_only_sets_a_password() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let owner = app.signup("inviter@example.com", "s3cret").await?;
    let response = app
        .post_json(
            "/invite",
            &json!({ "email": "guest@example.com", "first_name": "Guest" }),
            Some(&owner.access_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let token = app.mailer().last_token_for("guest@example.com").await?;

    let response = app
        .post_json("/verify", &json!({ "token": token }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app.get(&format!("/verify?token={token}"), None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/set-password",
            &json!({ "token": token, "password": "guest-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.login("guest@example.com", "guest-pass").await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn register_always_makes_the_founder_owner() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/register",
            &json!({
                "first_name": "Eve",
                "last_name": "Sneaky",
                "email": "eve@example.com",
                "password": "s3cret",
                "role": "Auditor",
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = app.mailer().last_token_for("eve@example.com").await?;
    let response = app
        .post_json("/verify", &json!({ "token": token }), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.login("eve@example.com", "s3cret").await?;
    let login: LoginResponse = read_json(response).await?;

    let response = app.get("/me", Some(&login.access_token)).await?;
    let me: Me = read_json(response).await?;
    assert_eq!(me.role.as_deref(), Some("Owner"));
    assert_eq!(me.privilege, "owner");

    let response = app.get("/api/roles", Some(&login.access_token)).await?;
    let roles: Vec<serde_json::Value> = read_json(response).await?;
    let names: Vec<&str> = roles.iter().filter_map(|role| role["name"].as_str()).collect();
    assert_eq!(names, ["Administrator", "Member", "Owner"]);

    app.cleanup().await?;
    Ok(())
}
