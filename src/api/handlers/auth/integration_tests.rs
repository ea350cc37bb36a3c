//! End-to-end handler tests against a live Postgres.
//!
//! These exercise the Axum router the way production does, so they need a
//! database: set `JANUA_TEST_DSN` and run
//! `cargo test -- --ignored --test-threads=1`. The schema is applied on every
//! run; all statements are idempotent.

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use secrecy::SecretString;
use serde_json::{Value, json};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use super::oauth::ProviderRegistry;
use super::state::{AuthConfig, AuthState};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/db/sql/01_janua.sql"));

const PASSWORD: &str = "Secur3!Pass";

async fn test_pool() -> Result<PgPool> {
    let dsn = std::env::var("JANUA_TEST_DSN").context("JANUA_TEST_DSN not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .context("failed to apply schema")?;
    Ok(pool)
}

fn test_app(pool: PgPool) -> Router {
    let state = AuthState::new(
        AuthConfig::new("https://janua.test".to_string()),
        SecretString::from("integration-test-secret".to_string()),
        SecretString::from("integration-test-pepper".to_string()),
        "integration-test-salt".to_string(),
        ProviderRegistry::new(),
    );
    let (router, _) = crate::api::router().split_for_parts();
    router
        .layer(Extension(pool))
        .layer(Extension(Arc::new(state)))
}

fn unique_email() -> String {
    format!("user-{}@example.com", Uuid::new_v4().simple())
}

async fn post_json(
    app: &Router,
    path: &str,
    bearer: Option<&str>,
    body: Value,
) -> Result<(StatusCode, Value)> {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = request.body(Body::from(serde_json::to_vec(&body)?))?;

    let response = app.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn register(app: &Router, email: &str) -> Result<Value> {
    let (status, body) = post_json(
        app,
        "/v1/auth/register",
        None,
        json!({ "email": email, "password": PASSWORD, "name": "Test" }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    Ok(body)
}

async fn login(app: &Router, email: &str, password: &str) -> Result<(StatusCode, Value)> {
    post_json(
        app,
        "/v1/auth/login",
        None,
        json!({ "email": email, "password": password }),
    )
    .await
}

async fn failed_attempts(pool: &PgPool, email: &str) -> Result<i32> {
    let row = sqlx::query("SELECT failed_attempts FROM accounts WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(row.get("failed_attempts"))
}

#[tokio::test]
#[ignore]
async fn register_issues_tokens_for_new_email() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool);
    let email = unique_email();

    let body = register(&app, &email).await?;
    assert!(!body["access_token"].as_str().unwrap_or_default().is_empty());
    assert!(
        !body["refresh_token"]
            .as_str()
            .unwrap_or_default()
            .is_empty()
    );
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["email"], email.as_str());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn five_failures_lock_and_success_resets() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool.clone());
    let email = unique_email();
    register(&app, &email).await?;

    for attempt in 1..=4 {
        let (status, body) = login(&app, &email, "Wr0ng!Pass").await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "attempt {attempt}");
        assert_eq!(body["kind"], "INVALID_CREDENTIALS");
    }

    // Fifth consecutive failure trips the lock.
    let (status, body) = login(&app, &email, "Wr0ng!Pass").await?;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["kind"], "ACCOUNT_LOCKED");
    assert!(body["retry_after_seconds"].as_i64().unwrap_or(0) > 0);
    assert_eq!(failed_attempts(&pool, &email).await?, 5);

    // While locked, even the correct password is rejected and the counter
    // does not move.
    let (status, body) = login(&app, &email, PASSWORD).await?;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["kind"], "ACCOUNT_LOCKED");
    assert_eq!(failed_attempts(&pool, &email).await?, 5);

    // Once the lock lapses, a successful login resets the counter.
    sqlx::query("UPDATE accounts SET locked_until = NOW() - make_interval(secs => 1) WHERE email = $1")
        .bind(&email)
        .execute(&pool)
        .await?;
    let (status, _) = login(&app, &email, PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed_attempts(&pool, &email).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn concurrent_refreshes_rotate_exactly_once() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool);
    let email = unique_email();
    let tokens = register(&app, &email).await?;
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token");

    let body = json!({ "refresh_token": refresh_token });
    let (first, second) = tokio::join!(
        post_json(&app, "/v1/auth/refresh", None, body.clone()),
        post_json(&app, "/v1/auth/refresh", None, body.clone()),
    );
    let (first_status, first_body) = first?;
    let (second_status, second_body) = second?;

    let outcomes = [first_status, second_status];
    assert_eq!(
        outcomes.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "exactly one refresh may win: {first_status} / {second_status}"
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|s| **s == StatusCode::UNAUTHORIZED)
            .count(),
        1
    );

    // The winner's successor keeps working; the spent token stays dead.
    let winner = if first_status == StatusCode::OK {
        first_body
    } else {
        second_body
    };
    let successor = winner["refresh_token"].as_str().expect("successor");
    let (status, _) = post_json(
        &app,
        "/v1/auth/refresh",
        None,
        json!({ "refresh_token": successor }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&app, "/v1/auth/refresh", None, body).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "INVALID_OR_EXPIRED_TOKEN");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn logout_kills_the_refresh_token() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool);
    let email = unique_email();
    let tokens = register(&app, &email).await?;
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token");
    let body = json!({ "refresh_token": refresh_token });

    let (status, _) = post_json(&app, "/v1/auth/logout", None, body.clone()).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = post_json(&app, "/v1/auth/refresh", None, body.clone()).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["kind"], "INVALID_OR_EXPIRED_TOKEN");

    // Logout stays idempotent.
    let (status, _) = post_json(&app, "/v1/auth/logout", None, body.clone()).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn racing_first_registrations_elect_one_super_admin() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool.clone());

    sqlx::query("TRUNCATE accounts CASCADE")
        .execute(&pool)
        .await?;

    let (a, b) = tokio::join!(
        post_json(
            &app,
            "/v1/auth/register",
            None,
            json!({ "email": unique_email(), "password": PASSWORD }),
        ),
        post_json(
            &app,
            "/v1/auth/register",
            None,
            json!({ "email": unique_email(), "password": PASSWORD }),
        ),
    );
    assert_eq!(a?.0, StatusCode::CREATED);
    assert_eq!(b?.0, StatusCode::CREATED);

    let super_admins: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE roles @> ARRAY['super-admin']")
            .fetch_one(&pool)
            .await?;
    assert_eq!(super_admins, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn mfa_login_records_last_login_after_second_factor() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool.clone());
    let email = unique_email();
    let tokens = register(&app, &email).await?;
    let access_token = tokens["access_token"].as_str().expect("access token");

    let (status, setup) = post_json(
        &app,
        "/v1/auth/mfa/setup",
        Some(access_token),
        json!({ "channel": "totp" }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let secret = setup["secret"].as_str().expect("totp secret");

    let verifier = totp_rs::TOTP::new(
        totp_rs::Algorithm::SHA1,
        6,
        1,
        30,
        totp_rs::Secret::Encoded(secret.to_string())
            .to_bytes()
            .expect("secret bytes"),
        Some("janua".to_string()),
        email.clone(),
    )
    .expect("totp");

    let (status, enabled) = post_json(
        &app,
        "/v1/auth/mfa/enable",
        Some(access_token),
        json!({ "channel": "totp", "code": verifier.generate_current()? }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "enable failed: {enabled}");
    assert_eq!(enabled["backup_codes"].as_array().map(Vec::len), Some(10));

    // Password alone stops at the challenge and must not count as a login.
    let (status, challenge_body) = login(&app, &email, PASSWORD).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(challenge_body["kind"], "MFA_REQUIRED");
    let challenge = challenge_body["challenge"].as_str().expect("challenge");

    let pending: bool =
        sqlx::query_scalar("SELECT last_login_at IS NULL FROM accounts WHERE email = $1")
            .bind(&email)
            .fetch_one(&pool)
            .await?;
    assert!(pending, "last login must wait for the second factor");

    let (status, body) = post_json(
        &app,
        "/v1/auth/mfa/verify",
        None,
        json!({ "challenge": challenge, "code": verifier.generate_current()? }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "verify failed: {body}");
    assert!(!body["access_token"].as_str().unwrap_or_default().is_empty());

    let recorded: bool =
        sqlx::query_scalar("SELECT last_login_at IS NOT NULL FROM accounts WHERE email = $1")
            .bind(&email)
            .fetch_one(&pool)
            .await?;
    assert!(recorded);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn deactivated_account_cannot_login_or_refresh() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool.clone());
    let email = unique_email();
    let tokens = register(&app, &email).await?;
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token");

    sqlx::query("UPDATE accounts SET active = FALSE WHERE email = $1")
        .bind(&email)
        .execute(&pool)
        .await?;

    let (status, body) = login(&app, &email, PASSWORD).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "INVALID_CREDENTIALS");

    let (status, body) = post_json(
        &app,
        "/v1/auth/refresh",
        None,
        json!({ "refresh_token": refresh_token }),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "INVALID_OR_EXPIRED_TOKEN");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn trusted_device_cap_holds_under_concurrency() -> Result<()> {
    let pool = test_pool().await?;
    let app = test_app(pool.clone());
    let email = unique_email();
    let tokens = register(&app, &email).await?;
    let access_token = tokens["access_token"].as_str().expect("access token");
    let account_id = tokens["user"]["id"].as_str().expect("account id");

    // Seed untrusted devices directly; the register call already created one
    // trusted first device.
    for index in 0..6 {
        sqlx::query(
            r"
            INSERT INTO devices (account_id, fingerprint, kind, os, browser, trusted, score)
            VALUES ($1::uuid, $2, 'desktop', 'linux', 'firefox', FALSE, 50)
            ",
        )
        .bind(account_id)
        .bind(format!("fp-{index}-{account_id}"))
        .execute(&pool)
        .await?;
    }

    let trust = |index: usize| {
        post_json(
            &app,
            "/v1/auth/devices/trust",
            Some(access_token),
            json!({ "fingerprint": format!("fp-{index}-{account_id}") }),
        )
    };
    let results = tokio::join!(trust(0), trust(1), trust(2), trust(3), trust(4), trust(5));
    let statuses = [
        results.0?.0,
        results.1?.0,
        results.2?.0,
        results.3?.0,
        results.4?.0,
        results.5?.0,
    ];
    let granted = statuses
        .iter()
        .filter(|s| **s == StatusCode::NO_CONTENT)
        .count();
    // One slot is taken by the auto-trusted first device.
    assert_eq!(granted, 4, "statuses: {statuses:?}");

    let trusted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM devices WHERE account_id = $1::uuid AND trusted",
    )
    .bind(account_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(trusted, 5);
    Ok(())
}
