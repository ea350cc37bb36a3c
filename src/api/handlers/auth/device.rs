//! Device fingerprinting and trust scoring.
//!
//! A device is the pair (user agent, client IP) salted and hashed; the salt
//! keeps fingerprints from being precomputable across deployments. The first
//! device an account logs in from is trusted at score 80, later devices start
//! untrusted at 50. Repeat sightings earn small score bumps. Blocked devices
//! fail login outright.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::error::AuthError;
use super::principal::require_auth;
use super::session::has_session_from_ip;
use super::state::AuthState;
use super::types::{DeviceActionRequest, DeviceResponse};

const NEW_TRUSTED_SCORE: i32 = 80;
const NEW_UNTRUSTED_SCORE: i32 = 50;
const SUSPICIOUS_SCORE_FLOOR: i32 = 20;
const LONGEVITY_BONUS_DAYS: i64 = 30;
const TRUST_CAP: i64 = 5;
const TRUST_CAP_IDLE_DAYS: i64 = 90;

/// What the login path needs to know about the caller's device.
#[derive(Debug)]
pub(super) struct DeviceAssessment {
    pub(super) fingerprint: String,
    pub(super) blocked: bool,
    pub(super) suspicious: bool,
    pub(super) new_device: bool,
}

pub(super) fn fingerprint_for(user_agent: &str, ip: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{user_agent}|{ip}|{salt}").as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Coarse user-agent classification; enough for scoring and display.
pub(super) fn classify_user_agent(user_agent: &str) -> (&'static str, &'static str, &'static str) {
    let ua = user_agent.to_lowercase();
    let kind = if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
        "mobile"
    } else {
        "desktop"
    };
    let os = if ua.contains("android") {
        "android"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "ios"
    } else if ua.contains("windows") {
        "windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macos"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "unknown"
    };
    // Order matters: Edge and Chrome both advertise "chrome".
    let browser = if ua.contains("edg/") {
        "edge"
    } else if ua.contains("firefox") {
        "firefox"
    } else if ua.contains("chrome") {
        "chrome"
    } else if ua.contains("safari") {
        "safari"
    } else {
        "unknown"
    };
    (kind, os, browser)
}

/// Score bump for a device seen again: longevity and mobile both add a
/// little. Clamped to 0..=100.
const fn repeat_score(current: i32, days_since_first_seen: i64, mobile: bool) -> i32 {
    let mut score = current;
    if days_since_first_seen > LONGEVITY_BONUS_DAYS {
        score += 10;
    }
    if mobile {
        score += 5;
    }
    if score > 100 {
        100
    } else if score < 0 {
        0
    } else {
        score
    }
}

/// Upsert the caller's device and decide whether this login looks risky.
/// A blocked device is fatal; suspicion only triggers an alert email.
pub(super) async fn assess_device(
    pool: &PgPool,
    state: &AuthState,
    account_id: Uuid,
    user_agent: &str,
    ip: &str,
) -> Result<DeviceAssessment, AuthError> {
    let fingerprint = fingerprint_for(user_agent, ip, state.device_salt());
    let (kind, os, browser) = classify_user_agent(user_agent);

    let query = r"
        SELECT trusted, blocked, score,
            FLOOR(EXTRACT(EPOCH FROM NOW() - first_seen) / 86400)::BIGINT AS age_days
        FROM devices
        WHERE account_id = $1 AND fingerprint = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let existing = sqlx::query(query)
        .bind(account_id)
        .bind(&fingerprint)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup device")?;

    if let Some(row) = existing {
        let blocked: bool = row.get("blocked");
        if blocked {
            return Err(AuthError::DeviceBlocked);
        }
        let current: i32 = row.get("score");
        let age_days: i64 = row.get("age_days");
        let score = repeat_score(current, age_days, kind == "mobile");
        touch_device(pool, account_id, &fingerprint, score).await?;
        return Ok(DeviceAssessment {
            fingerprint,
            blocked: false,
            suspicious: score < SUSPICIOUS_SCORE_FLOOR,
            new_device: false,
        });
    }

    let first_device = !account_has_devices(pool, account_id).await?;
    let (trusted, score) = if first_device {
        (true, NEW_TRUSTED_SCORE)
    } else {
        (false, NEW_UNTRUSTED_SCORE)
    };
    insert_device(
        pool,
        account_id,
        &fingerprint,
        kind,
        os,
        browser,
        trusted,
        score,
    )
    .await?;

    // A brand new device from an IP the account has never used is the main
    // signal for the login alert email.
    let known_ip = has_session_from_ip(pool, account_id, ip).await?;
    Ok(DeviceAssessment {
        fingerprint,
        blocked: false,
        suspicious: !first_device && !known_ip,
        new_device: true,
    })
}

async fn account_has_devices(pool: &PgPool, account_id: Uuid) -> Result<bool> {
    let query = "SELECT EXISTS (SELECT 1 FROM devices WHERE account_id = $1) AS present";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let present: bool = sqlx::query_scalar(query)
        .bind(account_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count devices")?;
    Ok(present)
}

#[allow(clippy::too_many_arguments)]
async fn insert_device(
    pool: &PgPool,
    account_id: Uuid,
    fingerprint: &str,
    kind: &str,
    os: &str,
    browser: &str,
    trusted: bool,
    score: i32,
) -> Result<()> {
    // Two concurrent logins from the same new device race on insert; losing
    // the race is harmless, the winner's row is the one we want.
    let query = r"
        INSERT INTO devices
            (account_id, fingerprint, kind, os, browser, trusted, score)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (account_id, fingerprint) DO UPDATE SET last_seen = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(fingerprint)
        .bind(kind)
        .bind(os)
        .bind(browser)
        .bind(trusted)
        .bind(score)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert device")?;
    Ok(())
}

async fn touch_device(
    pool: &PgPool,
    account_id: Uuid,
    fingerprint: &str,
    score: i32,
) -> Result<()> {
    let query = r"
        UPDATE devices
        SET last_seen = NOW(), score = $3
        WHERE account_id = $1 AND fingerprint = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(fingerprint)
        .bind(score)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch device")?;
    Ok(())
}

#[utoipa::path(
    get,
    path = "/v1/auth/devices",
    responses(
        (status = 200, description = "Devices seen for the account", body = [DeviceResponse]),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn list_devices(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;

    let query = r"
        SELECT fingerprint, kind, os, browser, trusted, score, blocked
        FROM devices
        WHERE account_id = $1
        ORDER BY last_seen DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(principal.account_id)
        .fetch_all(&pool.0)
        .instrument(span)
        .await
        .context("failed to list devices")?;

    let devices: Vec<DeviceResponse> = rows
        .iter()
        .map(|row| DeviceResponse {
            fingerprint: row.get("fingerprint"),
            kind: row.get("kind"),
            os: row.get("os"),
            browser: row.get("browser"),
            trusted: row.get("trusted"),
            score: row.get("score"),
            blocked: row.get("blocked"),
        })
        .collect();

    Ok(Json(devices))
}

#[utoipa::path(
    post,
    path = "/v1/auth/devices/trust",
    request_body = DeviceActionRequest,
    responses(
        (status = 204, description = "Device marked trusted"),
        (status = 400, description = "Unknown device or trust limit reached"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn trust_device(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeviceActionRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    // Per-account advisory lock: two concurrent trust calls must not both
    // pass the cap check.
    let mut tx = pool.0.begin().await.context("begin trust transaction")?;

    let lock_query = "SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = lock_query
    );
    sqlx::query(lock_query)
        .bind(principal.account_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to take device trust lock")?;

    // The cap ignores devices idle for a long time so stale entries do not
    // squat trust slots forever; the device itself is excluded so re-trusting
    // stays idempotent.
    let cap_query = r"
        SELECT COUNT(*) AS trusted
        FROM devices
        WHERE account_id = $1
          AND trusted
          AND fingerprint <> $2
          AND last_seen > NOW() - make_interval(days => $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = cap_query
    );
    let trusted: i64 = sqlx::query_scalar(cap_query)
        .bind(principal.account_id)
        .bind(&request.fingerprint)
        .bind(i32::try_from(TRUST_CAP_IDLE_DAYS).unwrap_or(90))
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to count trusted devices")?;
    if trusted >= TRUST_CAP {
        return Err(AuthError::BadRequest(
            "trusted device limit reached".to_string(),
        ));
    }

    let query = r"
        UPDATE devices
        SET trusted = TRUE
        WHERE account_id = $1 AND fingerprint = $2 AND NOT blocked
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal.account_id)
        .bind(&request.fingerprint)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to trust device")?;
    if result.rows_affected() == 0 {
        return Err(AuthError::BadRequest("unknown device".to_string()));
    }

    tx.commit().await.context("commit trust transaction")?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/devices/revoke-trust",
    request_body = DeviceActionRequest,
    responses(
        (status = 204, description = "Device trust revoked"),
        (status = 400, description = "Unknown device"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn revoke_device_trust(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeviceActionRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    let query = r"
        UPDATE devices
        SET trusted = FALSE
        WHERE account_id = $1 AND fingerprint = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal.account_id)
        .bind(&request.fingerprint)
        .execute(&pool.0)
        .instrument(span)
        .await
        .context("failed to revoke device trust")?;
    if result.rows_affected() == 0 {
        return Err(AuthError::BadRequest("unknown device".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/devices/block",
    request_body = DeviceActionRequest,
    responses(
        (status = 204, description = "Device blocked"),
        (status = 400, description = "Unknown device"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "devices"
)]
pub async fn block_device(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeviceActionRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::BadRequest("Missing payload".to_string()));
    };

    // Blocking also drops trust and score so an unblock starts from zero.
    let query = r"
        UPDATE devices
        SET blocked = TRUE, trusted = FALSE, score = 0
        WHERE account_id = $1 AND fingerprint = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(principal.account_id)
        .bind(&request.fingerprint)
        .execute(&pool.0)
        .instrument(span)
        .await
        .context("failed to block device")?;
    if result.rows_affected() == 0 {
        return Err(AuthError::BadRequest("unknown device".to_string()));
    }

    tracing::warn!(
        account_id = %principal.account_id,
        fingerprint = %request.fingerprint,
        "device blocked"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_salted() {
        let a = fingerprint_for("Mozilla/5.0", "203.0.113.9", "salt");
        let b = fingerprint_for("Mozilla/5.0", "203.0.113.9", "salt");
        let c = fingerprint_for("Mozilla/5.0", "203.0.113.9", "other-salt");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn classifies_common_user_agents() {
        let (kind, os, browser) = classify_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
        );
        assert_eq!((kind, os, browser), ("desktop", "windows", "chrome"));

        let (kind, os, browser) = classify_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Version/17.0 Mobile Safari/604.1",
        );
        assert_eq!((kind, os, browser), ("mobile", "ios", "safari"));

        let (kind, os, browser) =
            classify_user_agent("Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0");
        assert_eq!((kind, os, browser), ("desktop", "linux", "firefox"));

        assert_eq!(classify_user_agent("curl/8.0").0, "desktop");
    }

    #[test]
    fn edge_is_not_chrome() {
        let (_, _, browser) = classify_user_agent(
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 Chrome/120.0 Safari/537.36 Edg/120.0",
        );
        assert_eq!(browser, "edge");
    }

    #[test]
    fn repeat_score_bumps_and_clamps() {
        assert_eq!(repeat_score(50, 10, false), 50);
        assert_eq!(repeat_score(50, 31, false), 60);
        assert_eq!(repeat_score(50, 31, true), 65);
        assert_eq!(repeat_score(98, 31, true), 100);
        assert_eq!(repeat_score(-10, 0, false), 0);
    }
}
