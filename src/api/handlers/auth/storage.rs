//! Database helpers for accounts.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::types::PublicAccount;
use super::utils::is_unique_violation;

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub(super) enum RegisterOutcome {
    Created(Account),
    Conflict,
}

#[derive(Debug, Clone)]
pub(crate) struct Account {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) name: Option<String>,
    pub(crate) password_hash: Option<String>,
    pub(crate) roles: Vec<String>,
    pub(crate) tenant_id: String,
    pub(crate) active: bool,
    pub(crate) mfa_enabled: bool,
    pub(crate) mfa_channel: Option<String>,
    pub(crate) mfa_totp_secret: Option<String>,
    pub(crate) phone: Option<String>,
}

impl Account {
    pub(crate) fn to_public(&self) -> PublicAccount {
        PublicAccount {
            id: self.id.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            roles: self.roles.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        roles: row.get("roles"),
        tenant_id: row.get("tenant_id"),
        active: row.get("active"),
        mfa_enabled: row.get("mfa_enabled"),
        mfa_channel: row.get("mfa_channel"),
        mfa_totp_secret: row.get("mfa_totp_secret"),
        phone: row.get("phone"),
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, name, password_hash, roles, tenant_id, active, \
     mfa_enabled, mfa_channel, mfa_totp_secret, phone";

pub(super) async fn lookup_account_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<Account>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;

    Ok(row.as_ref().map(account_from_row))
}

pub(super) async fn lookup_account_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Account>> {
    let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by id")?;

    Ok(row.as_ref().map(account_from_row))
}

/// Serializes the first-registrant check; released on commit or rollback.
const FIRST_REGISTRANT_LOCK: i64 = 0x4a41_4e55_4101;

/// Insert a new account. The very first registrant becomes the tenant's
/// super-admin; everyone after that is a plain user. An advisory transaction
/// lock serializes the vacancy check, otherwise two racing first
/// registrations with different emails would both win.
pub(super) async fn insert_account(
    pool: &PgPool,
    email: &str,
    password_hash: Option<&str>,
    name: Option<&str>,
    auth_origin: &str,
) -> Result<RegisterOutcome> {
    let mut tx = pool.begin().await.context("begin register transaction")?;

    let lock_query = "SELECT pg_advisory_xact_lock($1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = lock_query
    );
    sqlx::query(lock_query)
        .bind(FIRST_REGISTRANT_LOCK)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to take registration lock")?;

    let count_query = "SELECT NOT EXISTS (SELECT 1 FROM accounts) AS vacant";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = count_query
    );
    let vacant: bool = sqlx::query(count_query)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to check for existing accounts")?
        .get("vacant");

    let roles: Vec<String> = if vacant {
        vec!["user".to_string(), "super-admin".to_string()]
    } else {
        vec!["user".to_string()]
    };

    let query = format!(
        r"
        INSERT INTO accounts
            (email, password_hash, name, roles, auth_origin)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {ACCOUNT_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(&roles)
        .bind(auth_origin)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let account = match row {
        Ok(row) => account_from_row(&row),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(RegisterOutcome::Conflict);
            }
            return Err(err).context("failed to insert account");
        }
    };

    tx.commit().await.context("commit register transaction")?;

    Ok(RegisterOutcome::Created(account))
}

pub(super) async fn update_last_login(pool: &PgPool, account_id: Uuid, ip: &str) -> Result<()> {
    let query = "UPDATE accounts SET last_login_at = NOW(), last_login_ip = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(ip)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update last login")?;
    Ok(())
}

pub(super) async fn set_password_hash(
    pool: &PgPool,
    account_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = "UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set password hash")?;
    Ok(())
}
