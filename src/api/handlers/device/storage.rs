//! SQL queries for users and access-token sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::session::SessionKind;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub security_stamp: Uuid,
}

impl<'r> FromRow<'r, PgRow> for UserRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            password_hash: row.try_get("password_hash")?,
            security_stamp: row.try_get("security_stamp")?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BearerSession {
    pub(crate) user_id: Uuid,
    pub(crate) kind: SessionKind,
}

impl<'r> FromRow<'r, PgRow> for BearerSession {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            kind: SessionKind::from_db(&kind)?,
        })
    }
}

pub(crate) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>(
        "SELECT user_id, email, phone, password_hash, security_stamp FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch user by email")
}

pub(crate) async fn get_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>(
        "SELECT user_id, email, phone, password_hash, security_stamp FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch user")
}

/// Rotates the security stamp, invalidating every outstanding one-time code
/// derived from the old one. Returns the new stamp.
pub(crate) async fn rotate_security_stamp(pool: &PgPool, user_id: Uuid) -> Result<Uuid> {
    let stamp = Uuid::new_v4();
    sqlx::query("UPDATE users SET security_stamp = $1 WHERE user_id = $2")
        .bind(stamp)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to rotate security stamp")?;
    Ok(stamp)
}

pub(crate) async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
        .bind(password_hash)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to update password hash")?;
    Ok(())
}

pub(crate) async fn insert_session(
    pool: &PgPool,
    token_hash: &[u8],
    user_id: Uuid,
    registration_id: Option<Uuid>,
    kind: SessionKind,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO device_sessions (token_hash, user_id, registration_id, kind, created_at, expires_at)
        VALUES ($1, $2, $3, $4, NOW(), $5)
        ",
    )
    .bind(token_hash)
    .bind(user_id)
    .bind(registration_id)
    .bind(kind.as_str())
    .bind(expires_at)
    .execute(pool)
    .await
    .context("Failed to insert session")?;
    Ok(())
}

pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<BearerSession>> {
    sqlx::query_as::<_, BearerSession>(
        r"
        SELECT user_id, kind
        FROM device_sessions
        WHERE token_hash = $1 AND expires_at > NOW()
        ",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch session")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            user_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            phone: Some("+37060000000".to_string()),
            password_hash: "$argon2id$...".to_string(),
            security_stamp: Uuid::new_v4(),
        };
        assert_eq!(record.email, "alice@example.com");
        assert!(record.phone.is_some());
    }
}
