use crate::device::models::Device;
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Persistence boundary for device records. No protocol logic lives here;
/// lifecycle rules belong to [`crate::device::trust`].
pub struct DeviceRepo;

impl DeviceRepo {
    /// Inserts a new device row.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn create(pool: &PgPool, device: &Device) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO devices (registration_id, user_id, device_id, name, platform,
                                 pin_secret_hash, public_key_pem, is_trusted,
                                 trust_activation_at, requires_password, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(device.registration_id)
        .bind(device.user_id)
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(device.platform.as_str())
        .bind(&device.pin_secret_hash)
        .bind(&device.public_key_pem)
        .bind(device.is_trusted)
        .bind(device.trust_activation_at)
        .bind(device.requires_password)
        .bind(device.created_at)
        .execute(pool)
        .await
        .context("Failed to insert device")?;

        Ok(())
    }

    /// Gets a device by its stable registration id.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn get_by_registration_id(
        pool: &PgPool,
        registration_id: Uuid,
    ) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE registration_id = $1")
            .bind(registration_id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch device by registration id")
    }

    /// Gets a device by the client-chosen device id, scoped to one user.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn get_by_user_device(
        pool: &PgPool,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch device by user and device id")
    }

    /// Lists all devices for a user, oldest first.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Device>> {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list devices")
    }

    /// Counts devices registered by a user.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn count_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("Failed to count devices")?;
        Ok(count.0)
    }

    /// Stores (or rotates) the pin credential slot.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn set_pin_secret(
        pool: &PgPool,
        registration_id: Uuid,
        pin_secret_hash: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE devices SET pin_secret_hash = $1 WHERE registration_id = $2")
            .bind(pin_secret_hash)
            .bind(registration_id)
            .execute(pool)
            .await
            .context("Failed to store pin secret")?;
        Ok(())
    }

    /// Stores (or rotates) the fingerprint credential slot.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn set_public_key(
        pool: &PgPool,
        registration_id: Uuid,
        public_key_pem: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE devices SET public_key_pem = $1 WHERE registration_id = $2")
            .bind(public_key_pem)
            .bind(registration_id)
            .execute(pool)
            .await
            .context("Failed to store public key")?;
        Ok(())
    }

    /// Persists the lazy pending -> trusted flip.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn mark_trusted(pool: &PgPool, registration_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE devices SET is_trusted = TRUE WHERE registration_id = $1")
            .bind(registration_id)
            .execute(pool)
            .await
            .context("Failed to mark device trusted")?;
        Ok(())
    }

    /// Locks every device of a user behind a password login.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn set_requires_password_for_all(pool: &PgPool, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE devices SET requires_password = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to lock devices")?;
        Ok(result.rows_affected())
    }

    /// Clears the lock for one device only. Returns whether a row matched.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn clear_requires_password(
        pool: &PgPool,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE devices SET requires_password = FALSE WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .execute(pool)
        .await
        .context("Failed to unlock device")?;
        Ok(result.rows_affected() > 0)
    }

    /// Updates the last used timestamp after a successful grant.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn touch_last_used(pool: &PgPool, registration_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE devices SET last_used_at = NOW() WHERE registration_id = $1")
            .bind(registration_id)
            .execute(pool)
            .await
            .context("Failed to update device usage")?;
        Ok(())
    }

    /// Deletes a device by device id and user id.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn remove(pool: &PgPool, user_id: Uuid, device_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE user_id = $1 AND device_id = $2")
            .bind(user_id)
            .bind(device_id)
            .execute(pool)
            .await
            .context("Failed to delete device")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a device by registration id (eviction path).
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn remove_by_registration_id(pool: &PgPool, registration_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE registration_id = $1")
            .bind(registration_id)
            .execute(pool)
            .await
            .context("Failed to evict device")?;
        Ok(result.rows_affected() > 0)
    }
}
