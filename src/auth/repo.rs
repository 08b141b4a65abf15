use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::cipher::SealedField;
use crate::auth::repo_types::{Role, User};
use crate::error::AuthError;
use crate::outbox::PendingEmail;

const USER_COLUMNS: &str = "id, display_name, display_name_iv, email, email_iv, email_lookup, \
     password_hash, role, is_verified, verification_token, verification_token_expiry, created_at";

/// A duplicate `email_lookup` hits the unique index; everything else
/// is an internal failure.
fn map_insert_error(e: sqlx::Error) -> AuthError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::Conflict,
        other => other.into(),
    }
}

fn consume_verification_sql() -> String {
    format!(
        r#"
        UPDATE users
        SET is_verified = TRUE,
            verification_token = NULL,
            verification_token_expiry = NULL
        WHERE verification_token = $1
          AND verification_token_expiry > now()
        RETURNING {USER_COLUMNS}
        "#
    )
}

/// Everything needed to persist a fresh, unverified user.
pub struct NewUser {
    pub display_name: SealedField,
    pub email: SealedField,
    pub email_lookup: String,
    pub password_hash: String,
    pub verification_token: String,
    pub verification_token_expiry: OffsetDateTime,
}

impl User {
    /// Insert the user and their pending verification email in one
    /// transaction. A duplicate `email_lookup` loses the race at the
    /// unique index and surfaces as `Conflict`, regardless of any
    /// earlier existence check.
    pub async fn create_with_outbox(
        db: &PgPool,
        new: NewUser,
        email: PendingEmail,
    ) -> Result<User, AuthError> {
        let mut tx = db.begin().await?;

        let inserted = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (display_name, display_name_iv, email, email_iv, email_lookup,
                 password_hash, verification_token, verification_token_expiry)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.display_name.value)
        .bind(&new.display_name.iv)
        .bind(&new.email.value)
        .bind(&new.email.iv)
        .bind(&new.email_lookup)
        .bind(&new.password_hash)
        .bind(&new.verification_token)
        .bind(new.verification_token_expiry)
        .fetch_one(&mut *tx)
        .await;

        let user = inserted.map_err(map_insert_error)?;

        email.insert(&mut tx, user.id).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn find_by_lookup(db: &PgPool, lookup: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email_lookup = $1"
        ))
        .bind(lookup)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Flip the user to verified and clear the token, guarded by exact
    /// token match and a still-future expiry. The single UPDATE makes
    /// consumption at-most-once: of two concurrent requests with the
    /// same token, one matches zero rows.
    pub async fn consume_verification(
        db: &PgPool,
        token: &str,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&consume_verification_sql())
            .bind(token)
            .fetch_optional(db)
            .await?;
        Ok(user)
    }

    pub async fn list(db: &PgPool) -> Result<Vec<User>, AuthError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    pub async fn update_role(
        db: &PgPool,
        id: Uuid,
        role: Role,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Hard delete, no tombstone. Outbox rows go with it via cascade.
    pub async fn delete(db: &PgPool, id: Uuid) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
