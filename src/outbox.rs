use std::time::Duration;

use axum::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::cipher::SealedField;
use crate::state::AppState;

/// The payload the external email collaborator consumes.
#[derive(Debug, Clone)]
pub struct VerificationEmail {
    pub recipient: String,
    pub display_name: String,
    pub verification_link: String,
}

/// External email delivery. Transport (SMTP, API) lives behind this
/// seam; the core only observes success or failure.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &VerificationEmail) -> anyhow::Result<()>;
}

/// Development mailer: logs the verification link instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &VerificationEmail) -> anyhow::Result<()> {
        info!(
            recipient = %email.recipient,
            link = %email.verification_link,
            "verification email (log transport)"
        );
        Ok(())
    }
}

/// A notification queued at signup, written in the same transaction as
/// the user row. PII columns are sealed the same way user fields are.
pub struct PendingEmail {
    pub recipient: SealedField,
    pub display_name: SealedField,
    pub verification_link: String,
}

impl PendingEmail {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO email_outbox
                (user_id, recipient, recipient_iv, display_name, display_name_iv,
                 verification_link)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_id)
        .bind(&self.recipient.value)
        .bind(&self.recipient.iv)
        .bind(&self.display_name.value)
        .bind(&self.display_name.iv)
        .bind(&self.verification_link)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recipient: String,
    pub recipient_iv: Option<String>,
    pub display_name: String,
    pub display_name_iv: Option<String>,
    pub verification_link: String,
    pub status: String,
    pub attempts: i32,
    pub created_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
}

/// Delivery attempts before a row is retired from the queue.
const MAX_SEND_ATTEMPTS: i32 = 5;

const FETCH_PENDING_SQL: &str = r#"
    SELECT id, user_id, recipient, recipient_iv, display_name, display_name_iv,
           verification_link, status, attempts, created_at, sent_at
    FROM email_outbox
    WHERE status = 'pending'
    ORDER BY created_at ASC
    LIMIT $1
"#;

const RECORD_FAILURE_SQL: &str = r#"
    UPDATE email_outbox
    SET attempts = attempts + 1,
        status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE status END
    WHERE id = $1
    RETURNING status
"#;

impl OutboxRow {
    pub async fn fetch_pending(db: &PgPool, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error> {
        sqlx::query_as::<_, OutboxRow>(FETCH_PENDING_SQL)
            .bind(limit)
            .fetch_all(db)
            .await
    }

    pub async fn mark_sent(db: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE email_outbox SET status = 'sent', sent_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Bumps the attempt counter and retires the row once it reaches
    /// the cutoff. Returns the row's new status.
    pub async fn record_failure(db: &PgPool, id: Uuid) -> Result<String, sqlx::Error> {
        sqlx::query_scalar::<_, String>(RECORD_FAILURE_SQL)
            .bind(id)
            .bind(MAX_SEND_ATTEMPTS)
            .fetch_one(db)
            .await
    }
}

/// Background delivery loop. A provider outage here never blocks or
/// rolls back account creation; rows stay pending and are retried on
/// the next tick.
pub async fn run_dispatcher(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = dispatch_once(&state).await {
            warn!(error = %e, "outbox dispatch pass failed");
        }
    }
}

pub async fn dispatch_once(state: &AppState) -> anyhow::Result<()> {
    let rows = OutboxRow::fetch_pending(&state.db, 25).await?;
    for row in rows {
        let recipient = state.cipher.open(&SealedField {
            value: row.recipient.clone(),
            iv: row.recipient_iv.clone(),
        });
        let display_name = state.cipher.open(&SealedField {
            value: row.display_name.clone(),
            iv: row.display_name_iv.clone(),
        });
        let (recipient, display_name) = match (recipient, display_name) {
            (Ok(r), Ok(d)) => (r, d),
            (Err(e), _) | (_, Err(e)) => {
                error!(outbox_id = %row.id, error = %e, "outbox row undecryptable");
                let status = OutboxRow::record_failure(&state.db, row.id).await?;
                if status == "failed" {
                    error!(outbox_id = %row.id, "outbox row retired after repeated failures");
                }
                continue;
            }
        };

        let email = VerificationEmail {
            recipient,
            display_name,
            verification_link: row.verification_link.clone(),
        };
        match state.mailer.send_verification(&email).await {
            Ok(()) => {
                OutboxRow::mark_sent(&state.db, row.id).await?;
                info!(outbox_id = %row.id, "verification email sent");
            }
            Err(e) => {
                warn!(outbox_id = %row.id, error = %e, attempts = row.attempts + 1, "email send failed");
                let status = OutboxRow::record_failure(&state.db, row.id).await?;
                if status == "failed" {
                    error!(outbox_id = %row.id, "outbox row retired after repeated failures");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_delivers() {
        let email = VerificationEmail {
            recipient: "alice@example.com".into(),
            display_name: "Alice".into(),
            verification_link: "http://localhost:8080/api/v1/auth/verify-email?token=abc".into(),
        };
        assert!(LogMailer.send_verification(&email).await.is_ok());
    }

    // A row that keeps failing must leave the pending queue instead of
    // occupying the dispatch batch forever.
    #[test]
    fn failure_update_retires_rows_at_the_cutoff() {
        assert!(MAX_SEND_ATTEMPTS > 0);
        assert!(RECORD_FAILURE_SQL.contains("attempts = attempts + 1"));
        assert!(RECORD_FAILURE_SQL.contains("CASE WHEN attempts + 1 >= $2 THEN 'failed'"));
        assert!(RECORD_FAILURE_SQL.contains("RETURNING status"));
    }

    #[test]
    fn dispatch_batch_only_sees_pending_rows() {
        assert!(FETCH_PENDING_SQL.contains("WHERE status = 'pending'"));
    }
}
