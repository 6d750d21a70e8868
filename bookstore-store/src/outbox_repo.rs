use async_trait::async_trait;
use bookstore_core::repository::OutboxRepository;
use bookstore_core::{OutboxMessage, OutboxStatus, StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

pub struct StoreOutboxRepository {
    pool: PgPool,
}

impl StoreOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    queue: String,
    payload: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("outbox message {} has status {}", row.id, row.status))
        })?;

        Ok(OutboxMessage {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            status,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            published_at: row.published_at,
        })
    }
}

// A message is claimable when pending, or in flight with a lapsed lease.
const CLAIMABLE: &str = r#"
    (status = 'Pending'
     OR (status = 'InFlight' AND claimed_at < NOW() - make_interval(secs => $2::double precision)))
"#;

const RETURNING: &str =
    "RETURNING id, queue, payload, status, attempts, last_error, created_at, claimed_at, published_at";

#[async_trait]
impl OutboxRepository for StoreOutboxRepository {
    async fn claim(&self, id: i64, lease: Duration) -> StoreResult<Option<OutboxMessage>> {
        let sql = format!(
            "UPDATE outbox SET status = 'InFlight', claimed_at = NOW() WHERE id = $1 AND {CLAIMABLE} {RETURNING}"
        );

        let row = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(id)
            .bind(lease.num_seconds() as f64)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        row.map(OutboxMessage::try_from).transpose()
    }

    async fn claim_batch(&self, limit: i64, lease: Duration) -> StoreResult<Vec<OutboxMessage>> {
        let sql = format!(
            r#"
            UPDATE outbox SET status = 'InFlight', claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox
                WHERE {CLAIMABLE}
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            {RETURNING}
            "#
        );

        let rows = sqlx::query_as::<_, OutboxRow>(&sql)
            .bind(limit)
            .bind(lease.num_seconds() as f64)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut messages = rows
            .into_iter()
            .map(OutboxMessage::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        // UPDATE ... RETURNING does not preserve the subquery order
        messages.sort_by_key(|message| message.id);
        Ok(messages)
    }

    async fn mark_published(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE outbox SET status = 'Published', published_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn release(&self, id: i64, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'Pending', claimed_at = NULL, attempts = attempts + 1, last_error = $2
            WHERE id = $1 AND status = 'InFlight'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }
}
