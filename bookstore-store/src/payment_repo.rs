use async_trait::async_trait;
use bookstore_core::repository::PaymentRepository;
use bookstore_core::{
    NewPayment, Payment, PaymentMethod, PaymentRecord, PaymentStatus, StoreError, StoreResult,
};
use bookstore_shared::OrderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    order_id: i64,
    user_id: i64,
    amount: Decimal,
    status: String,
    method: i16,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("payment {} has status {}", row.id, row.status))
        })?;
        let method = PaymentMethod::from_code(row.method).ok_or_else(|| {
            StoreError::Corrupt(format!("payment {} has method code {}", row.id, row.method))
        })?;

        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            status,
            method,
            created_at: row.created_at,
        })
    }
}

const COLUMNS: &str = "id, order_id, user_id, amount, status, method, created_at";

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn record_payment(&self, payment: NewPayment) -> StoreResult<PaymentRecord> {
        let sql = format!(
            r#"
            INSERT INTO payments (order_id, user_id, amount, status, method, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {COLUMNS}
            "#
        );

        let inserted = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.order_id)
            .bind(payment.user_id)
            .bind(payment.amount)
            .bind(payment.status.as_str())
            .bind(payment.method.code())
            .bind(payment.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if let Some(row) = inserted {
            return Ok(PaymentRecord::Created(row.try_into()?));
        }

        let existing = self.find_by_order(payment.order_id).await?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "payment for order {} conflicted but cannot be read back",
                payment.order_id
            ))
        })?;
        Ok(PaymentRecord::AlreadyRecorded(existing))
    }

    async fn find_by_order(&self, order_id: OrderId) -> StoreResult<Option<Payment>> {
        let sql = format!("SELECT {COLUMNS} FROM payments WHERE order_id = $1");

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        row.map(Payment::try_from).transpose()
    }
}
