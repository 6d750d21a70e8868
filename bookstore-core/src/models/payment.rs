use bookstore_shared::{CustomerId, OrderId, OrderPlaced};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(PaymentStatus::Pending),
            "Completed" => Some(PaymentStatus::Completed),
            "Failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Payment method, stored as its numeric code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PaymentMethod {
    CreditCard,
    #[default]
    PayPal,
    Stripe,
    Wallet,
}

impl PaymentMethod {
    pub fn code(&self) -> i16 {
        match self {
            PaymentMethod::CreditCard => 0,
            PaymentMethod::PayPal => 1,
            PaymentMethod::Stripe => 2,
            PaymentMethod::Wallet => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(PaymentMethod::CreditCard),
            1 => Some(PaymentMethod::PayPal),
            2 => Some(PaymentMethod::Stripe),
            3 => Some(PaymentMethod::Wallet),
            _ => None,
        }
    }
}

/// A recorded payment. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: OrderId,
    pub user_id: CustomerId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub order_id: OrderId,
    pub user_id: CustomerId,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
}

impl NewPayment {
    /// There is no gateway: every payment for a placed order completes.
    pub fn completed_for(order: &OrderPlaced, method: PaymentMethod) -> Self {
        Self {
            order_id: order.order_id,
            user_id: order.customer_id,
            amount: order.total_price,
            status: PaymentStatus::Completed,
            method,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a create-or-ignore payment write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRecord {
    Created(Payment),
    AlreadyRecorded(Payment),
}

impl PaymentRecord {
    pub fn payment(&self) -> &Payment {
        match self {
            PaymentRecord::Created(payment) | PaymentRecord::AlreadyRecorded(payment) => payment,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, PaymentRecord::Created(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookstore_shared::OrderLine;

    #[test]
    fn test_method_codes() {
        assert_eq!(PaymentMethod::CreditCard.code(), 0);
        assert_eq!(PaymentMethod::Wallet.code(), 3);
        assert_eq!(PaymentMethod::from_code(1), Some(PaymentMethod::PayPal));
        assert_eq!(PaymentMethod::from_code(4), None);
        assert_eq!(PaymentMethod::default(), PaymentMethod::PayPal);
    }

    #[test]
    fn test_completed_for_takes_the_order_total() {
        let order = OrderPlaced {
            order_id: 8,
            customer_id: 21,
            total_price: Decimal::new(2000, 2),
            items: vec![OrderLine::new(7, 2, Decimal::new(1000, 2))],
            created_at_utc: Utc::now(),
        };

        let payment = NewPayment::completed_for(&order, PaymentMethod::Stripe);
        assert_eq!(payment.order_id, 8);
        assert_eq!(payment.user_id, 21);
        assert_eq!(payment.amount, Decimal::new(2000, 2));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.method, PaymentMethod::Stripe);
    }
}
