//! Wire contracts shared by the order, payment and catalog services.
//!
//! Nothing in here talks to a broker or a database: the types describe what
//! travels between services and which queue each payload belongs to.

pub mod models;
pub mod queues;

pub use models::events::{
    DeadLetter, DeadLetterReason, DecodeError, EventContract, OrderLine, OrderPlaced,
    PaymentProcessed,
};
pub use queues::Queue;

/// Identifier assigned to an order by the order store on commit.
pub type OrderId = i64;
/// Identifier of a book in the catalog.
pub type BookId = i64;
/// Identifier of the customer placing an order.
pub type CustomerId = i64;
