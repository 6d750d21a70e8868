pub mod book;
pub mod order;
pub mod outbox;
pub mod payment;
