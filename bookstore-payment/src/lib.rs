pub mod processor;

pub use processor::PaymentProcessor;
