use std::fmt;

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Registry of the queues the choreography uses.
///
/// The wire names are part of the contract with the other services and must
/// not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// `OrderPlaced` events, produced by ordering and consumed by payment.
    OrderPlaced,
    /// `PaymentProcessed` events, produced by payment and consumed by catalog.
    PaymentProcessed,
}

impl Queue {
    pub const ALL: [Queue; 2] = [Queue::OrderPlaced, Queue::PaymentProcessed];

    pub const fn name(self) -> &'static str {
        match self {
            Queue::OrderPlaced => "OrderQueue",
            Queue::PaymentProcessed => "EditBookCount",
        }
    }

    pub fn dead_letter_name(self) -> String {
        format!("{}{}", self.name(), DEAD_LETTER_SUFFIX)
    }

    pub fn from_name(name: &str) -> Option<Queue> {
        Queue::ALL.into_iter().find(|queue| queue.name() == name)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(Queue::OrderPlaced.name(), "OrderQueue");
        assert_eq!(Queue::PaymentProcessed.name(), "EditBookCount");
        assert_eq!(Queue::PaymentProcessed.dead_letter_name(), "EditBookCount.dead-letter");
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Queue::from_name("OrderQueue"), Some(Queue::OrderPlaced));
        assert_eq!(Queue::from_name("EditBookCount"), Some(Queue::PaymentProcessed));
        assert_eq!(Queue::from_name("orderqueue"), None);
    }
}
