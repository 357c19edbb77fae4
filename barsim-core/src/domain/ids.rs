use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-assigned order identifier. Strictly increasing in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic order id source owned by a single broker.
#[derive(Debug, Clone)]
pub struct OrderIdGenerator {
    next: u64,
}

impl OrderIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> OrderId {
        OrderId(self.next)
    }

    pub fn next_id(&mut self) -> OrderId {
        let id = OrderId(self.next);
        self.next += 1;
        id
    }
}

impl Default for OrderIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
