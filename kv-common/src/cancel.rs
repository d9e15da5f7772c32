//! # Cancellation
//!
//! A connection-scoped signal a blocking lock wait can observe without a
//! callback or channel registry: `cancel()` flips a flag, `is_cancelled()`
//! polls it. One token per connection, cloned into every command's call
//! into the keyspace, so a lock wait started before the connection closed
//! unwinds instead of blocking forever on a client that is never coming
//! back to read the reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    /// Marks this token (and every clone of it) cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_one_clone_is_visible_on_another() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
