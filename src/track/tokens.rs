//! Bounded concurrency tokens
//!
//! Disk-bound stages acquire a token before starting work and release it
//! by dropping. Capacities are kept deliberately small; parallel I/O
//! against one spindle degrades quickly past a handful of outstanding
//! operations.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of work tokens
///
/// Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct TokenPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held token. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct Token {
    _permit: OwnedSemaphorePermit,
}

impl TokenPool {
    /// Create a pool with `capacity` tokens
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a token is free and take it
    pub async fn acquire(&self) -> Token {
        // The semaphore is never closed, so acquisition cannot fail
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore closed");
        Token { _permit: permit }
    }

    /// Total number of tokens in the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tokens not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
