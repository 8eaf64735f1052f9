//! In-memory rental pool for development and testing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::core::error::PoolError;
use crate::pool::{Rental, RentalPool};

/// Factory that mints a fresh execution unit when the pool needs one.
pub type UnitFactory<U> = Box<dyn Fn() -> U + Send + Sync>;

/// Semaphore-backed pool with a fixed capacity.
///
/// Acquisition blocks while all slots are leased; destroying a rental
/// discards its unit and the factory mints a replacement on the next
/// acquire, so eviction never shrinks capacity.
pub struct InMemoryRentalPool<U> {
    capacity: usize,
    cost_per_rental: f64,
    factory: UnitFactory<U>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Rental<U>>>,
    acquired_total: AtomicU64,
    destroyed_total: AtomicU64,
}

impl<U> InMemoryRentalPool<U> {
    /// Create a pool with `capacity` slots and a unit factory.
    pub fn new(capacity: usize, factory: impl Fn() -> U + Send + Sync + 'static) -> Self {
        Self {
            capacity,
            cost_per_rental: 0.0,
            factory: Box::new(factory),
            slots: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            acquired_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
        }
    }

    /// Set the cost accrued by each rental use.
    pub fn with_cost_per_rental(mut self, cost: f64) -> Self {
        self.cost_per_rental = cost;
        self
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total successful acquisitions so far.
    pub fn acquired_total(&self) -> u64 {
        self.acquired_total.load(Ordering::Relaxed)
    }

    /// Total rentals destroyed so far.
    pub fn destroyed_total(&self) -> u64 {
        self.destroyed_total.load(Ordering::Relaxed)
    }

    fn mint(&self) -> Rental<U> {
        let id = Uuid::new_v4().to_string();
        Rental::new(
            id.clone(),
            format!("agreement-{id}"),
            format!("provider-{}", &id[..8]),
            self.cost_per_rental,
            Arc::new((self.factory)()),
        )
    }
}

#[async_trait]
impl<U> RentalPool<U> for InMemoryRentalPool<U>
where
    U: Send + Sync + 'static,
{
    async fn ready(&self) -> Result<(), PoolError> {
        Ok(())
    }

    async fn acquire(&self) -> Result<Rental<U>, PoolError> {
        // Cancellation safety: a dropped acquire future drops its pending
        // permit request; once the permit resolves there is no further await
        // before returning the rental.
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Draining)?;
        // The slot is handed back explicitly on release/destroy.
        permit.forget();
        let rental = self.idle.lock().pop().unwrap_or_else(|| self.mint());
        self.acquired_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(rental = %rental.id(), "rental acquired");
        Ok(rental)
    }

    async fn release(&self, rental: Rental<U>) -> Result<(), PoolError> {
        tracing::debug!(rental = %rental.id(), "rental released");
        self.idle.lock().push(rental);
        self.slots.add_permits(1);
        Ok(())
    }

    async fn destroy(&self, rental: Rental<U>) -> Result<(), PoolError> {
        tracing::debug!(rental = %rental.id(), "rental destroyed");
        drop(rental);
        self.destroyed_total.fetch_add(1, Ordering::Relaxed);
        self.slots.add_permits(1);
        Ok(())
    }

    async fn drain(&self) -> Result<(), PoolError> {
        self.slots.close();
        let drained = {
            let mut idle = self.idle.lock();
            let n = idle.len();
            idle.clear();
            n
        };
        tracing::info!(drained, "rental pool drained");
        Ok(())
    }
}
