//! Rental pool boundary: the external collaborator the scheduler leases
//! execution resources from.
//!
//! The scheduler never provisions, prices, or negotiates resources; it only
//! acquires rentals, runs work against their execution units, and hands them
//! back (released) or evicts them (destroyed).

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::PoolError;

pub use memory::InMemoryRentalPool;

/// A leased execution resource, granting exclusive temporary use of one
/// execution unit plus the identity metadata the scheduler reports in
/// telemetry and error context.
#[derive(Debug, Clone)]
pub struct Rental<U> {
    id: String,
    agreement_id: String,
    provider_name: String,
    cost: f64,
    unit: Arc<U>,
}

impl<U> Rental<U> {
    /// Create a rental handle. Called by pool implementations only.
    pub fn new(
        id: impl Into<String>,
        agreement_id: impl Into<String>,
        provider_name: impl Into<String>,
        cost: f64,
        unit: Arc<U>,
    ) -> Self {
        Self {
            id: id.into(),
            agreement_id: agreement_id.into(),
            provider_name: provider_name.into(),
            cost,
            unit,
        }
    }

    /// Rental identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Agreement identifier (read-only identity metadata).
    pub fn agreement_id(&self) -> &str {
        &self.agreement_id
    }

    /// Provider name (read-only identity metadata).
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Cost accrued by one use of this rental, in the pool's currency.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// The execution unit the caller's work function runs against.
    pub fn unit(&self) -> Arc<U> {
        Arc::clone(&self.unit)
    }

    /// Identity snapshot for task telemetry.
    pub fn details(&self) -> RentalDetails {
        RentalDetails {
            agreement_id: self.agreement_id.clone(),
            provider_name: self.provider_name.clone(),
        }
    }
}

/// Identity metadata of a rental, recorded on the task that used it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RentalDetails {
    /// Agreement identifier.
    pub agreement_id: String,
    /// Provider name.
    pub provider_name: String,
}

/// Pool of leasable execution resources.
///
/// `acquire` blocks while the pool is exhausted and must be cancellation
/// safe: dropping the returned future before it resolves must not leak a
/// lease. The scheduler relies on this to abort acquisitions for tasks that
/// time out while still waiting.
#[async_trait]
pub trait RentalPool<U>: Send + Sync + 'static
where
    U: Send + Sync + 'static,
{
    /// Resolves once the pool is usable.
    async fn ready(&self) -> Result<(), PoolError>;

    /// Lease one rental, waiting for capacity if necessary.
    async fn acquire(&self) -> Result<Rental<U>, PoolError>;

    /// Return a healthy rental to the pool for reuse.
    async fn release(&self, rental: Rental<U>) -> Result<(), PoolError>;

    /// Evict a rental presumed compromised; the pool may reprovision.
    async fn destroy(&self, rental: Rental<U>) -> Result<(), PoolError>;

    /// Stop handing out rentals and release everything pooled.
    async fn drain(&self) -> Result<(), PoolError>;
}
