//! Inventory Ledger - per-unit stock and reservation accounting
//!
//! Each unit owns exactly one ledger and mutates it only from its own
//! sequential message loop. The ledger tracks:
//! - `stock`: items physically on board
//! - `reserved`: quantities promised to open contract-net bids
//! - derived availability: `stock - reserved`
//!
//! # Guarantees
//!
//! - `stock[k] >= 0` and `reserved[k] >= 0` for every kind, always
//! - `reserved[k] <= stock[k]`: reservations are only granted from free stock
//! - Stock is decremented only by a commit, and a commit is all-or-nothing
//! - Releasing more than is reserved clamps at zero and is logged as an anomaly

use crate::types::{ItemKind, Requirement};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur in ledger operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough free stock for the requested quantity
    #[error("Insufficient stock for {kind}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item kind that fell short
        kind: ItemKind,
        /// Quantity requested
        requested: u32,
        /// Quantity available at the time of the request
        available: u32,
    },

    /// A reserved commit found less reserved than it consumes
    #[error("Reservation missing for {kind}: committing {requested}, reserved {reserved}")]
    ReservationMissing {
        /// Item kind that fell short
        kind: ItemKind,
        /// Quantity being committed
        requested: u32,
        /// Quantity currently reserved
        reserved: u32,
    },
}

/// Observability counters for the ledger
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetrics {
    /// Successful reservations
    pub reservations_total: u64,
    /// Release calls
    pub releases_total: u64,
    /// Releases that tried to free more than was reserved
    pub release_anomalies_total: u64,
    /// Successful commits (direct or reserved)
    pub commits_total: u64,
}

/// Per-unit inventory ledger
#[derive(Debug, Clone)]
pub struct InventoryLedger {
    stock: Requirement,
    reserved: Requirement,
    metrics: LedgerMetrics,
}

impl InventoryLedger {
    /// Create a ledger holding `stock` with nothing reserved
    pub fn new(stock: Requirement) -> Self {
        Self {
            stock,
            reserved: Requirement::new(),
            metrics: LedgerMetrics::default(),
        }
    }

    /// On-hand stock
    pub fn stock(&self) -> &Requirement {
        &self.stock
    }

    /// Quantities held by open reservations
    pub fn reserved(&self) -> &Requirement {
        &self.reserved
    }

    /// Ledger counters
    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    /// Free quantity of `kind` (`stock - reserved`)
    pub fn available(&self, kind: &str) -> u32 {
        self.stock.get(kind).saturating_sub(self.reserved.get(kind))
    }

    /// Free stock for every kind on board
    pub fn free_stock(&self) -> Requirement {
        self.stock.saturating_sub(&self.reserved)
    }

    /// True iff `stock[k] - reserved[k] >= required[k]` for every kind
    pub fn can_fulfill(&self, required: &Requirement) -> bool {
        required.iter().all(|(kind, qty)| self.available(kind) >= qty)
    }

    /// Reserve `required` out of free stock
    pub fn reserve(&mut self, required: &Requirement) -> Result<(), LedgerError> {
        self.check_free(required)?;
        for (kind, qty) in required.iter() {
            self.reserved.add(kind.clone(), qty);
        }
        self.metrics.reservations_total += 1;
        debug!(required = %required, reserved = %self.reserved, "Reserved stock");
        Ok(())
    }

    /// Release a previous reservation
    ///
    /// Safe against double release: quantities clamp at zero and the
    /// over-release is logged instead of underflowing.
    pub fn release(&mut self, required: &Requirement) {
        self.metrics.releases_total += 1;
        for (kind, qty) in required.iter() {
            let held = self.reserved.get(kind);
            if held < qty {
                self.metrics.release_anomalies_total += 1;
                warn!(
                    kind = %kind,
                    releasing = qty,
                    reserved = held,
                    "Release exceeds reservation, clamping at zero"
                );
            }
            self.reserved.set(kind.clone(), held.saturating_sub(qty));
        }
        debug!(released = %required, reserved = %self.reserved, "Released stock");
    }

    /// Decrement stock for an unreserved delivery
    ///
    /// Only free stock may be consumed; stock promised to an open bid is
    /// untouchable here.
    pub fn commit(&mut self, required: &Requirement) -> Result<(), LedgerError> {
        self.check_free(required)?;
        for (kind, qty) in required.iter() {
            let left = self.stock.get(kind) - qty;
            self.stock.set(kind.clone(), left);
        }
        self.metrics.commits_total += 1;
        debug!(committed = %required, stock = %self.stock, "Committed stock");
        Ok(())
    }

    /// Fold a held reservation into an actual stock decrement
    pub fn commit_reserved(&mut self, required: &Requirement) -> Result<(), LedgerError> {
        for (kind, qty) in required.iter() {
            let reserved = self.reserved.get(kind);
            if reserved < qty {
                return Err(LedgerError::ReservationMissing {
                    kind: kind.clone(),
                    requested: qty,
                    reserved,
                });
            }
        }
        for (kind, qty) in required.iter() {
            let reserved = self.reserved.get(kind) - qty;
            let stock = self.stock.get(kind) - qty;
            self.reserved.set(kind.clone(), reserved);
            self.stock.set(kind.clone(), stock);
        }
        self.metrics.commits_total += 1;
        debug!(committed = %required, stock = %self.stock, "Committed reserved stock");
        Ok(())
    }

    fn check_free(&self, required: &Requirement) -> Result<(), LedgerError> {
        for (kind, qty) in required.iter() {
            let available = self.available(kind);
            if available < qty {
                return Err(LedgerError::InsufficientStock {
                    kind: kind.clone(),
                    requested: qty,
                    available,
                });
            }
        }
        Ok(())
    }
}
