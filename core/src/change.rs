//! Stock mutations as pure values.
//!
//! A [`StockChange`] describes one requested mutation. Stores call
//! [`StockChange::apply`] against the levels they just read under a row lock;
//! the function validates the precondition, computes the next levels with
//! checked arithmetic and builds the ledger entry. Nothing is written unless
//! `apply` succeeds, so no operation ever partially applies.
//!
//! ```text
//! Operation   Precondition            on_hand   reserved   available   Ledger
//! ─────────   ─────────────────────   ───────   ────────   ─────────   ──────────
//! Reserve     available >= q                    +q         -q          Reserve +q
//! Release     reserved  >= q                    -q         +q          Unreserve -q
//! Deduct      reserved  >= q          -q        -q                     Outbound -q
//! Restore                             +q                   +q          Rollback +q
//! Receive                             +q                   +q          Inbound +q
//! Adjust      available >= -d (d<0)   +d                   +d          Adjustment d
//! ```

use crate::error::StockError;
use crate::model::{MovementType, NewMovement, StockKey, StockLevels};
use serde::{Deserialize, Serialize};

/// A requested mutation of one stock position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockChange {
    /// Soft-allocate units to an order.
    Reserve {
        /// Units to reserve
        quantity: i64,
        /// Order reference
        reference: String,
    },
    /// Return reserved units to the available pool.
    Release {
        /// Units to release
        quantity: i64,
        /// Order reference
        reference: String,
    },
    /// Commit a reservation: the units leave the warehouse.
    Deduct {
        /// Units to deduct
        quantity: i64,
        /// Order reference
        reference: String,
    },
    /// Put previously deducted units back (cancellation after payment).
    Restore {
        /// Units to restore
        quantity: i64,
        /// Order reference
        reference: String,
    },
    /// Receive goods. Creates the stock record on first intake.
    Receive {
        /// Units received
        quantity: i64,
        /// Receipt reference (purchase order, ASN, ...)
        reference: String,
    },
    /// Manual correction of on-hand quantity.
    Adjust {
        /// Signed change, never zero
        delta: i64,
        /// Why the correction was made
        reason: String,
        /// Who made it
        operator: String,
    },
}

impl StockChange {
    /// Operation name used in logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Reserve { .. } => "reserve",
            Self::Release { .. } => "release",
            Self::Deduct { .. } => "deduct",
            Self::Restore { .. } => "restore",
            Self::Receive { .. } => "receive",
            Self::Adjust { .. } => "adjust",
        }
    }

    /// Ledger entry type produced by this change.
    #[must_use]
    pub const fn movement_type(&self) -> MovementType {
        match self {
            Self::Reserve { .. } => MovementType::Reserve,
            Self::Release { .. } => MovementType::Unreserve,
            Self::Deduct { .. } => MovementType::Outbound,
            Self::Restore { .. } => MovementType::Rollback,
            Self::Receive { .. } => MovementType::Inbound,
            Self::Adjust { .. } => MovementType::Adjustment,
        }
    }

    /// Whether the store should create a missing record for this change.
    #[must_use]
    pub const fn creates_record(&self) -> bool {
        matches!(self, Self::Receive { .. })
    }

    /// External reference recorded on the ledger entry.
    #[must_use]
    pub fn reference(&self) -> String {
        match self {
            Self::Reserve { reference, .. }
            | Self::Release { reference, .. }
            | Self::Deduct { reference, .. }
            | Self::Restore { reference, .. }
            | Self::Receive { reference, .. } => reference.clone(),
            Self::Adjust { operator, .. } => format!("adjustment:{operator}"),
        }
    }

    /// Validate the quantity without looking at any stored state.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvalidQuantity`] for non-positive quantities,
    /// a zero adjustment, or `i64::MIN` (which has no absolute value).
    pub fn validate(&self) -> Result<(), StockError> {
        match self {
            Self::Reserve { quantity, .. }
            | Self::Release { quantity, .. }
            | Self::Deduct { quantity, .. }
            | Self::Restore { quantity, .. }
            | Self::Receive { quantity, .. } => {
                if *quantity <= 0 {
                    return Err(StockError::InvalidQuantity {
                        quantity: *quantity,
                    });
                }
            }
            Self::Adjust { delta, .. } => {
                if *delta == 0 || *delta == i64::MIN {
                    return Err(StockError::InvalidQuantity { quantity: *delta });
                }
            }
        }
        Ok(())
    }

    /// Apply this change to freshly read levels.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: see [`validate`](Self::validate), or the
    ///   result would overflow
    /// - [`StockError::InsufficientStock`]: reserve/adjust exceeds available, or
    ///   deduct exceeds reserved; both quantities are reported
    /// - [`StockError::ReservedUnderflow`]: release exceeds reserved
    pub fn apply(&self, key: &StockKey, current: StockLevels) -> Result<AppliedChange, StockError> {
        self.validate()?;

        let (levels, quantity_delta) = match self {
            Self::Reserve { quantity, .. } => {
                let q = *quantity;
                if current.available < q {
                    return Err(insufficient(key, q, current));
                }
                let levels = StockLevels {
                    on_hand: current.on_hand,
                    reserved: checked(current.reserved.checked_add(q), q)?,
                    available: current.available - q,
                };
                (levels, q)
            }
            Self::Release { quantity, .. } => {
                let q = *quantity;
                if current.reserved < q {
                    return Err(StockError::ReservedUnderflow {
                        key: key.clone(),
                        requested: q,
                        reserved: current.reserved,
                    });
                }
                let levels = StockLevels {
                    on_hand: current.on_hand,
                    reserved: current.reserved - q,
                    available: checked(current.available.checked_add(q), q)?,
                };
                (levels, -q)
            }
            Self::Deduct { quantity, .. } => {
                let q = *quantity;
                if current.reserved < q {
                    return Err(insufficient(key, q, current));
                }
                let levels = StockLevels {
                    on_hand: checked(current.on_hand.checked_sub(q), q)?,
                    reserved: current.reserved - q,
                    available: current.available,
                };
                (levels, -q)
            }
            Self::Restore { quantity, .. } | Self::Receive { quantity, .. } => {
                let q = *quantity;
                let levels = StockLevels {
                    on_hand: checked(current.on_hand.checked_add(q), q)?,
                    reserved: current.reserved,
                    available: checked(current.available.checked_add(q), q)?,
                };
                (levels, q)
            }
            Self::Adjust { delta, .. } => {
                let d = *delta;
                if d < 0 && current.available < -d {
                    return Err(insufficient(key, -d, current));
                }
                let levels = StockLevels {
                    on_hand: checked(current.on_hand.checked_add(d), d)?,
                    reserved: current.reserved,
                    available: checked(current.available.checked_add(d), d)?,
                };
                (levels, d)
            }
        };

        if !levels.is_consistent() {
            return Err(StockError::InvariantViolation {
                key: key.clone(),
                detail: format!("{} would produce {levels:?}", self.operation()),
            });
        }

        Ok(AppliedChange {
            levels,
            movement: NewMovement {
                movement_type: self.movement_type(),
                quantity_delta,
                reference: self.reference(),
                reason: self.reason(),
                operator: match self {
                    Self::Adjust { operator, .. } => Some(operator.clone()),
                    _ => None,
                },
                on_hand_after: levels.on_hand,
                reserved_after: levels.reserved,
            },
        })
    }

    fn reason(&self) -> String {
        match self {
            Self::Reserve { .. } => "stock reserved".to_string(),
            Self::Release { .. } => "reservation released".to_string(),
            Self::Deduct { .. } => "reservation committed".to_string(),
            Self::Restore { .. } => "stock restored".to_string(),
            Self::Receive { .. } => "stock received".to_string(),
            Self::Adjust { reason, .. } => reason.clone(),
        }
    }
}

fn checked(value: Option<i64>, quantity: i64) -> Result<i64, StockError> {
    value.ok_or(StockError::InvalidQuantity { quantity })
}

fn insufficient(key: &StockKey, requested: i64, current: StockLevels) -> StockError {
    StockError::InsufficientStock {
        key: key.clone(),
        requested,
        available: current.available,
        reserved: current.reserved,
    }
}

/// Result of a successful [`StockChange::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedChange {
    /// Levels to write back.
    pub levels: StockLevels,
    /// Ledger entry to append in the same transaction.
    pub movement: NewMovement,
}
