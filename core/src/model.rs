//! Stock identification and record types.
//!
//! A stock position is identified by a [`StockKey`]: the pair of a [`SkuId`] and a
//! [`WarehouseId`]. Each key owns exactly one [`StockRecord`] and an append-only
//! sequence of [`StockMovement`]s.

use crate::error::StockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new ", $label, " without validation (trusted input).")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[doc = concat!("Get the ", $label, " as a string slice.")]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError(concat!($label, " cannot be empty").to_string()));
                }
                if trimmed.contains(':') {
                    return Err(ParseIdError(format!(
                        concat!($label, " cannot contain ':' ({})"),
                        trimmed
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stock keeping unit identifier, e.g. `"SKU-10042"`.
    ///
    /// Use `FromStr` for external input (rejects empty values and the `:` key
    /// separator); use `new()` or `From` for application-controlled values.
    SkuId,
    "SKU id"
);

string_id!(
    /// Warehouse identifier, e.g. `"WH-BERLIN-1"`.
    WarehouseId,
    "warehouse id"
);

/// Composite identity of one stock position.
///
/// # Examples
///
/// ```
/// use stock_control_core::model::StockKey;
///
/// let key = StockKey::new("SKU-1", "WH-1");
/// assert_eq!(key.to_string(), "SKU-1@WH-1");
/// assert_eq!(key.lock_key(), "stock:lock:SKU-1:WH-1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    /// SKU half of the key.
    pub sku_id: SkuId,
    /// Warehouse half of the key.
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    /// Create a key from anything convertible into the two identifiers.
    #[must_use]
    pub fn new(sku_id: impl Into<SkuId>, warehouse_id: impl Into<WarehouseId>) -> Self {
        Self {
            sku_id: sku_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }

    /// Key used by distributed lock coordinators.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("stock:lock:{}:{}", self.sku_id, self.warehouse_id)
    }

    /// Key used by snapshot caches.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("stock:snapshot:{}:{}", self.sku_id, self.warehouse_id)
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sku_id, self.warehouse_id)
    }
}

/// The three quantities of a stock position.
///
/// Committed levels always satisfy `available == on_hand - reserved` with all
/// three values non-negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    /// Physical units present in the warehouse.
    pub on_hand: i64,
    /// Units soft-allocated to open orders.
    pub reserved: i64,
    /// Units sellable right now.
    pub available: i64,
}

impl StockLevels {
    /// Levels with nothing reserved.
    #[must_use]
    pub const fn with_on_hand(on_hand: i64) -> Self {
        Self {
            on_hand,
            reserved: 0,
            available: on_hand,
        }
    }

    /// Whether these levels satisfy the stock invariant.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.on_hand >= 0
            && self.reserved >= 0
            && self.available >= 0
            && self.on_hand - self.reserved == self.available
    }
}

/// One row of the stock table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Store-assigned identity, referenced by the movement ledger.
    pub id: i64,
    /// SKU of this position.
    pub sku_id: SkuId,
    /// Warehouse of this position.
    pub warehouse_id: WarehouseId,
    /// Physical units present.
    pub quantity_on_hand: i64,
    /// Units reserved for open orders.
    pub quantity_reserved: i64,
    /// Units sellable right now.
    pub quantity_available: i64,
    /// When the record was created (first intake).
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// The key this record belongs to.
    #[must_use]
    pub fn key(&self) -> StockKey {
        StockKey {
            sku_id: self.sku_id.clone(),
            warehouse_id: self.warehouse_id.clone(),
        }
    }

    /// Current quantities.
    #[must_use]
    pub const fn levels(&self) -> StockLevels {
        StockLevels {
            on_hand: self.quantity_on_hand,
            reserved: self.quantity_reserved,
            available: self.quantity_available,
        }
    }

    /// Overwrite the quantities and bump `updated_at`.
    pub fn set_levels(&mut self, levels: StockLevels, at: DateTime<Utc>) {
        self.quantity_on_hand = levels.on_hand;
        self.quantity_reserved = levels.reserved;
        self.quantity_available = levels.available;
        self.updated_at = at;
    }

    /// Read-model view of this record.
    #[must_use]
    pub fn snapshot(&self) -> StockSnapshot {
        StockSnapshot {
            key: self.key(),
            levels: self.levels(),
            updated_at: self.updated_at,
        }
    }

    /// Verify the stock invariant on a row read from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::InvariantViolation`] if the quantities are negative
    /// or `available != on_hand - reserved`.
    pub fn check_invariant(&self) -> Result<(), StockError> {
        let levels = self.levels();
        if levels.is_consistent() {
            Ok(())
        } else {
            Err(StockError::InvariantViolation {
                key: self.key(),
                detail: format!(
                    "on_hand={} reserved={} available={}",
                    levels.on_hand, levels.reserved, levels.available
                ),
            })
        }
    }
}

/// Snapshot of a stock position as returned to callers and mirrored in caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// Position identity.
    pub key: StockKey,
    /// Quantities at `updated_at`.
    pub levels: StockLevels,
    /// Commit time of the last mutation included in this snapshot.
    pub updated_at: DateTime<Utc>,
}

impl StockSnapshot {
    /// Physical units present.
    #[must_use]
    pub const fn on_hand(&self) -> i64 {
        self.levels.on_hand
    }

    /// Units reserved for open orders.
    #[must_use]
    pub const fn reserved(&self) -> i64 {
        self.levels.reserved
    }

    /// Units sellable right now.
    #[must_use]
    pub const fn available(&self) -> i64 {
        self.levels.available
    }
}

/// Kind of quantity change recorded in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    /// Goods received into the warehouse.
    Inbound,
    /// Reserved goods shipped or paid (reservation committed).
    Outbound,
    /// Units soft-allocated to an order.
    Reserve,
    /// Reservation released back to available.
    Unreserve,
    /// Manual correction by an operator.
    Adjustment,
    /// Previously deducted goods returned to stock.
    Rollback,
}

impl MovementType {
    /// Convert to the database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Reserve => "reserve",
            Self::Unreserve => "unreserve",
            Self::Adjustment => "adjustment",
            Self::Rollback => "rollback",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::TransactionFailed`] for unknown values, since an
    /// unknown type can only come from a corrupted or newer schema.
    pub fn parse(s: &str) -> Result<Self, StockError> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            "reserve" => Ok(Self::Reserve),
            "unreserve" => Ok(Self::Unreserve),
            "adjustment" => Ok(Self::Adjustment),
            "rollback" => Ok(Self::Rollback),
            _ => Err(StockError::TransactionFailed(format!(
                "Invalid movement type: {s}"
            ))),
        }
    }

    /// Whether movements of this type change on-hand quantity.
    ///
    /// Only these movements take part in ledger reconciliation.
    #[must_use]
    pub const fn affects_on_hand(&self) -> bool {
        matches!(
            self,
            Self::Inbound | Self::Outbound | Self::Adjustment | Self::Rollback
        )
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger entry that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMovement {
    /// Kind of change.
    pub movement_type: MovementType,
    /// Signed quantity change (of reserved quantity for reserve/unreserve).
    pub quantity_delta: i64,
    /// External correlation id, e.g. an order number.
    pub reference: String,
    /// Free-text cause.
    pub reason: String,
    /// Operator who made a manual adjustment.
    pub operator: Option<String>,
    /// On-hand quantity after the change.
    pub on_hand_after: i64,
    /// Reserved quantity after the change.
    pub reserved_after: i64,
}

/// An immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Monotonically increasing ledger id.
    pub id: i64,
    /// Record this movement belongs to.
    pub stock_record_id: i64,
    /// Kind of change.
    pub movement_type: MovementType,
    /// Signed quantity change.
    pub quantity_delta: i64,
    /// External correlation id.
    pub reference: String,
    /// Free-text cause.
    pub reason: String,
    /// Operator attribution for manual adjustments.
    pub operator: Option<String>,
    /// On-hand quantity after the change.
    pub on_hand_after: i64,
    /// Reserved quantity after the change.
    pub reserved_after: i64,
    /// When the movement was committed.
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Contribution of this movement to on-hand quantity.
    #[must_use]
    pub const fn on_hand_delta(&self) -> i64 {
        if self.movement_type.affects_on_hand() {
            self.quantity_delta
        } else {
            0
        }
    }
}

/// Warehouse reference entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    /// Warehouse identity.
    pub id: WarehouseId,
    /// Display name.
    pub name: String,
    /// Free-form location description.
    pub location: String,
}

impl Warehouse {
    /// Create a warehouse entity.
    #[must_use]
    pub fn new(
        id: impl Into<WarehouseId>,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
        }
    }
}

/// Outcome of replaying the ledger of one stock position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Position that was reconciled.
    pub key: StockKey,
    /// On-hand quantity reconstructed from the ledger.
    pub ledger_on_hand: i64,
    /// On-hand quantity stored on the record.
    pub recorded_on_hand: i64,
    /// Number of ledger entries replayed.
    pub movement_count: usize,
}

impl ReconciliationReport {
    /// Build a report by replaying `movements` in creation order.
    #[must_use]
    pub fn replay(record: &StockRecord, movements: &[StockMovement]) -> Self {
        let ledger_on_hand = movements.iter().map(StockMovement::on_hand_delta).sum();
        Self {
            key: record.key(),
            ledger_on_hand,
            recorded_on_hand: record.quantity_on_hand,
            movement_count: movements.len(),
        }
    }

    /// Whether the ledger reconstructs the recorded on-hand quantity.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.ledger_on_hand == self.recorded_on_hand
    }
}
