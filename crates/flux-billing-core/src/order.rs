//! Charge orders, charge products, and the order phase machine.
//!
//! ```text
//!            payment_failed
//!   Pending ───────────────► Failed
//!     │  ▲
//!     │  └── payment_canceled (re-open)
//!     │
//!     └────────────────────► Paid
//!            payment_succeeded
//! ```
//!
//! `Pending` is the only state any transition may start from. A transition
//! attempted from `Paid` or `Failed` is a phase conflict and changes nothing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::{OrderId, ProductId, UserId};

/// Lifecycle phase of a charge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPhase {
    /// Awaiting payment confirmation.
    Pending,
    /// Payment confirmed and credits granted.
    Paid,
    /// Payment failed.
    Failed,
}

impl OrderPhase {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Failed => "Failed",
        }
    }
}

impl FromStr for OrderPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown order phase: {other}")),
        }
    }
}

impl fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition requested by a processor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    /// Payment failed: `Pending → Failed`.
    Fail,
    /// Checkout canceled: `Pending → Pending`.
    Cancel,
    /// Payment succeeded: `Pending → Paid`.
    Pay,
}

impl OrderTransition {
    /// The phase the order ends up in.
    #[must_use]
    pub const fn target(self) -> OrderPhase {
        match self {
            Self::Fail => OrderPhase::Failed,
            Self::Cancel => OrderPhase::Pending,
            Self::Pay => OrderPhase::Paid,
        }
    }

    /// Snapshot key recording when the transition happened, if any.
    #[must_use]
    pub const fn timestamp_key(self) -> Option<&'static str> {
        match self {
            Self::Fail => Some("failedAt"),
            Self::Cancel => Some("canceledAt"),
            Self::Pay => None,
        }
    }

    /// Build the `result` snapshot stored on the order for this transition.
    ///
    /// Object snapshots get the transition timestamp merged in; anything else
    /// is wrapped as `{ "event": ..., "<key>": ... }`.
    #[must_use]
    pub fn stamp(self, snapshot: &serde_json::Value, at: DateTime<Utc>) -> serde_json::Value {
        let Some(key) = self.timestamp_key() else {
            return snapshot.clone();
        };
        let stamp = serde_json::Value::String(at.to_rfc3339());
        match snapshot {
            serde_json::Value::Object(map) => {
                let mut map = map.clone();
                map.insert(key.to_string(), stamp);
                serde_json::Value::Object(map)
            }
            other => serde_json::json!({ "event": other, key: stamp }),
        }
    }
}

/// A purchase attempt tracked through payment confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeOrder {
    /// Order id.
    pub id: OrderId,
    /// Purchasing user.
    pub user_id: UserId,
    /// Product being purchased.
    pub product_id: ProductId,
    /// Price charged, in the product currency's minor unit.
    pub amount: i64,
    /// Current phase.
    pub phase: OrderPhase,
    /// When payment was confirmed.
    pub payment_at: Option<DateTime<Utc>>,
    /// Snapshot of the last processor event applied.
    pub result: serde_json::Value,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order last changed.
    pub updated_at: DateTime<Utc>,
}

impl ChargeOrder {
    /// Check the phase guard for `transition`.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::OrderPhase` unless the order is `Pending`.
    pub fn guard(&self, transition: OrderTransition) -> Result<OrderPhase, BillingError> {
        if self.phase == OrderPhase::Pending {
            Ok(transition.target())
        } else {
            Err(BillingError::OrderPhase {
                order_id: self.id.to_string(),
                phase: Some(self.phase),
            })
        }
    }

    /// Apply `transition` in place, stamping the snapshot and timestamps.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::OrderPhase` unless the order is `Pending`.
    pub fn apply(
        &mut self,
        transition: OrderTransition,
        snapshot: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let target = self.guard(transition)?;
        self.phase = target;
        self.result = transition.stamp(snapshot, at);
        if transition == OrderTransition::Pay {
            self.payment_at = Some(at);
        }
        self.updated_at = at;
        Ok(())
    }
}

/// Fields for creating a charge order.
#[derive(Debug, Clone)]
pub struct NewChargeOrder {
    /// Purchasing user.
    pub user_id: UserId,
    /// Product being purchased.
    pub product_id: ProductId,
    /// Price charged.
    pub amount: i64,
}

/// A catalog entry that can be purchased for credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeProduct {
    /// Product id.
    pub id: ProductId,
    /// Credits granted on payment.
    pub credit: i64,
    /// Display title.
    pub title: String,
    /// Price in the currency's minor unit.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(phase: OrderPhase) -> ChargeOrder {
        let now = Utc::now();
        ChargeOrder {
            id: OrderId::new(9),
            user_id: "user_a".parse().unwrap(),
            product_id: ProductId::new(1),
            amount: 990,
            phase,
            payment_at: None,
            result: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_accepts_every_transition() {
        for (transition, target) in [
            (OrderTransition::Fail, OrderPhase::Failed),
            (OrderTransition::Cancel, OrderPhase::Pending),
            (OrderTransition::Pay, OrderPhase::Paid),
        ] {
            assert_eq!(order(OrderPhase::Pending).guard(transition).unwrap(), target);
        }
    }

    #[test]
    fn terminal_phases_reject_transitions() {
        for phase in [OrderPhase::Paid, OrderPhase::Failed] {
            for transition in [OrderTransition::Fail, OrderTransition::Cancel, OrderTransition::Pay] {
                let err = order(phase).guard(transition).unwrap_err();
                assert!(matches!(err, BillingError::OrderPhase { .. }));
            }
        }
    }

    #[test]
    fn cancel_reopens_and_stamps_snapshot() {
        let mut o = order(OrderPhase::Pending);
        let at = Utc::now();
        o.apply(OrderTransition::Cancel, &serde_json::json!({"id": "pi_1"}), at)
            .unwrap();
        assert_eq!(o.phase, OrderPhase::Pending);
        assert_eq!(o.result["id"], "pi_1");
        assert_eq!(o.result["canceledAt"], at.to_rfc3339());
        assert!(o.payment_at.is_none());
    }

    #[test]
    fn pay_sets_payment_timestamp() {
        let mut o = order(OrderPhase::Pending);
        let at = Utc::now();
        o.apply(OrderTransition::Pay, &serde_json::json!({"id": "pi_2"}), at)
            .unwrap();
        assert_eq!(o.phase, OrderPhase::Paid);
        assert_eq!(o.payment_at, Some(at));
        assert_eq!(o.result, serde_json::json!({"id": "pi_2"}));
    }

    #[test]
    fn failed_order_is_unchanged_by_rejected_transition() {
        let mut o = order(OrderPhase::Failed);
        let before = o.clone();
        assert!(o
            .apply(OrderTransition::Cancel, &serde_json::json!({}), Utc::now())
            .is_err());
        assert_eq!(o, before);
    }
}
