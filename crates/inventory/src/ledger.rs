//! Stock ledger rules.
//!
//! Stock is never stored: it is the signed sum of posted movements for a
//! product at a warehouse. The functions here are the pure half of the ledger;
//! the infrastructure crate supplies the rows and the locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{BranchId, Decimal, DomainError, DomainResult, Quantity, TenantId, UserId};
use branchledger_events::Event;

use crate::catalog::{ProductId, WarehouseId};
use crate::movement::{MovementId, MovementReference, StockBucket, StockMovement};

/// Per-tenant stock policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// When `false`, outbound movements may not take sellable stock below zero.
    pub allow_negative_stock: bool,
}

/// Signed sum of posted movements for one product at one warehouse and bucket.
pub fn on_hand<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    bucket: StockBucket,
) -> Decimal {
    movements
        .into_iter()
        .filter(|m| {
            m.is_posted()
                && m.product_id == product_id
                && m.warehouse_id == warehouse_id
                && m.bucket == bucket
        })
        .map(StockMovement::signed_quantity)
        .sum()
}

/// Outbound guard: reject when `requested` exceeds `available` and the policy
/// forbids negative stock.
pub fn ensure_available(
    available: Decimal,
    requested: Quantity,
    policy: PolicyConfig,
) -> DomainResult<()> {
    if policy.allow_negative_stock || available >= requested.value() {
        Ok(())
    } else {
        Err(DomainError::InsufficientStock {
            available,
            requested: requested.value(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementVoided {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub movement_id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub reference: MovementReference,
    pub reason: String,
    pub voided_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    MovementRecorded(MovementRecorded),
    MovementVoided(MovementVoided),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::MovementRecorded(_) => "inventory.movement.recorded",
            InventoryEvent::MovementVoided(_) => "inventory.movement.voided",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::MovementRecorded(e) => e.occurred_at,
            InventoryEvent::MovementVoided(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementDirection, NewMovement, ReferenceType};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn movement(
        product: ProductId,
        warehouse: WarehouseId,
        direction: MovementDirection,
        qty: Decimal,
        reference: &str,
    ) -> StockMovement {
        NewMovement {
            tenant_id: TenantId::new(),
            product_id: product,
            warehouse_id: warehouse,
            branch_id: BranchId::new(),
            direction,
            bucket: StockBucket::Sellable,
            quantity: qty,
            reference: MovementReference::new(ReferenceType::Adjustment, reference),
            created_by: UserId::new(),
            note: None,
        }
        .into_posted(Utc::now())
        .unwrap()
    }

    #[test]
    fn voided_movements_do_not_count() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let mut rows = vec![
            movement(p, w, MovementDirection::In, dec!(10), "a"),
            movement(p, w, MovementDirection::Out, dec!(3), "b"),
        ];
        assert_eq!(on_hand(&rows, p, w, StockBucket::Sellable), dec!(7));

        rows[1].void(UserId::new(), "mistake", Utc::now());
        assert_eq!(on_hand(&rows, p, w, StockBucket::Sellable), dec!(10));
    }

    #[test]
    fn other_products_warehouses_and_buckets_are_ignored() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let mut damaged = movement(p, w, MovementDirection::In, dec!(2), "d");
        damaged.bucket = StockBucket::Damaged;
        let rows = vec![
            movement(p, w, MovementDirection::In, dec!(5), "a"),
            movement(ProductId::new(), w, MovementDirection::In, dec!(50), "b"),
            movement(p, WarehouseId::new(), MovementDirection::In, dec!(50), "c"),
            damaged,
        ];
        assert_eq!(on_hand(&rows, p, w, StockBucket::Sellable), dec!(5));
        assert_eq!(on_hand(&rows, p, w, StockBucket::Damaged), dec!(2));
    }

    #[test]
    fn negative_stock_policy() {
        let strict = PolicyConfig::default();
        let lenient = PolicyConfig {
            allow_negative_stock: true,
        };
        let want = Quantity::positive(dec!(3)).unwrap();

        assert!(ensure_available(dec!(3), want, strict).is_ok());
        assert_eq!(
            ensure_available(dec!(2), want, strict),
            Err(DomainError::InsufficientStock {
                available: dec!(2),
                requested: dec!(3),
            })
        );
        assert!(ensure_available(dec!(-5), want, lenient).is_ok());
    }

    proptest! {
        #[test]
        fn stock_equals_ins_minus_outs(
            ins in proptest::collection::vec(1u32..500, 0..20),
            outs in proptest::collection::vec(1u32..500, 0..20),
        ) {
            let p = ProductId::new();
            let w = WarehouseId::new();
            let mut rows = Vec::new();
            for (i, q) in ins.iter().enumerate() {
                rows.push(movement(p, w, MovementDirection::In, Decimal::from(*q), &format!("in-{i}")));
            }
            for (i, q) in outs.iter().enumerate() {
                rows.push(movement(p, w, MovementDirection::Out, Decimal::from(*q), &format!("out-{i}")));
            }

            let expected = Decimal::from(ins.iter().sum::<u32>()) - Decimal::from(outs.iter().sum::<u32>());
            prop_assert_eq!(on_hand(&rows, p, w, StockBucket::Sellable), expected);
        }
    }
}
