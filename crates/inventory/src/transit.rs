//! Goods that left the source warehouse and have not yet arrived.
//!
//! One transit row per shipped transfer item. It opens when the source ledger
//! is debited and closes exactly once, either received (with a damaged split)
//! or cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{
    typed_id, BranchId, BranchOwned, Decimal, DomainError, DomainResult, Entity, Percentage,
    Quantity, TenantId,
};

use crate::catalog::{ProductId, WarehouseId};
use crate::transfer::{TransferId, TransferItemId};

typed_id!(TransitId, "TransitId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitStatus {
    InTransit,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransit {
    pub id: TransitId,
    pub tenant_id: TenantId,
    /// Branch of the source warehouse.
    pub branch_id: BranchId,
    pub stock_transfer_id: TransferId,
    pub transfer_item_id: TransferItemId,
    pub product_id: ProductId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub quantity: Quantity,
    pub qty_received: Quantity,
    pub qty_damaged: Quantity,
    pub status: TransitStatus,
    pub shipped_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl InventoryTransit {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        tenant_id: TenantId,
        branch_id: BranchId,
        stock_transfer_id: TransferId,
        transfer_item_id: TransferItemId,
        product_id: ProductId,
        from_warehouse_id: WarehouseId,
        to_warehouse_id: WarehouseId,
        quantity: Quantity,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransitId::new(),
            tenant_id,
            branch_id,
            stock_transfer_id,
            transfer_item_id,
            product_id,
            from_warehouse_id,
            to_warehouse_id,
            quantity,
            qty_received: Quantity::ZERO,
            qty_damaged: Quantity::ZERO,
            status: TransitStatus::InTransit,
            shipped_at: at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TransitStatus::InTransit
    }

    /// Close as received. `received + damaged` must account for the whole
    /// shipped quantity.
    pub fn close_received(
        &mut self,
        received: Quantity,
        damaged: Quantity,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open()?;
        if received + damaged != self.quantity {
            return Err(DomainError::invalid_quantity(format!(
                "received {received} + damaged {damaged} must equal shipped {}",
                self.quantity
            )));
        }
        self.qty_received = received;
        self.qty_damaged = damaged;
        self.status = TransitStatus::Received;
        self.closed_at = Some(at);
        Ok(())
    }

    pub fn close_cancelled(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open()?;
        self.status = TransitStatus::Cancelled;
        self.closed_at = Some(at);
        Ok(())
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::transfer_state(format!(
                "transit {} already closed as {:?}",
                self.id, self.status
            )))
        }
    }
}

impl Entity for InventoryTransit {
    type Id = TransitId;

    fn id(&self) -> &TransitId {
        &self.id
    }
}

impl BranchOwned for InventoryTransit {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

/// Reconciliation view over a set of transits.
///
/// `debited` is what the source ledger shows leaving through transfer
/// shipments; it must equal everything still in flight plus everything that
/// already closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitSummary {
    pub debited: Decimal,
    pub in_transit: Decimal,
    /// Shipped quantity of transits closed as received (good + damaged).
    pub received: Decimal,
    pub cancelled: Decimal,
    /// Damaged share of `received`.
    pub damaged: Decimal,
}

impl TransitSummary {
    pub fn from_transits<'a>(
        debited: Decimal,
        transits: impl IntoIterator<Item = &'a InventoryTransit>,
    ) -> Self {
        transits
            .into_iter()
            .fold(Self { debited, ..Self::default() }, |mut acc, t| {
                let qty = t.quantity.value();
                match t.status {
                    TransitStatus::InTransit => acc.in_transit += qty,
                    TransitStatus::Received => {
                        acc.received += qty;
                        acc.damaged += t.qty_damaged.value();
                    }
                    TransitStatus::Cancelled => acc.cancelled += qty,
                }
                acc
            })
    }

    pub fn reconciles(&self) -> bool {
        self.debited == self.in_transit + self.received + self.cancelled
    }

    /// Damaged share of received goods, `None` before anything arrived.
    pub fn damage_rate(&self) -> Option<Percentage> {
        Percentage::from_ratio(self.damaged, self.received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn qty(v: Decimal) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn transit(q: Decimal) -> InventoryTransit {
        InventoryTransit::open(
            TenantId::new(),
            BranchId::new(),
            TransferId::new(),
            TransferItemId::new(),
            ProductId::new(),
            WarehouseId::new(),
            WarehouseId::new(),
            qty(q),
            Utc::now(),
        )
    }

    #[test]
    fn receive_must_account_for_full_quantity() {
        let mut t = transit(dec!(10));
        assert!(matches!(
            t.close_received(qty(dec!(8)), qty(dec!(1)), Utc::now()),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(t.is_open());

        t.close_received(qty(dec!(8)), qty(dec!(2)), Utc::now()).unwrap();
        assert_eq!(t.status, TransitStatus::Received);
        assert_eq!(t.qty_damaged, qty(dec!(2)));
    }

    #[test]
    fn a_transit_closes_exactly_once() {
        let mut t = transit(dec!(3));
        t.close_cancelled(Utc::now()).unwrap();
        assert!(matches!(
            t.close_received(qty(dec!(3)), Quantity::ZERO, Utc::now()),
            Err(DomainError::TransferStateError(_))
        ));
        assert!(t.close_cancelled(Utc::now()).is_err());
    }

    #[test]
    fn summary_reconciles_debits_against_transit_states() {
        let mut received = transit(dec!(10));
        received
            .close_received(qty(dec!(8)), qty(dec!(2)), Utc::now())
            .unwrap();
        let mut cancelled = transit(dec!(4));
        cancelled.close_cancelled(Utc::now()).unwrap();
        let open = transit(dec!(6));

        let summary = TransitSummary::from_transits(dec!(20), [&received, &cancelled, &open]);
        assert_eq!(summary.in_transit, dec!(6));
        assert_eq!(summary.received, dec!(10));
        assert_eq!(summary.cancelled, dec!(4));
        assert_eq!(summary.damaged, dec!(2));
        assert!(summary.reconciles());
        assert_eq!(summary.damage_rate().map(|p| p.value()), Some(dec!(20)));

        let off = TransitSummary::from_transits(dec!(21), [&received, &cancelled, &open]);
        assert!(!off.reconciles());
    }
}
