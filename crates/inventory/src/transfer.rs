//! Stock transfer between two warehouses.
//!
//! Lifecycle: `draft -> approved -> shipped -> (partially_received ->)* received`,
//! with `cancelled` reachable from every non-terminal state. The aggregate
//! only decides; shipping debits, transit rows and receipt credits are
//! performed by the service layer from the events returned here.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{
    typed_id, Aggregate, AggregateRoot, BranchId, BranchOwned, DomainError, DomainResult, Money,
    Quantity, TenantId, UserId,
};
use branchledger_events::Event;

use crate::catalog::{ProductId, WarehouseId};

typed_id!(TransferId, "TransferId");
typed_id!(TransferItemId, "TransferItemId");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Approved,
    Shipped,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Received | TransferStatus::Cancelled)
    }

    /// Goods have left the source warehouse and transits may be open.
    pub fn goods_in_flight(self) -> bool {
        matches!(self, TransferStatus::Shipped | TransferStatus::PartiallyReceived)
    }
}

/// Line of a transfer. `received`/`damaged` are set once the line is received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferItem {
    pub id: TransferItemId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_cost: Money,
    pub qty_received: Option<Quantity>,
    pub qty_damaged: Option<Quantity>,
}

impl StockTransferItem {
    pub fn is_received(&self) -> bool {
        self.qty_received.is_some()
    }

    pub fn line_cost(&self) -> Money {
        self.unit_cost.times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_cost: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentMeta {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
}

/// Receipt for one shipped line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReceipt {
    pub item_id: TransferItemId,
    pub qty_received: Quantity,
    pub qty_damaged: Quantity,
}

/// Input for [`StockTransfer::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub items: Vec<NewTransferItem>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Approve {
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Ship {
        actor: UserId,
        meta: ShipmentMeta,
        occurred_at: DateTime<Utc>,
    },
    Receive {
        actor: UserId,
        receipts: Vec<ItemReceipt>,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        actor: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created {
        transfer_id: TransferId,
        tenant_id: TenantId,
        branch_id: BranchId,
        from_warehouse_id: WarehouseId,
        to_warehouse_id: WarehouseId,
        items: Vec<StockTransferItem>,
        notes: Option<String>,
        created_by: UserId,
        occurred_at: DateTime<Utc>,
    },
    Approved {
        transfer_id: TransferId,
        approved_by: UserId,
        occurred_at: DateTime<Utc>,
    },
    /// Every item leaves the source warehouse.
    Shipped {
        transfer_id: TransferId,
        items: Vec<StockTransferItem>,
        meta: ShipmentMeta,
        shipped_by: UserId,
        occurred_at: DateTime<Utc>,
    },
    ItemsReceived {
        transfer_id: TransferId,
        receipts: Vec<ItemReceipt>,
        /// All lines are now received.
        completed: bool,
        received_by: UserId,
        occurred_at: DateTime<Utc>,
    },
    /// `open_items` lists the shipped lines whose transits must be closed as
    /// cancelled and credited back to the source.
    Cancelled {
        transfer_id: TransferId,
        previous_status: TransferStatus,
        open_items: Vec<StockTransferItem>,
        reason: String,
        cancelled_by: UserId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Created { .. } => "inventory.transfer.created",
            TransferEvent::Approved { .. } => "inventory.transfer.approved",
            TransferEvent::Shipped { .. } => "inventory.transfer.shipped",
            TransferEvent::ItemsReceived { .. } => "inventory.transfer.items_received",
            TransferEvent::Cancelled { .. } => "inventory.transfer.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Created { occurred_at, .. }
            | TransferEvent::Approved { occurred_at, .. }
            | TransferEvent::Shipped { occurred_at, .. }
            | TransferEvent::ItemsReceived { occurred_at, .. }
            | TransferEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Aggregate root: StockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    id: TransferId,
    tenant_id: TenantId,
    branch_id: BranchId,
    from_warehouse_id: WarehouseId,
    to_warehouse_id: WarehouseId,
    status: TransferStatus,
    items: Vec<StockTransferItem>,
    notes: Option<String>,
    created_by: UserId,
    approved_by: Option<UserId>,
    shipped_by: Option<UserId>,
    shipment: Option<ShipmentMeta>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockTransfer {
    /// Validate a new draft transfer and return it with its creation event.
    ///
    /// Product activity is checked by the caller, which owns the catalog.
    pub fn create(cmd: CreateTransfer) -> DomainResult<(Self, TransferEvent)> {
        if cmd.from_warehouse_id == cmd.to_warehouse_id {
            return Err(DomainError::validation(
                "source and destination warehouse must differ",
            ));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("transfer needs at least one item"));
        }
        for item in &cmd.items {
            if item.quantity.is_zero() {
                return Err(DomainError::invalid_quantity("transfer item quantity must be positive"));
            }
            if item.unit_cost.is_negative() {
                return Err(DomainError::validation("unit cost cannot be negative"));
            }
        }

        let items: Vec<StockTransferItem> = cmd
            .items
            .into_iter()
            .map(|i| StockTransferItem {
                id: TransferItemId::new(),
                product_id: i.product_id,
                quantity: i.quantity,
                unit_cost: i.unit_cost,
                qty_received: None,
                qty_damaged: None,
            })
            .collect();

        let id = TransferId::new();
        let event = TransferEvent::Created {
            transfer_id: id,
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            from_warehouse_id: cmd.from_warehouse_id,
            to_warehouse_id: cmd.to_warehouse_id,
            items: items.clone(),
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        };

        let transfer = Self {
            id,
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            from_warehouse_id: cmd.from_warehouse_id,
            to_warehouse_id: cmd.to_warehouse_id,
            status: TransferStatus::Draft,
            items,
            notes: cmd.notes,
            created_by: cmd.created_by,
            approved_by: None,
            shipped_by: None,
            shipment: None,
            cancel_reason: None,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
            version: 1,
        };

        Ok((transfer, event))
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn from_warehouse_id(&self) -> WarehouseId {
        self.from_warehouse_id
    }

    pub fn to_warehouse_id(&self) -> WarehouseId {
        self.to_warehouse_id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn items(&self) -> &[StockTransferItem] {
        &self.items
    }

    pub fn item(&self, id: TransferItemId) -> Option<&StockTransferItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn shipment(&self) -> Option<&ShipmentMeta> {
        self.shipment.as_ref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `sum(quantity * unit_cost)` over all lines.
    pub fn total_cost(&self) -> Money {
        self.items.iter().map(StockTransferItem::line_cost).sum()
    }

    fn open_items(&self) -> Vec<StockTransferItem> {
        self.items
            .iter()
            .filter(|i| !i.is_received())
            .cloned()
            .collect()
    }

    fn illegal(&self, action: &str) -> DomainError {
        DomainError::transfer_state(format!("cannot {action} a transfer in status {:?}", self.status))
    }

    fn validate_receipts(&self, receipts: &[ItemReceipt]) -> DomainResult<bool> {
        if receipts.is_empty() {
            return Err(DomainError::validation("receipt must name at least one item"));
        }

        let mut seen = HashSet::new();
        for receipt in receipts {
            if !seen.insert(receipt.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} listed twice in one receipt",
                    receipt.item_id
                )));
            }
            let item = self.item(receipt.item_id).ok_or_else(|| {
                DomainError::validation(format!("item {} is not part of this transfer", receipt.item_id))
            })?;
            if item.is_received() {
                return Err(DomainError::transfer_state(format!(
                    "item {} was already received",
                    item.id
                )));
            }
            if receipt.qty_received + receipt.qty_damaged != item.quantity {
                return Err(DomainError::invalid_quantity(format!(
                    "received {} + damaged {} must equal shipped {} for item {}",
                    receipt.qty_received, receipt.qty_damaged, item.quantity, item.id
                )));
            }
        }

        let outstanding = self.items.iter().filter(|i| !i.is_received()).count();
        Ok(outstanding == receipts.len())
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl BranchOwned for StockTransfer {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

impl Aggregate for StockTransfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Created { .. } => {}
            TransferEvent::Approved {
                approved_by,
                occurred_at,
                ..
            } => {
                self.status = TransferStatus::Approved;
                self.approved_by = Some(*approved_by);
                self.updated_at = *occurred_at;
            }
            TransferEvent::Shipped {
                meta,
                shipped_by,
                occurred_at,
                ..
            } => {
                self.status = TransferStatus::Shipped;
                self.shipped_by = Some(*shipped_by);
                self.shipment = Some(meta.clone());
                self.updated_at = *occurred_at;
            }
            TransferEvent::ItemsReceived {
                receipts,
                completed,
                occurred_at,
                ..
            } => {
                for receipt in receipts {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == receipt.item_id) {
                        item.qty_received = Some(receipt.qty_received);
                        item.qty_damaged = Some(receipt.qty_damaged);
                    }
                }
                self.status = if *completed {
                    TransferStatus::Received
                } else {
                    TransferStatus::PartiallyReceived
                };
                self.updated_at = *occurred_at;
            }
            TransferEvent::Cancelled {
                reason, occurred_at, ..
            } => {
                self.status = TransferStatus::Cancelled;
                self.cancel_reason = Some(reason.clone());
                self.updated_at = *occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Approve { actor, occurred_at } => {
                if self.status != TransferStatus::Draft {
                    return Err(self.illegal("approve"));
                }
                Ok(vec![TransferEvent::Approved {
                    transfer_id: self.id,
                    approved_by: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            TransferCommand::Ship {
                actor,
                meta,
                occurred_at,
            } => {
                if self.status != TransferStatus::Approved {
                    return Err(self.illegal("ship"));
                }
                Ok(vec![TransferEvent::Shipped {
                    transfer_id: self.id,
                    items: self.items.clone(),
                    meta: meta.clone(),
                    shipped_by: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            TransferCommand::Receive {
                actor,
                receipts,
                occurred_at,
            } => {
                if !self.status.goods_in_flight() {
                    return Err(self.illegal("receive"));
                }
                let completed = self.validate_receipts(receipts)?;
                Ok(vec![TransferEvent::ItemsReceived {
                    transfer_id: self.id,
                    receipts: receipts.clone(),
                    completed,
                    received_by: *actor,
                    occurred_at: *occurred_at,
                }])
            }
            TransferCommand::Cancel {
                actor,
                reason,
                occurred_at,
            } => {
                if self.status.is_terminal() {
                    return Err(self.illegal("cancel"));
                }
                if reason.trim().is_empty() {
                    return Err(DomainError::validation("cancellation reason is required"));
                }
                let open_items = if self.status.goods_in_flight() {
                    self.open_items()
                } else {
                    Vec::new()
                };
                Ok(vec![TransferEvent::Cancelled {
                    transfer_id: self.id,
                    previous_status: self.status,
                    open_items,
                    reason: reason.clone(),
                    cancelled_by: *actor,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchledger_core::execute;
    use rust_decimal_macros::dec;

    fn qty(v: u32) -> Quantity {
        Quantity::from(v)
    }

    fn draft(lines: &[(u32, Money)]) -> StockTransfer {
        let (transfer, _) = StockTransfer::create(CreateTransfer {
            tenant_id: TenantId::new(),
            branch_id: BranchId::new(),
            from_warehouse_id: WarehouseId::new(),
            to_warehouse_id: WarehouseId::new(),
            items: lines
                .iter()
                .map(|(q, cost)| NewTransferItem {
                    product_id: ProductId::new(),
                    quantity: qty(*q),
                    unit_cost: *cost,
                })
                .collect(),
            notes: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        })
        .unwrap();
        transfer
    }

    fn shipped(lines: &[(u32, Money)]) -> StockTransfer {
        let mut t = draft(lines);
        let who = UserId::new();
        execute(&mut t, &TransferCommand::Approve { actor: who, occurred_at: Utc::now() }).unwrap();
        execute(
            &mut t,
            &TransferCommand::Ship {
                actor: who,
                meta: ShipmentMeta::default(),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        t
    }

    fn receive(t: &mut StockTransfer, receipts: Vec<ItemReceipt>) -> DomainResult<Vec<TransferEvent>> {
        execute(
            t,
            &TransferCommand::Receive {
                actor: UserId::new(),
                receipts,
                occurred_at: Utc::now(),
            },
        )
    }

    #[test]
    fn same_warehouse_transfer_is_rejected() {
        let w = WarehouseId::new();
        let err = StockTransfer::create(CreateTransfer {
            tenant_id: TenantId::new(),
            branch_id: BranchId::new(),
            from_warehouse_id: w,
            to_warehouse_id: w,
            items: vec![NewTransferItem {
                product_id: ProductId::new(),
                quantity: qty(1),
                unit_cost: Money::ZERO,
            }],
            notes: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        })
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn total_cost_is_exact() {
        let t = draft(&[(3, Money::new(dec!(0.10))), (7, Money::new(dec!(19.99)))]);
        assert_eq!(t.total_cost(), Money::new(dec!(140.23)));
    }

    #[test]
    fn cannot_ship_before_approval() {
        let mut t = draft(&[(5, Money::ZERO)]);
        let err = execute(
            &mut t,
            &TransferCommand::Ship {
                actor: UserId::new(),
                meta: ShipmentMeta::default(),
                occurred_at: Utc::now(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::TransferStateError(_)));
        assert_eq!(t.status(), TransferStatus::Draft);
    }

    #[test]
    fn partial_then_full_receipt() {
        let mut t = shipped(&[(10, Money::ZERO), (4, Money::ZERO)]);
        let first = t.items()[0].id;
        let second = t.items()[1].id;

        let events = receive(
            &mut t,
            vec![ItemReceipt {
                item_id: first,
                qty_received: qty(8),
                qty_damaged: qty(2),
            }],
        )
        .unwrap();
        assert!(matches!(events[0], TransferEvent::ItemsReceived { completed: false, .. }));
        assert_eq!(t.status(), TransferStatus::PartiallyReceived);

        receive(
            &mut t,
            vec![ItemReceipt {
                item_id: second,
                qty_received: qty(4),
                qty_damaged: Quantity::ZERO,
            }],
        )
        .unwrap();
        assert_eq!(t.status(), TransferStatus::Received);
        assert_eq!(t.item(first).and_then(|i| i.qty_damaged), Some(qty(2)));
    }

    #[test]
    fn receipt_must_cover_shipped_quantity() {
        let mut t = shipped(&[(10, Money::ZERO)]);
        let item = t.items()[0].id;
        let err = receive(
            &mut t,
            vec![ItemReceipt {
                item_id: item,
                qty_received: qty(7),
                qty_damaged: qty(2),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(t.status(), TransferStatus::Shipped);
    }

    #[test]
    fn a_line_cannot_be_received_twice() {
        let mut t = shipped(&[(1, Money::ZERO), (1, Money::ZERO)]);
        let item = t.items()[0].id;
        let receipt = ItemReceipt {
            item_id: item,
            qty_received: qty(1),
            qty_damaged: Quantity::ZERO,
        };
        receive(&mut t, vec![receipt.clone()]).unwrap();
        assert!(matches!(
            receive(&mut t, vec![receipt]),
            Err(DomainError::TransferStateError(_))
        ));
    }

    #[test]
    fn cancel_after_partial_receipt_lists_only_open_lines() {
        let mut t = shipped(&[(2, Money::ZERO), (3, Money::ZERO)]);
        let first = t.items()[0].id;
        receive(
            &mut t,
            vec![ItemReceipt {
                item_id: first,
                qty_received: qty(2),
                qty_damaged: Quantity::ZERO,
            }],
        )
        .unwrap();

        let events = execute(
            &mut t,
            &TransferCommand::Cancel {
                actor: UserId::new(),
                reason: "truck broke down".into(),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        match &events[0] {
            TransferEvent::Cancelled {
                open_items,
                previous_status,
                ..
            } => {
                assert_eq!(*previous_status, TransferStatus::PartiallyReceived);
                assert_eq!(open_items.len(), 1);
                assert_eq!(open_items[0].quantity, qty(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(t.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn draft_cancel_has_no_stock_effect_and_terminal_states_stick() {
        let mut t = draft(&[(2, Money::ZERO)]);
        let cancel = TransferCommand::Cancel {
            actor: UserId::new(),
            reason: "not needed".into(),
            occurred_at: Utc::now(),
        };
        let events = execute(&mut t, &cancel).unwrap();
        assert!(matches!(&events[0], TransferEvent::Cancelled { open_items, .. } if open_items.is_empty()));
        assert!(matches!(
            execute(&mut t, &cancel),
            Err(DomainError::TransferStateError(_))
        ));
        assert_eq!(t.version(), 2);
    }
}
