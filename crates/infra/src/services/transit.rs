//! Inventory transit tracking.
//!
//! Opening and closing transits only happens inside a transfer transaction
//! (`TransferService`), so the ledger movement and the transit row are
//! written together or not at all. Movements made here reference the
//! transfer item id, which keeps ship/receive/cancel of one line idempotent
//! per direction.

use chrono::{DateTime, Utc};

use branchledger_auth::{capabilities, Actor, EntityKind};
use branchledger_core::{Decimal, DomainError, Quantity, UserId};
use branchledger_inventory::{
    InventoryTransit, MovementDirection, MovementKey, MovementReference, NewMovement, PolicyConfig,
    ProductId, ReferenceType, StockBucket, StockTransfer, StockTransferItem, TransferId, TransitId,
    TransitSummary, WarehouseId,
};

use crate::context::{permit, CoreContext, Outbox};
use crate::error::{ServiceResult, StorageError};
use crate::services::ledger::{post_movement, warehouse_in};
use crate::storage::Tx;

#[derive(Debug, Clone)]
pub struct TransitTracker {
    ctx: CoreContext,
}

impl TransitTracker {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Quantity currently in flight towards `warehouse_id`.
    pub fn in_transit_quantity(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<Decimal> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Decimal> {
            let warehouse = warehouse_in(t, actor.tenant_id, warehouse_id)?;
            scope.ensure_read(EntityKind::Warehouse, &warehouse)?;
            Ok(t.in_transit_quantity(product_id, warehouse_id)?)
        })
    }

    /// Reconciliation of what the source ledger lost against transit rows.
    pub fn transit_summary(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
    ) -> ServiceResult<TransitSummary> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<TransitSummary> {
            let transfer = load_transfer(t, actor, transfer_id)?;
            scope.ensure_read(EntityKind::StockTransfer, &transfer)?;
            summarize(t, &transfer)
        })
    }

    pub fn transits_for_transfer(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
    ) -> ServiceResult<Vec<InventoryTransit>> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Vec<InventoryTransit>> {
            let transfer = load_transfer(t, actor, transfer_id)?;
            scope.ensure_read(EntityKind::StockTransfer, &transfer)?;
            Ok(scope.filter(EntityKind::InventoryTransit, t.transits_for_transfer(transfer_id)?))
        })
    }
}

pub(crate) fn load_transfer(
    t: &mut dyn Tx,
    actor: &Actor,
    transfer_id: TransferId,
) -> ServiceResult<StockTransfer> {
    t.transfer(transfer_id)?
        .filter(|tr| tr.tenant_id() == actor.tenant_id)
        .ok_or_else(|| StorageError::NotFound { entity: "stock transfer" }.into())
}

fn summarize(t: &mut dyn Tx, transfer: &StockTransfer) -> ServiceResult<TransitSummary> {
    let mut debited = Decimal::ZERO;
    for item in transfer.items() {
        let shipped = t.posted_movement(&MovementKey {
            tenant_id: transfer.tenant_id(),
            reference: item_reference(ReferenceType::TransferShip, item),
            product_id: item.product_id,
            direction: MovementDirection::Out,
        })?;
        if let Some(m) = shipped {
            debited += m.quantity.value();
        }
    }
    let transits = t.transits_for_transfer(transfer.id_typed())?;
    Ok(TransitSummary::from_transits(debited, &transits))
}

fn item_reference(kind: ReferenceType, item: &StockTransferItem) -> MovementReference {
    MovementReference::new(kind, item.id.to_string())
}

/// Debit the source warehouse and open the item's transit.
pub(crate) fn open_in(
    tx: &mut dyn Tx,
    transfer: &StockTransfer,
    item: &StockTransferItem,
    by: UserId,
    policy: PolicyConfig,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<InventoryTransit> {
    let tenant_id = transfer.tenant_id();
    let source_branch = warehouse_in(tx, tenant_id, transfer.from_warehouse_id())?.branch_id;

    post_movement(
        tx,
        NewMovement {
            tenant_id,
            product_id: item.product_id,
            warehouse_id: transfer.from_warehouse_id(),
            branch_id: source_branch,
            direction: MovementDirection::Out,
            bucket: StockBucket::Sellable,
            quantity: item.quantity.value(),
            reference: item_reference(ReferenceType::TransferShip, item),
            created_by: by,
            note: Some(format!("transfer {}", transfer.id_typed())),
        },
        policy,
        at,
        outbox,
    )?;

    let transit = InventoryTransit::open(
        tenant_id,
        source_branch,
        transfer.id_typed(),
        item.id,
        item.product_id,
        transfer.from_warehouse_id(),
        transfer.to_warehouse_id(),
        item.quantity,
        at,
    );
    tx.insert_transit(transit.clone())?;
    Ok(transit)
}

/// Close a transit as received: good units go to the destination's sellable
/// bucket, damaged units to its damaged bucket.
pub(crate) fn close_received_in(
    tx: &mut dyn Tx,
    transit_id: TransitId,
    received: Quantity,
    damaged: Quantity,
    by: UserId,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<InventoryTransit> {
    let mut transit = open_transit(tx, transit_id)?;
    transit.close_received(received, damaged, at)?;
    let dest_branch = warehouse_in(tx, transit.tenant_id, transit.to_warehouse_id)?.branch_id;

    for (qty, bucket, kind) in [
        (received, StockBucket::Sellable, ReferenceType::TransferReceive),
        (damaged, StockBucket::Damaged, ReferenceType::TransferDamaged),
    ] {
        if qty.is_zero() {
            continue;
        }
        post_movement(
            tx,
            NewMovement {
                tenant_id: transit.tenant_id,
                product_id: transit.product_id,
                warehouse_id: transit.to_warehouse_id,
                branch_id: dest_branch,
                direction: MovementDirection::In,
                bucket,
                quantity: qty.value(),
                reference: MovementReference::new(kind, transit.transfer_item_id.to_string()),
                created_by: by,
                note: Some(format!("transfer {}", transit.stock_transfer_id)),
            },
            PolicyConfig::default(),
            at,
            outbox,
        )?;
    }

    tx.update_transit(transit.clone())?;
    Ok(transit)
}

/// Close a transit as cancelled and credit the source warehouse back.
pub(crate) fn close_cancelled_in(
    tx: &mut dyn Tx,
    transit_id: TransitId,
    by: UserId,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<InventoryTransit> {
    let mut transit = open_transit(tx, transit_id)?;
    transit.close_cancelled(at)?;

    post_movement(
        tx,
        NewMovement {
            tenant_id: transit.tenant_id,
            product_id: transit.product_id,
            warehouse_id: transit.from_warehouse_id,
            branch_id: transit.branch_id,
            direction: MovementDirection::In,
            bucket: StockBucket::Sellable,
            quantity: transit.quantity.value(),
            reference: MovementReference::new(
                ReferenceType::TransferCancel,
                transit.transfer_item_id.to_string(),
            ),
            created_by: by,
            note: Some(format!("transfer {} cancelled", transit.stock_transfer_id)),
        },
        PolicyConfig::default(),
        at,
        outbox,
    )?;

    tx.update_transit(transit.clone())?;
    Ok(transit)
}

fn open_transit(tx: &mut dyn Tx, transit_id: TransitId) -> ServiceResult<InventoryTransit> {
    let transit = tx
        .transit(transit_id)?
        .ok_or(StorageError::NotFound { entity: "inventory transit" })?;
    if !transit.is_open() {
        return Err(DomainError::transfer_state(format!(
            "transit {transit_id} is already {:?}",
            transit.status
        ))
        .into());
    }
    Ok(transit)
}
