//! Stock transfer orchestration.
//!
//! The `StockTransfer` aggregate decides each transition; this service loads
//! it, runs the command, drives the ledger/transit side effects the returned
//! events call for, and stores the new state, all in one transaction. Any
//! failing item aborts the whole call.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use branchledger_auth::{capabilities, Actor, BranchScope, EntityKind, Permission};
use branchledger_core::{execute, AggregateRoot, BranchId, BranchOwned, DomainError};
use branchledger_inventory::{
    CreateTransfer, ItemReceipt, NewTransferItem, ShipmentMeta, StockTransfer, TransferCommand,
    TransferEvent, TransferId, WarehouseId,
};

use crate::audit::{audited, AuditRecord};
use crate::context::{permit, CoreContext, Outbox};
use crate::error::ServiceResult;
use crate::services::ledger::{active_warehouse, available_product, warehouse_in};
use crate::services::transit::{close_cancelled_in, close_received_in, load_transfer, open_in};
use crate::storage::Tx;

/// Input for [`TransferService::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub items: Vec<NewTransferItem>,
    pub notes: Option<String>,
}

/// Which side of the transfer an operation acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Destination,
}

#[derive(Debug, Clone)]
pub struct TransferService {
    ctx: CoreContext,
}

impl TransferService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Create a draft. Both warehouses must be active and every product
    /// active; the transfer belongs to the source warehouse's branch.
    #[instrument(skip(self, actor, request), fields(tenant_id = %actor.tenant_id))]
    pub fn create(&self, actor: &Actor, request: TransferRequest) -> ServiceResult<StockTransfer> {
        permit(actor, &capabilities::TRANSFER_CREATE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        let now = Utc::now();

        let mut outbox = Outbox::default();
        let transfer = self.ctx.db().transaction(|tx| -> ServiceResult<StockTransfer> {
            let branch_id = active_warehouse(tx, actor.tenant_id, request.from_warehouse_id)?.branch_id;
            active_warehouse(tx, actor.tenant_id, request.to_warehouse_id)?;
            scope.ensure_write(branch_id)?;
            for item in &request.items {
                available_product(tx, actor.tenant_id, item.product_id)?;
            }

            let (transfer, event) = StockTransfer::create(CreateTransfer {
                tenant_id: actor.tenant_id,
                branch_id,
                from_warehouse_id: request.from_warehouse_id,
                to_warehouse_id: request.to_warehouse_id,
                items: request.items.clone(),
                notes: request.notes.clone(),
                created_by: actor.user_id,
                occurred_at: now,
            })?;
            outbox.push(actor.tenant_id, branch_id, &event);
            tx.insert_transfer(transfer.clone())?;
            Ok(transfer)
        })?;
        self.ctx.publish(outbox);

        info!(transfer_id = %transfer.id_typed(), "transfer created");
        Ok(transfer)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub fn approve(&self, actor: &Actor, transfer_id: TransferId) -> ServiceResult<StockTransfer> {
        let command = TransferCommand::Approve {
            actor: actor.user_id,
            occurred_at: Utc::now(),
        };
        self.run(
            actor,
            transfer_id,
            &capabilities::TRANSFER_APPROVE,
            Side::Source,
            command,
            |_, _, _, _| Ok(()),
        )
    }

    /// Debit every line from the source and open its transit. All or nothing.
    #[instrument(skip(self, actor, meta), fields(tenant_id = %actor.tenant_id))]
    pub fn ship(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
        meta: ShipmentMeta,
    ) -> ServiceResult<StockTransfer> {
        let now = Utc::now();
        let policy = self.ctx.policy(actor.tenant_id);
        let command = TransferCommand::Ship {
            actor: actor.user_id,
            meta,
            occurred_at: now,
        };
        self.run(
            actor,
            transfer_id,
            &capabilities::TRANSFER_SHIP,
            Side::Source,
            command,
            |tx, before, event, outbox| {
                if let TransferEvent::Shipped { items, .. } = event {
                    for item in items {
                        open_in(tx, before, item, actor.user_id, policy, now, outbox)?;
                    }
                }
                Ok(())
            },
        )
    }

    /// Close the transits of the listed lines. Acts for the destination branch.
    #[instrument(skip(self, actor, receipts), fields(tenant_id = %actor.tenant_id, lines = receipts.len()))]
    pub fn receive(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
        receipts: Vec<ItemReceipt>,
    ) -> ServiceResult<StockTransfer> {
        let now = Utc::now();
        let command = TransferCommand::Receive {
            actor: actor.user_id,
            receipts,
            occurred_at: now,
        };
        self.run(
            actor,
            transfer_id,
            &capabilities::TRANSFER_RECEIVE,
            Side::Destination,
            command,
            |tx, _, event, outbox| {
                if let TransferEvent::ItemsReceived { receipts, .. } = event {
                    for receipt in receipts {
                        let transit_id = tx
                            .open_transit_for_item(receipt.item_id)?
                            .map(|t| t.id)
                            .ok_or_else(|| {
                                DomainError::invariant(format!(
                                    "no open transit for shipped item {}",
                                    receipt.item_id
                                ))
                            })?;
                        close_received_in(
                            tx,
                            transit_id,
                            receipt.qty_received,
                            receipt.qty_damaged,
                            actor.user_id,
                            now,
                            outbox,
                        )?;
                    }
                }
                Ok(())
            },
        )
    }

    /// Cancel. Lines still in flight are credited back to the source.
    #[instrument(skip(self, actor, reason), fields(tenant_id = %actor.tenant_id))]
    pub fn cancel(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
        reason: &str,
    ) -> ServiceResult<StockTransfer> {
        let now = Utc::now();
        let command = TransferCommand::Cancel {
            actor: actor.user_id,
            reason: reason.to_string(),
            occurred_at: now,
        };
        self.run(
            actor,
            transfer_id,
            &capabilities::TRANSFER_CANCEL,
            Side::Source,
            command,
            |tx, _, event, outbox| {
                if let TransferEvent::Cancelled { open_items, .. } = event {
                    for item in open_items {
                        if let Some(transit_id) = tx.open_transit_for_item(item.id)?.map(|t| t.id) {
                            close_cancelled_in(tx, transit_id, actor.user_id, now, outbox)?;
                        }
                    }
                }
                Ok(())
            },
        )
    }

    pub fn get_transfer(&self, actor: &Actor, transfer_id: TransferId) -> ServiceResult<StockTransfer> {
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<StockTransfer> {
            let transfer = load_transfer(t, actor, transfer_id)?;
            ensure_side_readable(t, &scope, &transfer)?;
            Ok(transfer)
        })
    }

    fn run<F>(
        &self,
        actor: &Actor,
        transfer_id: TransferId,
        permission: &Permission,
        side: Side,
        command: TransferCommand,
        effects: F,
    ) -> ServiceResult<StockTransfer>
    where
        F: Fn(&mut dyn Tx, &StockTransfer, &TransferEvent, &mut Outbox) -> ServiceResult<()>,
    {
        permit(actor, permission, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);

        let mut outbox = Outbox::default();
        let transfer = audited(
            self.ctx.audit(),
            || {
                self.ctx.db().transaction(|tx| -> ServiceResult<StockTransfer> {
                    let before = load_transfer(tx, actor, transfer_id)?;
                    scope.ensure_write(acting_branch(tx, &before, side)?)?;

                    let mut after = before.clone();
                    let events = execute(&mut after, &command)?;
                    for event in &events {
                        effects(tx, &before, event, &mut outbox)?;
                        outbox.push(actor.tenant_id, before.branch_id(), event);
                    }
                    tx.update_transfer(after.clone(), before.version())?;
                    Ok(after)
                })
            },
            |transfer| AuditRecord {
                tenant_id: actor.tenant_id,
                branch_id: transfer.branch_id(),
                actor: actor.user_id,
                action: permission.as_str().to_string(),
                entity_id: transfer.id_typed().to_string(),
                at: transfer.updated_at(),
            },
        )?;
        self.ctx.publish(outbox);

        info!(
            transfer_id = %transfer.id_typed(),
            status = ?transfer.status(),
            "transfer updated"
        );
        Ok(transfer)
    }
}

fn acting_branch(t: &mut dyn Tx, transfer: &StockTransfer, side: Side) -> ServiceResult<BranchId> {
    match side {
        Side::Source => Ok(transfer.branch_id()),
        Side::Destination => Ok(warehouse_in(t, transfer.tenant_id(), transfer.to_warehouse_id())?.branch_id),
    }
}

/// Either end of a transfer may read it.
fn ensure_side_readable(t: &mut dyn Tx, scope: &BranchScope, transfer: &StockTransfer) -> ServiceResult<()> {
    if scope.ensure_read(EntityKind::StockTransfer, transfer).is_ok() {
        return Ok(());
    }
    scope.ensure_write(acting_branch(t, transfer, Side::Destination)?)?;
    Ok(())
}
