//! Stock ledger service.
//!
//! Writes are append-only `StockMovement` rows; stock is always recomputed
//! from posted rows inside the same transaction that validates and inserts,
//! so two concurrent sales of the last unit cannot both pass the check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use branchledger_auth::{capabilities, Actor, EntityKind, Permission};
use branchledger_core::{BranchId, Decimal, DomainError, TenantId, UserId};
use branchledger_inventory::{
    ensure_available, InventoryEvent, MovementDirection, MovementId, MovementRecorded,
    MovementReference, MovementVoided, NewMovement, PolicyConfig, Product, ProductId, ReferenceType,
    StockBucket, StockMovement, Warehouse, WarehouseId,
};

use crate::audit::{audited, AuditRecord};
use crate::context::{permit, CoreContext, Outbox};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::storage::{constraints, Tx};

/// Input for [`StockLedger::record_movement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub branch_id: BranchId,
    pub direction: MovementDirection,
    pub quantity: Decimal,
    pub reference: MovementReference,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReceipt {
    pub movement_id: MovementId,
    /// The reference was already posted; nothing new was written.
    pub replayed: bool,
}

/// Sellable and damaged stock of one product at one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub warehouse_id: WarehouseId,
    pub branch_id: BranchId,
    pub sellable: Decimal,
    pub damaged: Decimal,
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    ctx: CoreContext,
}

impl StockLedger {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Post one movement, or return the one already posted for the same
    /// `(reference, product, direction)`.
    #[instrument(
        skip(self, actor, request),
        fields(
            tenant_id = %actor.tenant_id,
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            reference = %request.reference,
        )
    )]
    pub fn record_movement(
        &self,
        actor: &Actor,
        request: MovementRequest,
    ) -> ServiceResult<MovementReceipt> {
        permit(actor, &posting_capability(request.reference.kind)?, actor.tenant_id)?;
        self.ctx.scope(actor).ensure_write(request.branch_id)?;

        let policy = self.ctx.policy(actor.tenant_id);
        let now = Utc::now();
        let new = NewMovement {
            tenant_id: actor.tenant_id,
            product_id: request.product_id,
            warehouse_id: request.warehouse_id,
            branch_id: request.branch_id,
            direction: request.direction,
            bucket: StockBucket::Sellable,
            quantity: request.quantity,
            reference: request.reference,
            created_by: actor.user_id,
            note: request.note,
        };

        let attempt = || {
            let mut outbox = Outbox::default();
            let receipt = self.ctx.db().transaction(|tx| -> ServiceResult<MovementReceipt> {
                let warehouse = active_warehouse(tx, actor.tenant_id, new.warehouse_id)?;
                if warehouse.branch_id != new.branch_id {
                    return Err(DomainError::validation(
                        "warehouse does not belong to the movement's branch",
                    )
                    .into());
                }
                available_product(tx, actor.tenant_id, new.product_id)?;
                post_movement(tx, new.clone(), policy, now, &mut outbox)
            })?;
            Ok((receipt, outbox))
        };

        let (receipt, outbox) = audited(
            self.ctx.audit(),
            || match attempt() {
                // a concurrent writer posted the same key first; the retry replays it
                Err(err) if is_posted_reference_race(&err) => {
                    debug!("posted reference raced; retrying as replay");
                    attempt()
                }
                other => other,
            },
            |(receipt, _)| AuditRecord {
                tenant_id: actor.tenant_id,
                branch_id: request.branch_id,
                actor: actor.user_id,
                action: "stock.movement.record".into(),
                entity_id: receipt.movement_id.to_string(),
                at: now,
            },
        )?;
        self.ctx.publish(outbox);

        if !receipt.replayed {
            info!(movement_id = %receipt.movement_id, "movement posted");
        }
        Ok(receipt)
    }

    /// Flip a posted movement to voided. Returns `false` when it already was.
    #[instrument(skip(self, actor, reason), fields(tenant_id = %actor.tenant_id, %movement_id))]
    pub fn void_movement(
        &self,
        actor: &Actor,
        movement_id: MovementId,
        reason: &str,
    ) -> ServiceResult<bool> {
        permit(actor, &capabilities::INVENTORY_VOID, actor.tenant_id)?;
        if reason.trim().is_empty() {
            return Err(DomainError::validation("void reason is required").into());
        }
        let scope = self.ctx.scope(actor);
        let policy = self.ctx.policy(actor.tenant_id);
        let now = Utc::now();

        let mut outbox = Outbox::default();
        let voided = self.ctx.db().transaction(|tx| -> ServiceResult<bool> {
            let movement = tx
                .movement(movement_id)?
                .filter(|m| m.tenant_id == actor.tenant_id)
                .ok_or(StorageError::NotFound { entity: "stock movement" })?;
            scope.ensure_write(movement.branch_id)?;
            void_posted(tx, movement, actor.user_id, reason, policy, now, &mut outbox)
        })?;
        self.ctx.publish(outbox);

        if voided {
            info!("movement voided");
        } else {
            debug!("movement already voided");
        }
        Ok(voided)
    }

    /// Sellable on-hand quantity.
    pub fn get_current_stock(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<Decimal> {
        self.bucket_stock(actor, product_id, warehouse_id, StockBucket::Sellable)
    }

    /// Damaged goods held at the warehouse; never sellable.
    pub fn get_damaged_stock(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<Decimal> {
        self.bucket_stock(actor, product_id, warehouse_id, StockBucket::Damaged)
    }

    /// Stock of a product in every warehouse the actor can see.
    pub fn stock_by_warehouse(
        &self,
        actor: &Actor,
        product_id: ProductId,
    ) -> ServiceResult<Vec<WarehouseStock>> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Vec<WarehouseStock>> {
            let visible = scope.filter(EntityKind::Warehouse, t.warehouses(actor.tenant_id)?);
            let mut rows = Vec::with_capacity(visible.len());
            for w in visible {
                rows.push(WarehouseStock {
                    warehouse_id: w.id,
                    branch_id: w.branch_id,
                    sellable: t.stock_level(product_id, w.id, StockBucket::Sellable)?,
                    damaged: t.stock_level(product_id, w.id, StockBucket::Damaged)?,
                });
            }
            rows.sort_by_key(|r| r.warehouse_id);
            Ok(rows)
        })
    }

    /// Every movement (posted and voided) for a product at a warehouse, oldest first.
    pub fn movement_history(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ServiceResult<Vec<StockMovement>> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Vec<StockMovement>> {
            let rows = t.movement_history(actor.tenant_id, product_id, warehouse_id)?;
            Ok(scope.filter(EntityKind::StockMovement, rows))
        })
    }

    fn bucket_stock(
        &self,
        actor: &Actor,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        bucket: StockBucket,
    ) -> ServiceResult<Decimal> {
        permit(actor, &capabilities::INVENTORY_READ, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Decimal> {
            let warehouse = warehouse_in(t, actor.tenant_id, warehouse_id)?;
            scope.ensure_read(EntityKind::Warehouse, &warehouse)?;
            Ok(t.stock_level(product_id, warehouse_id, bucket)?)
        })
    }
}

/// Capability needed to post a movement of `kind` by hand.
///
/// Transfer and storefront movements are only written by their own services.
pub(crate) fn posting_capability(kind: ReferenceType) -> ServiceResult<Permission> {
    match kind {
        ReferenceType::Sale | ReferenceType::SaleReturn => Ok(capabilities::SALES_POST),
        ReferenceType::Purchase | ReferenceType::PurchaseReturn => Ok(capabilities::PURCHASES_POST),
        ReferenceType::Opening | ReferenceType::Adjustment => Ok(capabilities::INVENTORY_ADJUST),
        ReferenceType::TransferShip
        | ReferenceType::TransferReceive
        | ReferenceType::TransferDamaged
        | ReferenceType::TransferCancel
        | ReferenceType::ExternalOrder
        | ReferenceType::ExternalInventorySync => Err(DomainError::validation(format!(
            "{kind} movements cannot be recorded directly"
        ))
        .into()),
    }
}

fn is_posted_reference_race(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::Storage(StorageError::UniqueViolation { constraint })
            if *constraint == constraints::MOVEMENT_POSTED_REFERENCE
    )
}

/// Validate and insert a movement inside an open transaction.
///
/// Quantity is validated before anything else. The product's stock lock is
/// taken before the replay lookup, so a concurrent posting of the same key or
/// of the last unit waits for this transaction. A posted movement with the
/// same key is returned as a replay. Outbound sellable movements are checked
/// against stock computed in this transaction.
pub(crate) fn post_movement(
    tx: &mut dyn Tx,
    new: NewMovement,
    policy: PolicyConfig,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<MovementReceipt> {
    let movement = new.into_posted(at)?;
    tx.lock_stock(movement.product_id)?;

    if let Some(existing) = tx.posted_movement(&movement.key())? {
        debug!(movement_id = %existing.id, reference = %existing.reference, "replay of posted movement");
        return Ok(MovementReceipt {
            movement_id: existing.id,
            replayed: true,
        });
    }

    if movement.direction == MovementDirection::Out && movement.bucket == StockBucket::Sellable {
        let available = tx.stock_level(movement.product_id, movement.warehouse_id, StockBucket::Sellable)?;
        ensure_available(available, movement.quantity, policy)?;
    }

    outbox.push(
        movement.tenant_id,
        movement.branch_id,
        &InventoryEvent::MovementRecorded(MovementRecorded {
            tenant_id: movement.tenant_id,
            branch_id: movement.branch_id,
            movement: movement.clone(),
            occurred_at: at,
        }),
    );
    let movement_id = movement.id;
    tx.insert_movement(movement)?;

    Ok(MovementReceipt {
        movement_id,
        replayed: false,
    })
}

/// Void a movement inside an open transaction.
///
/// Voiding an inbound sellable movement takes stock away again, so it goes
/// through the same policy check as an outbound movement.
pub(crate) fn void_posted(
    tx: &mut dyn Tx,
    mut movement: StockMovement,
    by: UserId,
    reason: &str,
    policy: PolicyConfig,
    at: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<bool> {
    if !movement.is_posted() {
        return Ok(false);
    }
    tx.lock_stock(movement.product_id)?;
    if movement.direction == MovementDirection::In && movement.bucket == StockBucket::Sellable {
        let available = tx.stock_level(movement.product_id, movement.warehouse_id, StockBucket::Sellable)?;
        ensure_available(available, movement.quantity, policy)?;
    }

    movement.void(by, reason, at);
    outbox.push(
        movement.tenant_id,
        movement.branch_id,
        &InventoryEvent::MovementVoided(MovementVoided {
            tenant_id: movement.tenant_id,
            branch_id: movement.branch_id,
            movement_id: movement.id,
            product_id: movement.product_id,
            warehouse_id: movement.warehouse_id,
            reference: movement.reference.clone(),
            reason: reason.to_string(),
            voided_by: by,
            occurred_at: at,
        }),
    );
    tx.update_movement(movement)?;
    Ok(true)
}

pub(crate) fn warehouse_in(
    t: &mut dyn Tx,
    tenant_id: TenantId,
    warehouse_id: WarehouseId,
) -> ServiceResult<Warehouse> {
    t.warehouse(warehouse_id)?
        .filter(|w| w.tenant_id == tenant_id)
        .ok_or_else(|| StorageError::NotFound { entity: "warehouse" }.into())
}

pub(crate) fn active_warehouse(
    t: &mut dyn Tx,
    tenant_id: TenantId,
    warehouse_id: WarehouseId,
) -> ServiceResult<Warehouse> {
    let warehouse = warehouse_in(t, tenant_id, warehouse_id)?;
    if !warehouse.is_active {
        return Err(DomainError::validation(format!("warehouse {warehouse_id} is inactive")).into());
    }
    Ok(warehouse)
}

pub(crate) fn available_product(
    t: &mut dyn Tx,
    tenant_id: TenantId,
    product_id: ProductId,
) -> ServiceResult<Product> {
    let product = t
        .product(product_id)?
        .filter(|p| p.tenant_id == tenant_id)
        .ok_or(StorageError::NotFound { entity: "product" })?;
    if !product.is_available() {
        return Err(DomainError::validation(format!("product {product_id} is not active")).into());
    }
    Ok(product)
}
