//! Webhook-driven external store synchronization.
//!
//! Every delivery is authenticated against the store's secret before its body
//! is even parsed, then applied as the store's branch-pinned system actor.
//! All handlers are idempotent: platforms retry anything that is not a 200.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use branchledger_auth::{capabilities, Actor, EntityKind};
use branchledger_core::{BranchId, Decimal, DomainError};
use branchledger_inventory::{
    MovementDirection, MovementReference, NewMovement, PolicyConfig, Product, ProductId,
    ReferenceType, StockBucket, WarehouseId,
};
use branchledger_sync::{
    body_digest, parse_webhook, verify_signature, ExternalIdKind, ExternalOrder, ExternalOrderId,
    ExternalOrderPayload, ExternalOrderStatus, ExternalProduct, InventoryLevel,
    ProductStoreMapping, Store, StoreId, StoreKind, StoreSyncEvent, StoreToken, WebhookEvent,
};

use crate::context::{permit, CoreContext, Outbox};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::services::ledger::{active_warehouse, post_movement, void_posted};
use crate::storage::{StorageResult, Tx};

/// Input for [`StoreSyncService::register_store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub branch_id: BranchId,
    pub kind: StoreKind,
    pub name: String,
    pub warehouse_id: WarehouseId,
    pub webhook_secret: String,
}

/// One inbound delivery, as received.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Value of the platform's signature header.
    pub signature: Option<String>,
    /// Value of the platform's topic header, if it sends one.
    pub topic: Option<String>,
    pub body: Vec<u8>,
    /// Set by the caller once it stops waiting for the outcome.
    pub cancellation: Cancellation,
}

/// Shared flag a caller flips to abandon a delivery.
///
/// Handlers check it as the last step before committing, so a delivery is
/// either cancelled with nothing written or completes and reports its result.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `SyncUnavailable` once cancelled, which rolls the open transaction back.
    pub fn check(&self) -> ServiceResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::SyncUnavailable("delivery abandoned before commit".into()).into());
        }
        Ok(())
    }
}

/// What a delivery did. Replays and no-ops are successes too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Topic this core does not handle.
    Ignored,
    ProductSynced {
        product_id: ProductId,
        created: bool,
    },
    ProductUnmapped {
        product_id: Option<ProductId>,
    },
    OrderIngested {
        lines_posted: usize,
        lines_skipped: usize,
        replayed: bool,
    },
    OrderUpdated {
        status: ExternalOrderStatus,
        stock_released: bool,
    },
    InventoryReconciled {
        product_id: Option<ProductId>,
        delta: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct StoreSyncService {
    ctx: CoreContext,
}

impl StoreSyncService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Connect a store to a branch. Its fulfilment warehouse must be an
    /// active warehouse of that same branch.
    #[instrument(skip(self, actor, request), fields(tenant_id = %actor.tenant_id, kind = %request.kind))]
    pub fn register_store(&self, actor: &Actor, request: StoreRequest) -> ServiceResult<Store> {
        permit(actor, &capabilities::STORE_MANAGE, actor.tenant_id)?;
        self.ctx.scope(actor).ensure_write(request.branch_id)?;
        if request.webhook_secret.trim().is_empty() {
            return Err(DomainError::validation("webhook secret cannot be empty").into());
        }

        let store = self.ctx.db().transaction(|tx| -> ServiceResult<Store> {
            let warehouse = active_warehouse(tx, actor.tenant_id, request.warehouse_id)?;
            if warehouse.branch_id != request.branch_id {
                return Err(DomainError::validation(
                    "fulfilment warehouse must belong to the store's branch",
                )
                .into());
            }
            let store = Store::new(
                actor.tenant_id,
                request.branch_id,
                request.kind,
                request.name.clone(),
                request.warehouse_id,
                request.webhook_secret.clone(),
            );
            tx.insert_store(store.clone())?;
            Ok(store)
        })?;

        info!(store_id = %store.id, "store registered");
        Ok(store)
    }

    /// Stop accepting webhooks for a store.
    pub fn deactivate_store(&self, actor: &Actor, store_id: StoreId) -> ServiceResult<Store> {
        permit(actor, &capabilities::STORE_MANAGE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().transaction(|tx| -> ServiceResult<Store> {
            let mut store = store_in(tx, actor, store_id)?;
            scope.ensure_write(store.branch_id)?;
            store.is_active = false;
            tx.update_store(store.clone())?;
            Ok(store)
        })
    }

    /// Store a hashed API token for the store. The raw token is not kept.
    pub fn issue_token(
        &self,
        actor: &Actor,
        store_id: StoreId,
        raw_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<StoreToken> {
        permit(actor, &capabilities::STORE_MANAGE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().transaction(|tx| -> ServiceResult<StoreToken> {
            let store = store_in(tx, actor, store_id)?;
            scope.ensure_write(store.branch_id)?;
            let token = StoreToken::issue(&store, raw_token, Utc::now(), expires_at)?;
            tx.insert_store_token(token.clone())?;
            Ok(token)
        })
    }

    /// Whether `raw_token` matches a live token of the store.
    pub fn verify_token(&self, store_id: StoreId, raw_token: &str) -> bool {
        let now = Utc::now();
        let verified = self.ctx.db().read(|t| -> StorageResult<bool> {
            let active = t.store(store_id)?.is_some_and(|s| s.is_active);
            Ok(active && t.store_tokens(store_id)?.iter().any(|tok| tok.verify(raw_token, now)))
        });
        verified.unwrap_or_else(|err| {
            warn!(%store_id, error = %err, "store token lookup failed");
            false
        })
    }

    /// Link a local product to an external listing, or re-point an existing link.
    #[instrument(skip(self, actor, external_id, external_sku), fields(tenant_id = %actor.tenant_id))]
    pub fn map_product(
        &self,
        actor: &Actor,
        store_id: StoreId,
        product_id: ProductId,
        external_id: &str,
        external_sku: Option<String>,
    ) -> ServiceResult<ProductStoreMapping> {
        permit(actor, &capabilities::STORE_MANAGE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(DomainError::validation("external id cannot be empty").into());
        }
        let now = Utc::now();

        self.ctx
            .db()
            .transaction(|tx| -> ServiceResult<ProductStoreMapping> {
                let store = store_in(tx, actor, store_id)?;
                scope.ensure_write(store.branch_id)?;
                let product = tx
                    .product(product_id)?
                    .filter(|p| p.tenant_id == actor.tenant_id && p.branch_id == store.branch_id)
                    .ok_or(StorageError::NotFound { entity: "product" })?;
                if !product.is_available() {
                    return Err(DomainError::validation("cannot map an inactive product").into());
                }

                match tx.mapping_for_product(product_id, store_id)? {
                    Some(mut mapping) => {
                        mapping.external_id = external_id.to_string();
                        mapping.external_sku = external_sku.clone();
                        mapping.updated_at = now;
                        tx.update_mapping(mapping.clone())?;
                        Ok(mapping)
                    }
                    None => {
                        let mapping = ProductStoreMapping::new(
                            actor.tenant_id,
                            store.branch_id,
                            product_id,
                            store_id,
                            external_id,
                            external_sku.clone(),
                            now,
                        );
                        tx.insert_mapping(mapping.clone())?;
                        Ok(mapping)
                    }
                }
            })
            .map_err(|err| match err {
                ServiceError::Storage(StorageError::UniqueViolation { constraint }) => {
                    ServiceError::from(DomainError::MappingConflict(format!(
                        "external id {external_id} ({constraint})"
                    )))
                }
                other => other,
            })
    }

    /// Remove a product's link to a store. `false` if there was none.
    pub fn unmap_product(
        &self,
        actor: &Actor,
        store_id: StoreId,
        product_id: ProductId,
    ) -> ServiceResult<bool> {
        permit(actor, &capabilities::STORE_MANAGE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        self.ctx.db().transaction(|tx| -> ServiceResult<bool> {
            let store = store_in(tx, actor, store_id)?;
            scope.ensure_write(store.branch_id)?;
            match tx.mapping_for_product(product_id, store_id)?.map(|m| m.id) {
                Some(id) => {
                    tx.delete_mapping(id)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn mappings(&self, actor: &Actor, store_id: StoreId) -> ServiceResult<Vec<ProductStoreMapping>> {
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Vec<ProductStoreMapping>> {
            let store = store_in(t, actor, store_id)?;
            scope.ensure_read(EntityKind::Store, &store)?;
            Ok(scope.filter(EntityKind::ProductStoreMapping, t.mappings_for_store(store_id)?))
        })
    }

    /// Authenticate, parse and apply one webhook delivery.
    ///
    /// Unknown, inactive or platform-mismatched stores fail with
    /// `UnknownStoreOrInactive`; a bad signature with `InvalidSignature`.
    /// Neither touches any data. Once `request.cancellation` is set, the
    /// delivery fails with `SyncUnavailable` and commits nothing.
    #[instrument(skip(self, request), fields(%store_id, platform = %kind, bytes = request.body.len()))]
    pub fn handle_webhook(
        &self,
        kind: StoreKind,
        store_id: StoreId,
        request: &WebhookRequest,
    ) -> ServiceResult<WebhookOutcome> {
        let store = self
            .ctx
            .db()
            .read(|t| t.store(store_id))?
            .ok_or(DomainError::UnknownStoreOrInactive)?;
        store.accepts(kind)?;

        if let Err(err) = verify_signature(
            kind,
            &store.webhook_secret,
            &request.body,
            request.signature.as_deref(),
        ) {
            warn!("webhook signature rejected");
            return Err(err.into());
        }

        let Some(event) = parse_webhook(kind, request.topic.as_deref(), &request.body)? else {
            debug!(topic = ?request.topic, "ignoring unhandled webhook topic");
            return Ok(WebhookOutcome::Ignored);
        };

        let delivery = Delivery {
            actor: Actor::system(store.tenant_id, store.branch_id),
            store,
            cancellation: request.cancellation.clone(),
        };
        let topic = event.topic();
        let outcome = match event {
            WebhookEvent::ProductUpsert(product) => {
                let known = self.ctx.db().read(|t| -> ServiceResult<Option<ProductId>> {
                    Ok(t.mapping_by_external(delivery.store.id, &product.external_id)?
                        .map(|m| m.product_id))
                })?;
                let (product_id, created) = self.sync_product(&delivery, &product, known)?;
                WebhookOutcome::ProductSynced {
                    product_id,
                    created,
                }
            }
            WebhookEvent::ProductDelete { external_id } => self.delete_product(&delivery, &external_id)?,
            WebhookEvent::OrderCreate(order) => self.ingest_order(&delivery, order)?,
            WebhookEvent::OrderUpdate(order) => self.update_order(&delivery, order)?,
            WebhookEvent::InventoryUpdate(level) => {
                self.reconcile_inventory(&delivery, level, body_digest(&request.body))?
            }
        };

        info!(?topic, ?outcome, "webhook applied");
        Ok(outcome)
    }

    /// Upsert a product from the store. `known` is the product the caller
    /// found mapped to the external id before opening the write transaction.
    ///
    /// Creating races with concurrent deliveries for the same listing: the
    /// unique mapping constraints decide the winner, and the loser retries
    /// once as an update of the winner's product.
    pub(crate) fn sync_product(
        &self,
        delivery: &Delivery,
        product: &ExternalProduct,
        known: Option<ProductId>,
    ) -> ServiceResult<(ProductId, bool)> {
        let now = Utc::now();
        if let Some(product_id) = known {
            return self.update_synced(delivery, product, product_id, now);
        }

        match self.create_synced(delivery, product, now) {
            Err(err) if err.is_unique_violation() => {
                warn!(external_id = %product.external_id, error = %err, "product mapping race lost, retrying as update");
                let mapped = self
                    .ctx
                    .db()
                    .read(|t| t.mapping_by_external(delivery.store.id, &product.external_id))?
                    .map(|m| m.product_id)
                    .ok_or_else(|| {
                        DomainError::MappingConflict(format!(
                            "external product {} conflicts with an existing mapping",
                            product.external_id
                        ))
                    })?;
                self.update_synced(delivery, product, mapped, now)
            }
            other => other,
        }
    }

    fn create_synced(
        &self,
        delivery: &Delivery,
        external: &ExternalProduct,
        now: DateTime<Utc>,
    ) -> ServiceResult<(ProductId, bool)> {
        let store = &delivery.store;
        let mut outbox = Outbox::default();
        let product_id = self.ctx.db().transaction(|tx| -> ServiceResult<ProductId> {
            let product_id = match tx.live_product_by_sku(store.branch_id, &external.sku)? {
                Some(mut existing) => {
                    apply_external(&mut existing, external, now);
                    tx.update_product(existing.clone())?;
                    existing.id
                }
                None => {
                    let mut product = Product::new(
                        store.tenant_id,
                        store.branch_id,
                        external.sku.clone(),
                        external.name.clone(),
                        external.price,
                        now,
                    );
                    product.is_active = external.is_active;
                    let id = product.id;
                    tx.insert_product(product)?;
                    id
                }
            };
            let mut mapping = ProductStoreMapping::new(
                store.tenant_id,
                store.branch_id,
                product_id,
                store.id,
                external.external_id.clone(),
                Some(external.sku.clone()),
                now,
            );
            mapping.inventory_item_id = external.inventory_item_id.clone();
            tx.insert_mapping(mapping)?;
            outbox.push(
                store.tenant_id,
                store.branch_id,
                &StoreSyncEvent::ProductSynced {
                    store_id: store.id,
                    product_id,
                    external_id: external.external_id.clone(),
                    created: true,
                    occurred_at: now,
                },
            );
            delivery.cancellation.check()?;
            Ok(product_id)
        })?;
        self.ctx.publish(outbox);

        debug!(user_id = %delivery.actor.user_id, %product_id, "product created from store");
        Ok((product_id, true))
    }

    fn update_synced(
        &self,
        delivery: &Delivery,
        external: &ExternalProduct,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> ServiceResult<(ProductId, bool)> {
        let store = &delivery.store;
        let scope = self.ctx.scope(&delivery.actor);
        let mut outbox = Outbox::default();
        self.ctx.db().transaction(|tx| -> ServiceResult<()> {
            let mut product = tx
                .product(product_id)?
                .filter(|p| p.tenant_id == store.tenant_id)
                .ok_or(StorageError::NotFound { entity: "product" })?;
            scope.ensure_write(product.branch_id)?;
            apply_external(&mut product, external, now);
            tx.update_product(product)?;

            if let Some(mut mapping) = tx.mapping_for_product(product_id, store.id)? {
                mapping.external_sku = Some(external.sku.clone());
                if external.inventory_item_id.is_some() {
                    mapping.inventory_item_id = external.inventory_item_id.clone();
                }
                mapping.updated_at = now;
                tx.update_mapping(mapping)?;
            }
            outbox.push(
                store.tenant_id,
                store.branch_id,
                &StoreSyncEvent::ProductSynced {
                    store_id: store.id,
                    product_id,
                    external_id: external.external_id.clone(),
                    created: false,
                    occurred_at: now,
                },
            );
            delivery.cancellation.check()
        })?;
        self.ctx.publish(outbox);
        Ok((product_id, false))
    }

    fn delete_product(&self, delivery: &Delivery, external_id: &str) -> ServiceResult<WebhookOutcome> {
        let store = &delivery.store;
        let scope = self.ctx.scope(&delivery.actor);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let product_id = self.ctx.db().transaction(|tx| -> ServiceResult<Option<ProductId>> {
            let Some(mapping) = tx.mapping_by_external(store.id, external_id)? else {
                return Ok(None);
            };
            if let Some(mut product) = tx.product(mapping.product_id)? {
                scope.ensure_write(product.branch_id)?;
                if product.deleted_at.is_none() {
                    product.soft_delete(now);
                    tx.update_product(product)?;
                }
            }
            tx.delete_mapping(mapping.id)?;
            outbox.push(
                store.tenant_id,
                store.branch_id,
                &StoreSyncEvent::ProductUnmapped {
                    store_id: store.id,
                    product_id: mapping.product_id,
                    external_id: mapping.external_id.clone(),
                    occurred_at: now,
                },
            );
            delivery.cancellation.check()?;
            Ok(Some(mapping.product_id))
        })?;
        self.ctx.publish(outbox);
        Ok(WebhookOutcome::ProductUnmapped { product_id })
    }

    fn ingest_order(&self, delivery: &Delivery, payload: ExternalOrderPayload) -> ServiceResult<WebhookOutcome> {
        let store = &delivery.store;
        let policy = self.ctx.policy(store.tenant_id);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let outcome = self.ctx.db().transaction(|tx| -> ServiceResult<WebhookOutcome> {
            if tx.external_order(store.id, &payload.external_id)?.is_some() {
                debug!(external_id = %payload.external_id, "order already ingested");
                return Ok(WebhookOutcome::OrderIngested {
                    lines_posted: 0,
                    lines_skipped: 0,
                    replayed: true,
                });
            }
            let outcome = record_order(tx, delivery, &payload, policy, now, &mut outbox)?;
            delivery.cancellation.check()?;
            Ok(outcome)
        })?;
        self.ctx.publish(outbox);
        Ok(outcome)
    }

    /// Record a status change. Cancelled or refunded orders give their stock
    /// back once. An update for an order never seen is ingested first.
    fn update_order(&self, delivery: &Delivery, payload: ExternalOrderPayload) -> ServiceResult<WebhookOutcome> {
        let store = &delivery.store;
        let policy = self.ctx.policy(store.tenant_id);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let outcome = self.ctx.db().transaction(|tx| -> ServiceResult<WebhookOutcome> {
            let Some(mut order) = tx.external_order(store.id, &payload.external_id)? else {
                let outcome = record_order(tx, delivery, &payload, policy, now, &mut outbox)?;
                delivery.cancellation.check()?;
                return Ok(outcome);
            };

            let release = payload.status.releases_stock() && !order.stock_released;
            if release {
                let reference = MovementReference::new(ReferenceType::ExternalOrder, payload.external_id.clone());
                let posted: Vec<_> = tx
                    .movements_by_reference(store.tenant_id, &reference)?
                    .into_iter()
                    .filter(|m| m.is_posted())
                    .collect();
                let reason = format!("external order {:?}", payload.status).to_lowercase();
                for movement in posted {
                    void_posted(tx, movement, delivery.actor.user_id, &reason, policy, now, &mut outbox)?;
                }
                order.stock_released = true;
            }
            order.status = payload.status;
            order.updated_at = now;
            tx.update_external_order(order)?;

            outbox.push(
                store.tenant_id,
                store.branch_id,
                &StoreSyncEvent::OrderStatusChanged {
                    store_id: store.id,
                    external_id: payload.external_id.clone(),
                    status: payload.status,
                    stock_released: release,
                    occurred_at: now,
                },
            );
            delivery.cancellation.check()?;
            Ok(WebhookOutcome::OrderUpdated {
                status: payload.status,
                stock_released: release,
            })
        })?;
        self.ctx.publish(outbox);
        Ok(outcome)
    }

    /// Move sellable stock at the store's warehouse to the reported absolute
    /// level by posting only the difference.
    ///
    /// The movement reference is the body digest plus the ledger position of
    /// the product at the warehouse. A redelivery of the same body with no
    /// stock change in between replays; the same body arriving after other
    /// movements were posted is a new reconciliation.
    fn reconcile_inventory(
        &self,
        delivery: &Delivery,
        level: InventoryLevel,
        digest: String,
    ) -> ServiceResult<WebhookOutcome> {
        let store = &delivery.store;
        if level.available < Decimal::ZERO {
            return Err(DomainError::invalid_quantity(format!(
                "reported stock level {} is negative",
                level.available
            ))
            .into());
        }
        let policy = self.ctx.policy(store.tenant_id);
        let now = Utc::now();
        let mut outbox = Outbox::default();

        let outcome = self.ctx.db().transaction(|tx| -> ServiceResult<WebhookOutcome> {
            let mapping = match level.keyed_by {
                ExternalIdKind::Product => tx.mapping_by_external(store.id, &level.external_id)?,
                ExternalIdKind::InventoryItem => tx.mapping_by_inventory_item(store.id, &level.external_id)?,
            };
            let Some(product_id) = mapping.map(|m| m.product_id) else {
                warn!(external_id = %level.external_id, keyed_by = ?level.keyed_by, "inventory update for unmapped product");
                return Ok(WebhookOutcome::InventoryReconciled {
                    product_id: None,
                    delta: Decimal::ZERO,
                });
            };

            tx.lock_stock(product_id)?;
            let position = tx.ledger_position(product_id, store.warehouse_id)?;
            let current = tx.stock_level(product_id, store.warehouse_id, StockBucket::Sellable)?;
            let delta = level.available - current;
            if delta.is_zero() {
                return Ok(WebhookOutcome::InventoryReconciled {
                    product_id: Some(product_id),
                    delta,
                });
            }

            let direction = if delta > Decimal::ZERO {
                MovementDirection::In
            } else {
                MovementDirection::Out
            };
            let receipt = post_movement(
                tx,
                NewMovement {
                    tenant_id: store.tenant_id,
                    product_id,
                    warehouse_id: store.warehouse_id,
                    branch_id: store.branch_id,
                    direction,
                    bucket: StockBucket::Sellable,
                    quantity: delta.abs(),
                    reference: MovementReference::new(
                        ReferenceType::ExternalInventorySync,
                        format!("{digest}@{position}"),
                    ),
                    created_by: delivery.actor.user_id,
                    note: Some(format!("{} stock level {}", store.kind, level.available)),
                },
                policy,
                now,
                &mut outbox,
            )?;
            if !receipt.replayed {
                outbox.push(
                    store.tenant_id,
                    store.branch_id,
                    &StoreSyncEvent::InventoryReconciled {
                        store_id: store.id,
                        product_id,
                        target: level.available,
                        delta,
                        occurred_at: now,
                    },
                );
            }
            delivery.cancellation.check()?;
            Ok(WebhookOutcome::InventoryReconciled {
                product_id: Some(product_id),
                delta,
            })
        })?;
        self.ctx.publish(outbox);
        Ok(outcome)
    }
}

/// A delivery being applied: the store it came for and the system actor it
/// runs as.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) store: Store,
    pub(crate) actor: Actor,
    pub(crate) cancellation: Cancellation,
}

impl Delivery {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            actor: Actor::system(store.tenant_id, store.branch_id),
            store,
            cancellation: Cancellation::new(),
        }
    }
}

fn store_in(t: &mut dyn Tx, actor: &Actor, store_id: StoreId) -> ServiceResult<Store> {
    t.store(store_id)?
        .filter(|s| s.tenant_id == actor.tenant_id)
        .ok_or_else(|| StorageError::NotFound { entity: "store" }.into())
}

fn apply_external(product: &mut Product, external: &ExternalProduct, now: DateTime<Utc>) {
    product.name = external.name.clone();
    product.price = external.price;
    product.is_active = external.is_active;
    product.updated_at = now;
}

/// Store a new order and take its mapped lines out of the store's warehouse.
///
/// Lines resolve through the store's mappings, by external product id first,
/// then by external SKU. Unmapped lines are skipped. An order that arrives
/// already cancelled or refunded posts nothing.
fn record_order(
    tx: &mut dyn Tx,
    delivery: &Delivery,
    payload: &ExternalOrderPayload,
    policy: PolicyConfig,
    now: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<WebhookOutcome> {
    let store = &delivery.store;
    let releases = payload.status.releases_stock();
    let mut per_product: BTreeMap<ProductId, Decimal> = BTreeMap::new();
    let mut skipped = 0;

    if !releases {
        for line in &payload.lines {
            let mut mapped = match line.external_product_id.as_deref() {
                Some(id) => tx.mapping_by_external(store.id, id)?,
                None => None,
            };
            if mapped.is_none() {
                if let Some(sku) = line.sku.as_deref() {
                    mapped = tx.mapping_by_external_sku(store.id, sku)?;
                }
            }
            match mapped.map(|m| m.product_id) {
                Some(product_id) if line.quantity > Decimal::ZERO => {
                    *per_product.entry(product_id).or_default() += line.quantity;
                }
                _ => {
                    warn!(
                        external_order = %payload.external_id,
                        external_product = ?line.external_product_id,
                        sku = ?line.sku,
                        "skipping order line without a usable mapping"
                    );
                    skipped += 1;
                }
            }
        }
    }

    let reference = MovementReference::new(ReferenceType::ExternalOrder, payload.external_id.clone());
    for (product_id, quantity) in &per_product {
        post_movement(
            tx,
            NewMovement {
                tenant_id: store.tenant_id,
                product_id: *product_id,
                warehouse_id: store.warehouse_id,
                branch_id: store.branch_id,
                direction: MovementDirection::Out,
                bucket: StockBucket::Sellable,
                quantity: *quantity,
                reference: reference.clone(),
                created_by: delivery.actor.user_id,
                note: Some(format!("{} order {}", store.kind, payload.external_id)),
            },
            policy,
            now,
            outbox,
        )?;
    }

    tx.insert_external_order(ExternalOrder {
        id: ExternalOrderId::new(),
        tenant_id: store.tenant_id,
        branch_id: store.branch_id,
        store_id: store.id,
        external_id: payload.external_id.clone(),
        status: payload.status,
        lines: payload.lines.clone(),
        stock_released: releases,
        created_at: now,
        updated_at: now,
    })?;

    outbox.push(
        store.tenant_id,
        store.branch_id,
        &StoreSyncEvent::OrderIngested {
            store_id: store.id,
            external_id: payload.external_id.clone(),
            lines_posted: per_product.len(),
            lines_skipped: skipped,
            occurred_at: now,
        },
    );
    Ok(WebhookOutcome::OrderIngested {
        lines_posted: per_product.len(),
        lines_skipped: skipped,
        replayed: false,
    })
}
