//! In-memory transactional database.
//!
//! A transaction holds the one writer lock for its whole life and writes to
//! a private copy of the tables, taken on its first write. The copy replaces
//! the committed tables only on commit. That gives serializable isolation and
//! all-or-nothing writes. Unique constraints (including the partial ones from
//! `schema/stock_core.sql`) are enforced on insert/update.
//!
//! Intended for tests/dev. Copy-on-write per transaction, not optimized.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use branchledger_core::{AggregateRoot, BranchId, Decimal, TenantId};
use branchledger_inventory::{
    on_hand, InventoryTransit, MovementId, MovementKey, MovementReference, MovementStatus, Product,
    ProductId, StockBucket, StockMovement, StockTransfer, TransferId, TransferItemId, TransitId,
    Warehouse, WarehouseId,
};
use branchledger_sync::{
    ExternalOrder, MappingId, ProductStoreMapping, Store, StoreId, StoreToken, StoreTokenId,
};
use branchledger_workflow::{
    WorkflowApproval, WorkflowApprovalId, WorkflowDefinition, WorkflowInstance, WorkflowInstanceId,
};

use super::{check_version, constraints, unique, Database, StorageResult, Tx};
use crate::error::StorageError;

type DefinitionKey = (TenantId, String, String);
type EntityKey = (TenantId, String, String);

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    movements: Vec<StockMovement>,
    movement_index: HashMap<MovementId, usize>,
    posted_keys: HashMap<MovementKey, MovementId>,
    transits: HashMap<TransitId, InventoryTransit>,
    open_transit_by_item: HashMap<TransferItemId, TransitId>,
    transfers: HashMap<TransferId, StockTransfer>,
    stores: HashMap<StoreId, Store>,
    store_tokens: HashMap<StoreTokenId, StoreToken>,
    mappings: HashMap<MappingId, ProductStoreMapping>,
    external_orders: HashMap<(StoreId, String), ExternalOrder>,
    workflow_definitions: HashMap<DefinitionKey, WorkflowDefinition>,
    workflow_instances: HashMap<WorkflowInstanceId, WorkflowInstance>,
    pending_instance_by_entity: HashMap<EntityKey, WorkflowInstanceId>,
    workflow_approvals: HashMap<WorkflowApprovalId, WorkflowApproval>,
}

impl Tables {
    fn movement(&self, id: MovementId) -> Option<&StockMovement> {
        self.movement_index.get(&id).map(|&i| &self.movements[i])
    }

    fn movements_at(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> impl Iterator<Item = &StockMovement> {
        self.movements
            .iter()
            .filter(move |m| m.product_id == product_id && m.warehouse_id == warehouse_id)
    }

    fn find_mapping(&self, pred: impl Fn(&ProductStoreMapping) -> bool) -> Option<ProductStoreMapping> {
        self.mappings.values().find(|m| pred(m)).cloned()
    }

    fn sku_taken(&self, product: &Product) -> bool {
        product.deleted_at.is_none()
            && self.products.values().any(|p| {
                p.id != product.id
                    && p.branch_id == product.branch_id
                    && p.deleted_at.is_none()
                    && p.sku == product.sku
            })
    }

    fn mapping_conflict(&self, mapping: &ProductStoreMapping) -> Option<&'static str> {
        self.mappings.values().filter(|m| m.id != mapping.id).find_map(|m| {
            if m.product_id == mapping.product_id && m.store_id == mapping.store_id {
                Some(constraints::MAPPING_PRODUCT_STORE)
            } else if m.store_id == mapping.store_id && m.external_id == mapping.external_id {
                Some(constraints::MAPPING_STORE_EXTERNAL)
            } else if m.store_id == mapping.store_id
                && mapping.inventory_item_id.is_some()
                && m.inventory_item_id == mapping.inventory_item_id
            {
                Some(constraints::MAPPING_STORE_INVENTORY_ITEM)
            } else {
                None
            }
        })
    }

    fn insert_product(&mut self, product: Product) -> StorageResult<()> {
        if self.products.contains_key(&product.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        if self.sku_taken(&product) {
            return Err(unique(constraints::PRODUCT_BRANCH_SKU));
        }
        self.products.insert(product.id, product);
        Ok(())
    }

    fn update_product(&mut self, product: Product) -> StorageResult<()> {
        if !self.products.contains_key(&product.id) {
            return Err(StorageError::NotFound { entity: "product" });
        }
        if self.sku_taken(&product) {
            return Err(unique(constraints::PRODUCT_BRANCH_SKU));
        }
        self.products.insert(product.id, product);
        Ok(())
    }

    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StorageResult<()> {
        if self.warehouses.contains_key(&warehouse.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        self.warehouses.insert(warehouse.id, warehouse);
        Ok(())
    }

    fn insert_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        if self.movement_index.contains_key(&movement.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        if movement.is_posted() {
            let key = movement.key();
            if self.posted_keys.contains_key(&key) {
                return Err(unique(constraints::MOVEMENT_POSTED_REFERENCE));
            }
            self.posted_keys.insert(key, movement.id);
        }
        self.movement_index.insert(movement.id, self.movements.len());
        self.movements.push(movement);
        Ok(())
    }

    fn update_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        let idx = *self
            .movement_index
            .get(&movement.id)
            .ok_or(StorageError::NotFound { entity: "stock movement" })?;

        let key = movement.key();
        if movement.is_posted() {
            match self.posted_keys.get(&key) {
                Some(existing) if *existing != movement.id => {
                    return Err(unique(constraints::MOVEMENT_POSTED_REFERENCE));
                }
                _ => {
                    self.posted_keys.insert(key, movement.id);
                }
            }
        } else if self.posted_keys.get(&key) == Some(&movement.id) {
            self.posted_keys.remove(&key);
        }
        self.movements[idx] = movement;
        Ok(())
    }

    fn insert_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        if self.transits.contains_key(&transit.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        if transit.is_open() {
            if self.open_transit_by_item.contains_key(&transit.transfer_item_id) {
                return Err(unique(constraints::TRANSIT_OPEN_ITEM));
            }
            self.open_transit_by_item
                .insert(transit.transfer_item_id, transit.id);
        }
        self.transits.insert(transit.id, transit);
        Ok(())
    }

    fn update_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        if !self.transits.contains_key(&transit.id) {
            return Err(StorageError::NotFound { entity: "inventory transit" });
        }
        if !transit.is_open() && self.open_transit_by_item.get(&transit.transfer_item_id) == Some(&transit.id) {
            self.open_transit_by_item.remove(&transit.transfer_item_id);
        }
        self.transits.insert(transit.id, transit);
        Ok(())
    }

    fn insert_transfer(&mut self, transfer: StockTransfer) -> StorageResult<()> {
        let id = transfer.id_typed();
        if self.transfers.contains_key(&id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        self.transfers.insert(id, transfer);
        Ok(())
    }

    fn update_transfer(&mut self, transfer: StockTransfer, expected_version: u64) -> StorageResult<()> {
        let id = transfer.id_typed();
        let stored = self
            .transfers
            .get(&id)
            .ok_or(StorageError::NotFound { entity: "stock transfer" })?;
        check_version("stock transfer", expected_version, stored.version())?;
        self.transfers.insert(id, transfer);
        Ok(())
    }

    fn insert_store(&mut self, store: Store) -> StorageResult<()> {
        if self.stores.contains_key(&store.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        self.stores.insert(store.id, store);
        Ok(())
    }

    fn update_store(&mut self, store: Store) -> StorageResult<()> {
        if !self.stores.contains_key(&store.id) {
            return Err(StorageError::NotFound { entity: "store" });
        }
        self.stores.insert(store.id, store);
        Ok(())
    }

    fn insert_store_token(&mut self, token: StoreToken) -> StorageResult<()> {
        if self.store_tokens.contains_key(&token.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        self.store_tokens.insert(token.id, token);
        Ok(())
    }

    fn insert_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        if self.mappings.contains_key(&mapping.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        if let Some(constraint) = self.mapping_conflict(&mapping) {
            return Err(unique(constraint));
        }
        self.mappings.insert(mapping.id, mapping);
        Ok(())
    }

    fn update_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        if !self.mappings.contains_key(&mapping.id) {
            return Err(StorageError::NotFound { entity: "product mapping" });
        }
        if let Some(constraint) = self.mapping_conflict(&mapping) {
            return Err(unique(constraint));
        }
        self.mappings.insert(mapping.id, mapping);
        Ok(())
    }

    fn insert_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        let key = (order.store_id, order.external_id.clone());
        if self.external_orders.contains_key(&key) {
            return Err(unique(constraints::EXTERNAL_ORDER_STORE_EXTERNAL));
        }
        self.external_orders.insert(key, order);
        Ok(())
    }

    fn update_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        let key = (order.store_id, order.external_id.clone());
        if !self.external_orders.contains_key(&key) {
            return Err(StorageError::NotFound { entity: "external order" });
        }
        self.external_orders.insert(key, order);
        Ok(())
    }

    fn insert_workflow_definition(&mut self, definition: WorkflowDefinition) -> StorageResult<()> {
        let key = (
            definition.tenant_id,
            definition.module_name.clone(),
            definition.entity_type.clone(),
        );
        if self.workflow_definitions.contains_key(&key) {
            return Err(unique(constraints::WORKFLOW_DEFINITION_KEY));
        }
        self.workflow_definitions.insert(key, definition);
        Ok(())
    }

    fn insert_workflow_instance(&mut self, instance: WorkflowInstance) -> StorageResult<()> {
        let id = instance.id_typed();
        if self.workflow_instances.contains_key(&id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        if instance.is_pending() {
            let key = entity_key(&instance);
            if self.pending_instance_by_entity.contains_key(&key) {
                return Err(unique(constraints::WORKFLOW_PENDING_ENTITY));
            }
            self.pending_instance_by_entity.insert(key, id);
        }
        self.workflow_instances.insert(id, instance);
        Ok(())
    }

    fn update_workflow_instance(&mut self, instance: WorkflowInstance, expected_version: u64) -> StorageResult<()> {
        let id = instance.id_typed();
        let stored = self
            .workflow_instances
            .get(&id)
            .ok_or(StorageError::NotFound { entity: "workflow instance" })?;
        check_version("workflow instance", expected_version, stored.version())?;

        if !instance.is_pending() {
            let key = entity_key(&instance);
            if self.pending_instance_by_entity.get(&key) == Some(&id) {
                self.pending_instance_by_entity.remove(&key);
            }
        }
        self.workflow_instances.insert(id, instance);
        Ok(())
    }

    fn insert_workflow_approval(&mut self, approval: WorkflowApproval) -> StorageResult<()> {
        if self.workflow_approvals.contains_key(&approval.id) {
            return Err(unique(constraints::PRIMARY_KEY));
        }
        self.workflow_approvals.insert(approval.id, approval);
        Ok(())
    }

    fn update_workflow_approval(&mut self, approval: WorkflowApproval, expected_version: u64) -> StorageResult<()> {
        let stored = self
            .workflow_approvals
            .get(&approval.id)
            .ok_or(StorageError::NotFound { entity: "workflow approval" })?;
        check_version("workflow approval", expected_version, stored.version)?;
        self.workflow_approvals.insert(approval.id, approval);
        Ok(())
    }
}

fn entity_key(instance: &WorkflowInstance) -> EntityKey {
    (
        instance.tenant_id(),
        instance.entity_type().to_string(),
        instance.entity_id().to_string(),
    )
}

#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for InMemoryDatabase {
    fn begin(&self) -> StorageResult<Box<dyn Tx + '_>> {
        // Tables are only replaced on commit, so a poisoned lock still
        // guards a consistent snapshot.
        let committed = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Box::new(MemTx { committed, work: None }))
    }
}

struct MemTx<'a> {
    committed: MutexGuard<'a, Tables>,
    /// Private copy, taken on the first write.
    work: Option<Tables>,
}

impl MemTx<'_> {
    fn tables(&self) -> &Tables {
        self.work.as_ref().unwrap_or(&*self.committed)
    }

    fn tables_mut(&mut self) -> &mut Tables {
        let committed = &self.committed;
        self.work.get_or_insert_with(|| Tables::clone(committed))
    }
}

impl Tx for MemTx<'_> {
    fn product(&mut self, id: ProductId) -> StorageResult<Option<Product>> {
        Ok(self.tables().products.get(&id).cloned())
    }

    fn live_product_by_sku(&mut self, branch_id: BranchId, sku: &str) -> StorageResult<Option<Product>> {
        Ok(self
            .tables()
            .products
            .values()
            .find(|p| p.branch_id == branch_id && p.deleted_at.is_none() && p.sku == sku)
            .cloned())
    }

    fn warehouse(&mut self, id: WarehouseId) -> StorageResult<Option<Warehouse>> {
        Ok(self.tables().warehouses.get(&id).cloned())
    }

    fn warehouses(&mut self, tenant_id: TenantId) -> StorageResult<Vec<Warehouse>> {
        Ok(self
            .tables()
            .warehouses
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn movement(&mut self, id: MovementId) -> StorageResult<Option<StockMovement>> {
        Ok(self.tables().movement(id).cloned())
    }

    fn posted_movement(&mut self, key: &MovementKey) -> StorageResult<Option<StockMovement>> {
        let t = self.tables();
        Ok(t.posted_keys.get(key).and_then(|id| t.movement(*id)).cloned())
    }

    fn movements_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> StorageResult<Vec<StockMovement>> {
        Ok(self
            .tables()
            .movements
            .iter()
            .filter(|m| m.tenant_id == tenant_id && &m.reference == reference)
            .cloned()
            .collect())
    }

    fn movement_history(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StorageResult<Vec<StockMovement>> {
        Ok(self
            .tables()
            .movements_at(product_id, warehouse_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn stock_level(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        bucket: StockBucket,
    ) -> StorageResult<Decimal> {
        Ok(on_hand(&self.tables().movements, product_id, warehouse_id, bucket))
    }

    fn lock_stock(&mut self, _product_id: ProductId) -> StorageResult<()> {
        Ok(())
    }

    fn ledger_position(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<u64> {
        Ok(self
            .tables()
            .movements_at(product_id, warehouse_id)
            .map(|m| if m.status == MovementStatus::Voided { 2 } else { 1 })
            .sum())
    }

    fn transit(&mut self, id: TransitId) -> StorageResult<Option<InventoryTransit>> {
        Ok(self.tables().transits.get(&id).cloned())
    }

    fn open_transit_for_item(&mut self, item: TransferItemId) -> StorageResult<Option<InventoryTransit>> {
        let t = self.tables();
        Ok(t.open_transit_by_item
            .get(&item)
            .and_then(|id| t.transits.get(id))
            .cloned())
    }

    fn in_transit_quantity(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<Decimal> {
        Ok(self
            .tables()
            .transits
            .values()
            .filter(|tr| tr.is_open() && tr.product_id == product_id && tr.to_warehouse_id == warehouse_id)
            .map(|tr| tr.quantity.value())
            .sum())
    }

    fn transits_for_transfer(&mut self, transfer: TransferId) -> StorageResult<Vec<InventoryTransit>> {
        let mut rows: Vec<_> = self
            .tables()
            .transits
            .values()
            .filter(|t| t.stock_transfer_id == transfer)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.shipped_at);
        Ok(rows)
    }

    fn transfer(&mut self, id: TransferId) -> StorageResult<Option<StockTransfer>> {
        Ok(self.tables().transfers.get(&id).cloned())
    }

    fn store(&mut self, id: StoreId) -> StorageResult<Option<Store>> {
        Ok(self.tables().stores.get(&id).cloned())
    }

    fn store_tokens(&mut self, store: StoreId) -> StorageResult<Vec<StoreToken>> {
        Ok(self
            .tables()
            .store_tokens
            .values()
            .filter(|t| t.store_id == store)
            .cloned()
            .collect())
    }

    fn mapping_by_external(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ProductStoreMapping>> {
        Ok(self
            .tables()
            .find_mapping(|m| m.store_id == store && m.external_id == external_id))
    }

    fn mapping_by_external_sku(&mut self, store: StoreId, sku: &str) -> StorageResult<Option<ProductStoreMapping>> {
        Ok(self
            .tables()
            .find_mapping(|m| m.store_id == store && m.external_sku.as_deref() == Some(sku)))
    }

    fn mapping_by_inventory_item(
        &mut self,
        store: StoreId,
        inventory_item_id: &str,
    ) -> StorageResult<Option<ProductStoreMapping>> {
        Ok(self.tables().find_mapping(|m| {
            m.store_id == store && m.inventory_item_id.as_deref() == Some(inventory_item_id)
        }))
    }

    fn mapping_for_product(&mut self, product: ProductId, store: StoreId) -> StorageResult<Option<ProductStoreMapping>> {
        Ok(self
            .tables()
            .find_mapping(|m| m.product_id == product && m.store_id == store))
    }

    fn mappings_for_store(&mut self, store: StoreId) -> StorageResult<Vec<ProductStoreMapping>> {
        Ok(self
            .tables()
            .mappings
            .values()
            .filter(|m| m.store_id == store)
            .cloned()
            .collect())
    }

    fn external_order(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ExternalOrder>> {
        Ok(self
            .tables()
            .external_orders
            .get(&(store, external_id.to_string()))
            .cloned())
    }

    fn workflow_definition(
        &mut self,
        tenant_id: TenantId,
        module_name: &str,
        entity_type: &str,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        Ok(self
            .tables()
            .workflow_definitions
            .get(&(tenant_id, module_name.to_string(), entity_type.to_string()))
            .cloned())
    }

    fn workflow_instance(&mut self, id: WorkflowInstanceId) -> StorageResult<Option<WorkflowInstance>> {
        Ok(self.tables().workflow_instances.get(&id).cloned())
    }

    fn workflow_approval(&mut self, id: WorkflowApprovalId) -> StorageResult<Option<WorkflowApproval>> {
        Ok(self.tables().workflow_approvals.get(&id).cloned())
    }

    fn approvals_for_instance(&mut self, instance: WorkflowInstanceId) -> StorageResult<Vec<WorkflowApproval>> {
        let mut rows: Vec<_> = self
            .tables()
            .workflow_approvals
            .values()
            .filter(|a| a.instance_id == instance)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.requested_at);
        Ok(rows)
    }

    fn insert_product(&mut self, product: Product) -> StorageResult<()> {
        self.tables_mut().insert_product(product)
    }

    fn update_product(&mut self, product: Product) -> StorageResult<()> {
        self.tables_mut().update_product(product)
    }

    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StorageResult<()> {
        self.tables_mut().insert_warehouse(warehouse)
    }

    fn insert_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        self.tables_mut().insert_movement(movement)
    }

    fn update_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        self.tables_mut().update_movement(movement)
    }

    fn insert_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        self.tables_mut().insert_transit(transit)
    }

    fn update_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        self.tables_mut().update_transit(transit)
    }

    fn insert_transfer(&mut self, transfer: StockTransfer) -> StorageResult<()> {
        self.tables_mut().insert_transfer(transfer)
    }

    fn update_transfer(&mut self, transfer: StockTransfer, expected_version: u64) -> StorageResult<()> {
        self.tables_mut().update_transfer(transfer, expected_version)
    }

    fn insert_store(&mut self, store: Store) -> StorageResult<()> {
        self.tables_mut().insert_store(store)
    }

    fn update_store(&mut self, store: Store) -> StorageResult<()> {
        self.tables_mut().update_store(store)
    }

    fn insert_store_token(&mut self, token: StoreToken) -> StorageResult<()> {
        self.tables_mut().insert_store_token(token)
    }

    fn insert_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        self.tables_mut().insert_mapping(mapping)
    }

    fn update_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        self.tables_mut().update_mapping(mapping)
    }

    fn delete_mapping(&mut self, id: MappingId) -> StorageResult<ProductStoreMapping> {
        self.tables_mut()
            .mappings
            .remove(&id)
            .ok_or(StorageError::NotFound { entity: "product mapping" })
    }

    fn insert_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        self.tables_mut().insert_external_order(order)
    }

    fn update_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        self.tables_mut().update_external_order(order)
    }

    fn insert_workflow_definition(&mut self, definition: WorkflowDefinition) -> StorageResult<()> {
        self.tables_mut().insert_workflow_definition(definition)
    }

    fn insert_workflow_instance(&mut self, instance: WorkflowInstance) -> StorageResult<()> {
        self.tables_mut().insert_workflow_instance(instance)
    }

    fn update_workflow_instance(&mut self, instance: WorkflowInstance, expected_version: u64) -> StorageResult<()> {
        self.tables_mut().update_workflow_instance(instance, expected_version)
    }

    fn insert_workflow_approval(&mut self, approval: WorkflowApproval) -> StorageResult<()> {
        self.tables_mut().insert_workflow_approval(approval)
    }

    fn update_workflow_approval(&mut self, approval: WorkflowApproval, expected_version: u64) -> StorageResult<()> {
        self.tables_mut().update_workflow_approval(approval, expected_version)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemTx { mut committed, work } = *self;
        if let Some(tables) = work {
            *committed = tables;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchledger_core::{Money, UserId};
    use branchledger_inventory::{MovementDirection, NewMovement, ReferenceType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product(branch: BranchId, sku: &str) -> Product {
        Product::new(TenantId::new(), branch, sku, "Thing", Money::ZERO, Utc::now())
    }

    fn db() -> Box<dyn Database> {
        Box::new(InMemoryDatabase::new())
    }

    #[test]
    fn failed_transactions_leave_no_trace() {
        let db = db();
        let p = product(BranchId::new(), "A-1");
        let id = p.id;

        let res: Result<(), StorageError> = db.transaction(|tx| {
            tx.insert_product(p)?;
            Err(StorageError::NotFound { entity: "anything" })
        });
        assert!(res.is_err());
        assert_eq!(db.read(|t| t.product(id)), Ok(None));
    }

    #[test]
    fn reads_inside_a_transaction_see_its_own_writes() {
        let db = db();
        let p = product(BranchId::new(), "A-1");
        let id = p.id;

        let seen = db.transaction(|tx| -> StorageResult<bool> {
            tx.insert_product(p)?;
            Ok(tx.product(id)?.is_some())
        });
        assert_eq!(seen, Ok(true));
        assert!(db.read(|t| t.product(id)).unwrap().is_some());
    }

    #[test]
    fn sku_is_unique_among_live_products_only() {
        let db = db();
        let branch = BranchId::new();
        let mut first = product(branch, "SKU-1");

        db.transaction(|tx| tx.insert_product(first.clone())).unwrap();
        assert_eq!(
            db.transaction(|tx| tx.insert_product(product(branch, "SKU-1"))),
            Err(unique(constraints::PRODUCT_BRANCH_SKU))
        );
        // other branch is fine
        db.transaction(|tx| tx.insert_product(product(BranchId::new(), "SKU-1")))
            .unwrap();

        first.soft_delete(Utc::now());
        db.transaction(|tx| tx.update_product(first.clone())).unwrap();
        db.transaction(|tx| tx.insert_product(product(branch, "SKU-1")))
            .unwrap();
    }

    #[test]
    fn posted_reference_key_is_unique_until_voided() {
        let db = db();
        let new = NewMovement {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            branch_id: BranchId::new(),
            direction: MovementDirection::In,
            bucket: StockBucket::Sellable,
            quantity: dec!(5),
            reference: MovementReference::new(ReferenceType::Purchase, "PO-7"),
            created_by: UserId::new(),
            note: None,
        };
        let mut first = new.clone().into_posted(Utc::now()).unwrap();
        db.transaction(|tx| tx.insert_movement(first.clone())).unwrap();

        let again = new.clone().into_posted(Utc::now()).unwrap();
        assert_eq!(
            db.transaction(|tx| tx.insert_movement(again.clone())),
            Err(unique(constraints::MOVEMENT_POSTED_REFERENCE))
        );

        first.void(UserId::new(), "typo", Utc::now());
        db.transaction(|tx| tx.update_movement(first.clone())).unwrap();
        db.transaction(|tx| tx.insert_movement(again)).unwrap();

        let history = db
            .read(|t| t.movement_history(new.tenant_id, new.product_id, new.warehouse_id))
            .unwrap();
        assert_eq!(history.len(), 2);
        // two inserts plus one void
        assert_eq!(
            db.read(|t| t.ledger_position(new.product_id, new.warehouse_id)),
            Ok(3)
        );
        assert_eq!(
            db.read(|t| t.stock_level(new.product_id, new.warehouse_id, StockBucket::Sellable)),
            Ok(dec!(5))
        );
    }
}
