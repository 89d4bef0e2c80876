//! Transactional storage behind the services.
//!
//! Services only see [`Database`] and [`Tx`]. Two backends implement them:
//!
//! - [`InMemoryDatabase`]: one writer lock, copy-on-write tables. Tests/dev.
//! - [`PostgresDatabase`]: sqlx over a `PgPool`, schema in `schema/stock_core.sql`.
//!
//! Both report the same constraint names from [`constraints`], so callers
//! can match on a `UniqueViolation` without knowing the backend.
//!
//! ## Stock checks
//!
//! Any "compute stock, validate, insert" sequence must call
//! [`Tx::lock_stock`] first. On Postgres that takes a row lock on the product
//! (`SELECT ... FOR UPDATE`), so concurrent postings for one product queue up
//! behind each other; in memory the writer lock already serializes them.

use branchledger_core::{BranchId, Decimal, TenantId};
use branchledger_inventory::{
    InventoryTransit, MovementId, MovementKey, MovementReference, Product, ProductId, StockBucket,
    StockMovement, StockTransfer, TransferId, TransferItemId, TransitId, Warehouse, WarehouseId,
};
use branchledger_sync::{ExternalOrder, MappingId, ProductStoreMapping, Store, StoreId, StoreToken};
use branchledger_workflow::{
    WorkflowApproval, WorkflowApprovalId, WorkflowDefinition, WorkflowInstance, WorkflowInstanceId,
};

use crate::error::StorageError;

mod in_memory;
mod postgres;

pub use in_memory::InMemoryDatabase;
pub use postgres::PostgresDatabase;

pub type StorageResult<T> = Result<T, StorageError>;

pub mod constraints {
    pub const PRODUCT_BRANCH_SKU: &str = "products_branch_sku_live";
    pub const MOVEMENT_POSTED_REFERENCE: &str = "stock_movements_posted_reference";
    pub const TRANSIT_OPEN_ITEM: &str = "inventory_transits_open_item";
    pub const MAPPING_PRODUCT_STORE: &str = "product_store_mappings_product_store";
    pub const MAPPING_STORE_EXTERNAL: &str = "product_store_mappings_store_external";
    pub const MAPPING_STORE_INVENTORY_ITEM: &str = "product_store_mappings_store_inventory_item";
    pub const EXTERNAL_ORDER_STORE_EXTERNAL: &str = "external_orders_store_external";
    pub const WORKFLOW_DEFINITION_KEY: &str = "workflow_definitions_module_entity";
    pub const WORKFLOW_PENDING_ENTITY: &str = "workflow_instances_pending_entity";
    pub const PRIMARY_KEY: &str = "primary_key";
    pub const UNNAMED: &str = "unnamed";

    const ALL: [&str; 9] = [
        PRODUCT_BRANCH_SKU,
        MOVEMENT_POSTED_REFERENCE,
        TRANSIT_OPEN_ITEM,
        MAPPING_PRODUCT_STORE,
        MAPPING_STORE_EXTERNAL,
        MAPPING_STORE_INVENTORY_ITEM,
        EXTERNAL_ORDER_STORE_EXTERNAL,
        WORKFLOW_DEFINITION_KEY,
        WORKFLOW_PENDING_ENTITY,
    ];

    /// Map a constraint or index name reported by the database onto ours.
    pub fn named(name: Option<&str>) -> &'static str {
        match name {
            Some(name) if name.ends_with("_pkey") => PRIMARY_KEY,
            Some(name) => ALL.into_iter().find(|c| *c == name).unwrap_or(UNNAMED),
            None => UNNAMED,
        }
    }
}

/// One open transaction.
///
/// Reads return owned rows and see the transaction's own writes. Dropping a
/// transaction without [`Tx::commit`] rolls it back.
pub trait Tx {
    fn product(&mut self, id: ProductId) -> StorageResult<Option<Product>>;
    /// Live (not soft-deleted) product with this SKU in the branch.
    fn live_product_by_sku(&mut self, branch_id: BranchId, sku: &str) -> StorageResult<Option<Product>>;
    fn warehouse(&mut self, id: WarehouseId) -> StorageResult<Option<Warehouse>>;
    fn warehouses(&mut self, tenant_id: TenantId) -> StorageResult<Vec<Warehouse>>;

    fn movement(&mut self, id: MovementId) -> StorageResult<Option<StockMovement>>;
    fn posted_movement(&mut self, key: &MovementKey) -> StorageResult<Option<StockMovement>>;
    fn movements_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> StorageResult<Vec<StockMovement>>;
    /// Posted and voided rows for a product at a warehouse, oldest first.
    fn movement_history(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StorageResult<Vec<StockMovement>>;
    /// Signed sum of posted rows in one bucket.
    fn stock_level(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        bucket: StockBucket,
    ) -> StorageResult<Decimal>;
    /// Serialize stock checks for a product until this transaction ends.
    fn lock_stock(&mut self, product_id: ProductId) -> StorageResult<()>;
    /// Counts every insert and every void for the pair; grows on each change.
    fn ledger_position(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<u64>;

    fn transit(&mut self, id: TransitId) -> StorageResult<Option<InventoryTransit>>;
    fn open_transit_for_item(&mut self, item: TransferItemId) -> StorageResult<Option<InventoryTransit>>;
    /// Open quantity heading to `warehouse_id`.
    fn in_transit_quantity(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<Decimal>;
    /// Ordered by `shipped_at`.
    fn transits_for_transfer(&mut self, transfer: TransferId) -> StorageResult<Vec<InventoryTransit>>;
    fn transfer(&mut self, id: TransferId) -> StorageResult<Option<StockTransfer>>;

    fn store(&mut self, id: StoreId) -> StorageResult<Option<Store>>;
    fn store_tokens(&mut self, store: StoreId) -> StorageResult<Vec<StoreToken>>;
    fn mapping_by_external(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ProductStoreMapping>>;
    fn mapping_by_external_sku(&mut self, store: StoreId, sku: &str) -> StorageResult<Option<ProductStoreMapping>>;
    fn mapping_by_inventory_item(
        &mut self,
        store: StoreId,
        inventory_item_id: &str,
    ) -> StorageResult<Option<ProductStoreMapping>>;
    fn mapping_for_product(&mut self, product: ProductId, store: StoreId) -> StorageResult<Option<ProductStoreMapping>>;
    fn mappings_for_store(&mut self, store: StoreId) -> StorageResult<Vec<ProductStoreMapping>>;
    fn external_order(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ExternalOrder>>;

    fn workflow_definition(
        &mut self,
        tenant_id: TenantId,
        module_name: &str,
        entity_type: &str,
    ) -> StorageResult<Option<WorkflowDefinition>>;
    fn workflow_instance(&mut self, id: WorkflowInstanceId) -> StorageResult<Option<WorkflowInstance>>;
    fn workflow_approval(&mut self, id: WorkflowApprovalId) -> StorageResult<Option<WorkflowApproval>>;
    /// Ordered by `requested_at`.
    fn approvals_for_instance(&mut self, instance: WorkflowInstanceId) -> StorageResult<Vec<WorkflowApproval>>;

    fn insert_product(&mut self, product: Product) -> StorageResult<()>;
    fn update_product(&mut self, product: Product) -> StorageResult<()>;
    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StorageResult<()>;
    fn insert_movement(&mut self, movement: StockMovement) -> StorageResult<()>;
    /// Only the status (and its audit fields) may change after insert.
    fn update_movement(&mut self, movement: StockMovement) -> StorageResult<()>;
    fn insert_transit(&mut self, transit: InventoryTransit) -> StorageResult<()>;
    fn update_transit(&mut self, transit: InventoryTransit) -> StorageResult<()>;
    fn insert_transfer(&mut self, transfer: StockTransfer) -> StorageResult<()>;
    /// Replace a transfer last read at `expected_version`.
    fn update_transfer(&mut self, transfer: StockTransfer, expected_version: u64) -> StorageResult<()>;
    fn insert_store(&mut self, store: Store) -> StorageResult<()>;
    fn update_store(&mut self, store: Store) -> StorageResult<()>;
    fn insert_store_token(&mut self, token: StoreToken) -> StorageResult<()>;
    fn insert_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()>;
    fn update_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()>;
    fn delete_mapping(&mut self, id: MappingId) -> StorageResult<ProductStoreMapping>;
    fn insert_external_order(&mut self, order: ExternalOrder) -> StorageResult<()>;
    fn update_external_order(&mut self, order: ExternalOrder) -> StorageResult<()>;
    fn insert_workflow_definition(&mut self, definition: WorkflowDefinition) -> StorageResult<()>;
    fn insert_workflow_instance(&mut self, instance: WorkflowInstance) -> StorageResult<()>;
    fn update_workflow_instance(&mut self, instance: WorkflowInstance, expected_version: u64) -> StorageResult<()>;
    fn insert_workflow_approval(&mut self, approval: WorkflowApproval) -> StorageResult<()>;
    /// Compare-and-swap on the approval's `version`.
    fn update_workflow_approval(&mut self, approval: WorkflowApproval, expected_version: u64) -> StorageResult<()>;

    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// A store that hands out transactions.
///
/// Calls block. Async callers run services on a blocking thread
/// (`tokio::task::spawn_blocking`).
pub trait Database: Send + Sync {
    fn begin(&self) -> StorageResult<Box<dyn Tx + '_>>;
}

impl dyn Database {
    /// Run `f` in one transaction; commit iff it returns `Ok`.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut dyn Tx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut tx = self.begin()?;
        let out = f(tx.as_mut())?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against committed state. Never commits.
    pub fn read<T, E>(&self, f: impl FnOnce(&mut dyn Tx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut tx = self.begin()?;
        f(tx.as_mut())
    }
}

pub(crate) fn unique(constraint: &'static str) -> StorageError {
    StorageError::UniqueViolation { constraint }
}

pub(crate) fn check_version(entity: &'static str, expected: u64, actual: u64) -> StorageResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StorageError::StaleVersion {
            entity,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::constraints;

    #[test]
    fn database_constraint_names_map_onto_ours() {
        assert_eq!(
            constraints::named(Some("stock_movements_posted_reference")),
            constraints::MOVEMENT_POSTED_REFERENCE
        );
        assert_eq!(constraints::named(Some("products_pkey")), constraints::PRIMARY_KEY);
        assert_eq!(constraints::named(Some("something_else")), constraints::UNNAMED);
        assert_eq!(constraints::named(None), constraints::UNNAMED);
    }
}
