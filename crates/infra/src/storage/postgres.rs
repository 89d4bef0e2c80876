//! PostgreSQL backend.
//!
//! Each row keeps its lookup/constraint columns next to the full record in a
//! `doc JSONB` column; reads decode `doc`. The unique indexes in
//! `schema/stock_core.sql` carry the names in [`constraints`], so a violation
//! surfaces as the same [`StorageError::UniqueViolation`] the in-memory
//! backend raises.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | StorageError |
//! |------------|------|--------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` (constraint name mapped) |
//! | Database (serialization failure, deadlock) | `40001`, `40P01` | `Contention` |
//! | anything else | | `Backend` |
//!
//! ## Runtime
//!
//! [`Tx`] is synchronous; every statement is driven with
//! `Handle::block_on` on the runtime the database was connected from. Call
//! services from a blocking thread (`spawn_blocking`) of a multi-threaded
//! runtime, never from an async task.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use branchledger_core::{AggregateRoot, BranchId, BranchOwned, Decimal, TenantId};
use branchledger_inventory::{
    InventoryTransit, MovementId, MovementKey, MovementReference, Product, ProductId, StockBucket,
    StockMovement, StockTransfer, TransferId, TransferItemId, TransitId, Warehouse, WarehouseId,
};
use branchledger_sync::{ExternalOrder, MappingId, ProductStoreMapping, Store, StoreId, StoreToken};
use branchledger_workflow::{
    WorkflowApproval, WorkflowApprovalId, WorkflowDefinition, WorkflowInstance, WorkflowInstanceId,
};

use super::{check_version, constraints, Database, StorageResult, Tx};
use crate::error::StorageError;

/// Idempotent DDL for every table the services use.
pub const SCHEMA: &str = include_str!("../../schema/stock_core.sql");

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Postgres-backed [`Database`].
#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresDatabase {
    /// Wrap a pool. `handle` must belong to a multi-threaded runtime.
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Connect from inside a tokio runtime; later transactions run on it.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current()))
    }

    /// Create missing tables and indexes.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        debug!("schema applied");
        Ok(())
    }
}

impl Database for PostgresDatabase {
    fn begin(&self) -> StorageResult<Box<dyn Tx + '_>> {
        let tx = self
            .handle
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgTx {
            tx,
            handle: &self.handle,
        }))
    }
}

/// Open transaction. Dropped without commit, sqlx rolls it back.
struct PgTx<'a> {
    tx: Transaction<'static, Postgres>,
    handle: &'a Handle,
}

impl PgTx<'_> {
    fn optional<T: DeserializeOwned>(&mut self, op: &'static str, query: PgQuery<'_>) -> StorageResult<Option<T>> {
        let row = self
            .handle
            .block_on(query.fetch_optional(&mut *self.tx))
            .map_err(|e| map_sqlx_error(op, e))?;
        row.map(|row| doc(op, &row)).transpose()
    }

    fn all<T: DeserializeOwned>(&mut self, op: &'static str, query: PgQuery<'_>) -> StorageResult<Vec<T>> {
        let rows = self
            .handle
            .block_on(query.fetch_all(&mut *self.tx))
            .map_err(|e| map_sqlx_error(op, e))?;
        rows.iter().map(|row| doc(op, row)).collect()
    }

    fn decimal(&mut self, op: &'static str, query: PgQuery<'_>) -> StorageResult<Decimal> {
        let row = self
            .handle
            .block_on(query.fetch_one(&mut *self.tx))
            .map_err(|e| map_sqlx_error(op, e))?;
        row.try_get("total").map_err(|e| map_sqlx_error(op, e))
    }

    fn execute(&mut self, op: &'static str, query: PgQuery<'_>) -> StorageResult<u64> {
        let done = self
            .handle
            .block_on(query.execute(&mut *self.tx))
            .map_err(|e| map_sqlx_error(op, e))?;
        Ok(done.rows_affected())
    }

    /// Run an `UPDATE` that must touch one row.
    fn update_one(&mut self, entity: &'static str, op: &'static str, query: PgQuery<'_>) -> StorageResult<()> {
        match self.execute(op, query)? {
            0 => Err(StorageError::NotFound { entity }),
            _ => Ok(()),
        }
    }

    /// Run a `... WHERE id = $1 AND version = $expected` update. When it
    /// touched nothing, `current` (selecting `version`) tells why.
    fn swap_versioned(
        &mut self,
        entity: &'static str,
        op: &'static str,
        update: PgQuery<'_>,
        current: PgQuery<'_>,
        expected: u64,
    ) -> StorageResult<()> {
        if self.execute(op, update)? == 1 {
            return Ok(());
        }
        let row = self
            .handle
            .block_on(current.fetch_optional(&mut *self.tx))
            .map_err(|e| map_sqlx_error(op, e))?
            .ok_or(StorageError::NotFound { entity })?;
        let actual: i64 = row.try_get("version").map_err(|e| map_sqlx_error(op, e))?;
        check_version(entity, expected, actual as u64)?;
        // same version but no row updated: it changed under us
        Err(StorageError::Contention { operation: op })
    }
}

impl Tx for PgTx<'_> {
    fn product(&mut self, id: ProductId) -> StorageResult<Option<Product>> {
        self.optional(
            "product",
            sqlx::query("SELECT doc FROM products WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn live_product_by_sku(&mut self, branch_id: BranchId, sku: &str) -> StorageResult<Option<Product>> {
        self.optional(
            "live_product_by_sku",
            sqlx::query(
                r#"
                SELECT doc FROM products
                WHERE branch_id = $1 AND sku = $2 AND deleted_at IS NULL
                "#,
            )
            .bind(*branch_id.as_uuid())
            .bind(sku.to_string()),
        )
    }

    fn warehouse(&mut self, id: WarehouseId) -> StorageResult<Option<Warehouse>> {
        self.optional(
            "warehouse",
            sqlx::query("SELECT doc FROM warehouses WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn warehouses(&mut self, tenant_id: TenantId) -> StorageResult<Vec<Warehouse>> {
        self.all(
            "warehouses",
            sqlx::query("SELECT doc FROM warehouses WHERE tenant_id = $1 ORDER BY id")
                .bind(*tenant_id.as_uuid()),
        )
    }

    fn movement(&mut self, id: MovementId) -> StorageResult<Option<StockMovement>> {
        self.optional(
            "movement",
            sqlx::query("SELECT doc FROM stock_movements WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn posted_movement(&mut self, key: &MovementKey) -> StorageResult<Option<StockMovement>> {
        let query = sqlx::query(
            r#"
            SELECT doc FROM stock_movements
            WHERE tenant_id = $1
              AND reference_type = $2
              AND reference_id = $3
              AND product_id = $4
              AND direction = $5
              AND status = 'posted'
            "#,
        )
        .bind(*key.tenant_id.as_uuid())
        .bind(tag(&key.reference.kind)?)
        .bind(key.reference.id.clone())
        .bind(*key.product_id.as_uuid())
        .bind(tag(&key.direction)?);
        self.optional("posted_movement", query)
    }

    fn movements_by_reference(
        &mut self,
        tenant_id: TenantId,
        reference: &MovementReference,
    ) -> StorageResult<Vec<StockMovement>> {
        let query = sqlx::query(
            r#"
            SELECT doc FROM stock_movements
            WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3
            ORDER BY seq
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(tag(&reference.kind)?)
        .bind(reference.id.clone());
        self.all("movements_by_reference", query)
    }

    fn movement_history(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StorageResult<Vec<StockMovement>> {
        self.all(
            "movement_history",
            sqlx::query(
                r#"
                SELECT doc FROM stock_movements
                WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3
                ORDER BY seq
                "#,
            )
            .bind(*tenant_id.as_uuid())
            .bind(*product_id.as_uuid())
            .bind(*warehouse_id.as_uuid()),
        )
    }

    fn stock_level(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        bucket: StockBucket,
    ) -> StorageResult<Decimal> {
        let query = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN direction = 'in' THEN quantity ELSE -quantity END), 0) AS total
            FROM stock_movements
            WHERE product_id = $1 AND warehouse_id = $2 AND bucket = $3 AND status = 'posted'
            "#,
        )
        .bind(*product_id.as_uuid())
        .bind(*warehouse_id.as_uuid())
        .bind(tag(&bucket)?);
        self.decimal("stock_level", query)
    }

    fn lock_stock(&mut self, product_id: ProductId) -> StorageResult<()> {
        self.execute(
            "lock_stock",
            sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE").bind(*product_id.as_uuid()),
        )?;
        Ok(())
    }

    fn ledger_position(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<u64> {
        let row = self
            .handle
            .block_on(
                sqlx::query(
                    r#"
                    SELECT COUNT(*) + COUNT(*) FILTER (WHERE status = 'voided') AS position
                    FROM stock_movements
                    WHERE product_id = $1 AND warehouse_id = $2
                    "#,
                )
                .bind(*product_id.as_uuid())
                .bind(*warehouse_id.as_uuid())
                .fetch_one(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("ledger_position", e))?;
        let position: i64 = row
            .try_get("position")
            .map_err(|e| map_sqlx_error("ledger_position", e))?;
        Ok(position as u64)
    }

    fn transit(&mut self, id: TransitId) -> StorageResult<Option<InventoryTransit>> {
        self.optional(
            "transit",
            sqlx::query("SELECT doc FROM inventory_transits WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn open_transit_for_item(&mut self, item: TransferItemId) -> StorageResult<Option<InventoryTransit>> {
        self.optional(
            "open_transit_for_item",
            sqlx::query(
                "SELECT doc FROM inventory_transits WHERE transfer_item_id = $1 AND status = 'in_transit'",
            )
            .bind(*item.as_uuid()),
        )
    }

    fn in_transit_quantity(&mut self, product_id: ProductId, warehouse_id: WarehouseId) -> StorageResult<Decimal> {
        self.decimal(
            "in_transit_quantity",
            sqlx::query(
                r#"
                SELECT COALESCE(SUM(quantity), 0) AS total
                FROM inventory_transits
                WHERE product_id = $1 AND to_warehouse_id = $2 AND status = 'in_transit'
                "#,
            )
            .bind(*product_id.as_uuid())
            .bind(*warehouse_id.as_uuid()),
        )
    }

    fn transits_for_transfer(&mut self, transfer: TransferId) -> StorageResult<Vec<InventoryTransit>> {
        self.all(
            "transits_for_transfer",
            sqlx::query("SELECT doc FROM inventory_transits WHERE stock_transfer_id = $1 ORDER BY shipped_at")
                .bind(*transfer.as_uuid()),
        )
    }

    fn transfer(&mut self, id: TransferId) -> StorageResult<Option<StockTransfer>> {
        self.optional(
            "transfer",
            sqlx::query("SELECT doc FROM stock_transfers WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn store(&mut self, id: StoreId) -> StorageResult<Option<Store>> {
        self.optional(
            "store",
            sqlx::query("SELECT doc FROM stores WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn store_tokens(&mut self, store: StoreId) -> StorageResult<Vec<StoreToken>> {
        self.all(
            "store_tokens",
            sqlx::query("SELECT doc FROM store_tokens WHERE store_id = $1").bind(*store.as_uuid()),
        )
    }

    fn mapping_by_external(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ProductStoreMapping>> {
        self.optional(
            "mapping_by_external",
            sqlx::query("SELECT doc FROM product_store_mappings WHERE store_id = $1 AND external_id = $2")
                .bind(*store.as_uuid())
                .bind(external_id.to_string()),
        )
    }

    fn mapping_by_external_sku(&mut self, store: StoreId, sku: &str) -> StorageResult<Option<ProductStoreMapping>> {
        self.optional(
            "mapping_by_external_sku",
            sqlx::query(
                "SELECT doc FROM product_store_mappings WHERE store_id = $1 AND external_sku = $2 LIMIT 1",
            )
            .bind(*store.as_uuid())
            .bind(sku.to_string()),
        )
    }

    fn mapping_by_inventory_item(
        &mut self,
        store: StoreId,
        inventory_item_id: &str,
    ) -> StorageResult<Option<ProductStoreMapping>> {
        self.optional(
            "mapping_by_inventory_item",
            sqlx::query("SELECT doc FROM product_store_mappings WHERE store_id = $1 AND inventory_item_id = $2")
                .bind(*store.as_uuid())
                .bind(inventory_item_id.to_string()),
        )
    }

    fn mapping_for_product(&mut self, product: ProductId, store: StoreId) -> StorageResult<Option<ProductStoreMapping>> {
        self.optional(
            "mapping_for_product",
            sqlx::query("SELECT doc FROM product_store_mappings WHERE product_id = $1 AND store_id = $2")
                .bind(*product.as_uuid())
                .bind(*store.as_uuid()),
        )
    }

    fn mappings_for_store(&mut self, store: StoreId) -> StorageResult<Vec<ProductStoreMapping>> {
        self.all(
            "mappings_for_store",
            sqlx::query("SELECT doc FROM product_store_mappings WHERE store_id = $1 ORDER BY external_id")
                .bind(*store.as_uuid()),
        )
    }

    fn external_order(&mut self, store: StoreId, external_id: &str) -> StorageResult<Option<ExternalOrder>> {
        self.optional(
            "external_order",
            sqlx::query("SELECT doc FROM external_orders WHERE store_id = $1 AND external_id = $2")
                .bind(*store.as_uuid())
                .bind(external_id.to_string()),
        )
    }

    fn workflow_definition(
        &mut self,
        tenant_id: TenantId,
        module_name: &str,
        entity_type: &str,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        self.optional(
            "workflow_definition",
            sqlx::query(
                r#"
                SELECT doc FROM workflow_definitions
                WHERE tenant_id = $1 AND module_name = $2 AND entity_type = $3
                "#,
            )
            .bind(*tenant_id.as_uuid())
            .bind(module_name.to_string())
            .bind(entity_type.to_string()),
        )
    }

    fn workflow_instance(&mut self, id: WorkflowInstanceId) -> StorageResult<Option<WorkflowInstance>> {
        self.optional(
            "workflow_instance",
            sqlx::query("SELECT doc FROM workflow_instances WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn workflow_approval(&mut self, id: WorkflowApprovalId) -> StorageResult<Option<WorkflowApproval>> {
        self.optional(
            "workflow_approval",
            sqlx::query("SELECT doc FROM workflow_approvals WHERE id = $1").bind(*id.as_uuid()),
        )
    }

    fn approvals_for_instance(&mut self, instance: WorkflowInstanceId) -> StorageResult<Vec<WorkflowApproval>> {
        self.all(
            "approvals_for_instance",
            sqlx::query("SELECT doc FROM workflow_approvals WHERE instance_id = $1 ORDER BY requested_at")
                .bind(*instance.as_uuid()),
        )
    }

    fn insert_product(&mut self, product: Product) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, branch_id, sku, deleted_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(*product.tenant_id.as_uuid())
        .bind(*product.branch_id.as_uuid())
        .bind(product.sku.clone())
        .bind(product.deleted_at)
        .bind(Json(&product));
        self.execute("insert_product", query)?;
        Ok(())
    }

    fn update_product(&mut self, product: Product) -> StorageResult<()> {
        let query = sqlx::query("UPDATE products SET sku = $2, deleted_at = $3, doc = $4 WHERE id = $1")
            .bind(*product.id.as_uuid())
            .bind(product.sku.clone())
            .bind(product.deleted_at)
            .bind(Json(&product));
        self.update_one("product", "update_product", query)
    }

    fn insert_warehouse(&mut self, warehouse: Warehouse) -> StorageResult<()> {
        let query = sqlx::query("INSERT INTO warehouses (id, tenant_id, branch_id, doc) VALUES ($1, $2, $3, $4)")
            .bind(*warehouse.id.as_uuid())
            .bind(*warehouse.tenant_id.as_uuid())
            .bind(*warehouse.branch_id.as_uuid())
            .bind(Json(&warehouse));
        self.execute("insert_warehouse", query)?;
        Ok(())
    }

    fn insert_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, tenant_id, product_id, warehouse_id, branch_id, direction,
                bucket, quantity, reference_type, reference_id, status, doc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(*movement.id.as_uuid())
        .bind(*movement.tenant_id.as_uuid())
        .bind(*movement.product_id.as_uuid())
        .bind(*movement.warehouse_id.as_uuid())
        .bind(*movement.branch_id.as_uuid())
        .bind(tag(&movement.direction)?)
        .bind(tag(&movement.bucket)?)
        .bind(movement.quantity.value())
        .bind(tag(&movement.reference.kind)?)
        .bind(movement.reference.id.clone())
        .bind(tag(&movement.status)?)
        .bind(Json(&movement));
        self.execute("insert_movement", query)?;
        Ok(())
    }

    fn update_movement(&mut self, movement: StockMovement) -> StorageResult<()> {
        let query = sqlx::query("UPDATE stock_movements SET status = $2, doc = $3 WHERE id = $1")
            .bind(*movement.id.as_uuid())
            .bind(tag(&movement.status)?)
            .bind(Json(&movement));
        self.update_one("stock movement", "update_movement", query)
    }

    fn insert_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO inventory_transits (
                id, tenant_id, stock_transfer_id, transfer_item_id, product_id,
                to_warehouse_id, status, quantity, shipped_at, doc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*transit.id.as_uuid())
        .bind(*transit.tenant_id.as_uuid())
        .bind(*transit.stock_transfer_id.as_uuid())
        .bind(*transit.transfer_item_id.as_uuid())
        .bind(*transit.product_id.as_uuid())
        .bind(*transit.to_warehouse_id.as_uuid())
        .bind(tag(&transit.status)?)
        .bind(transit.quantity.value())
        .bind(transit.shipped_at)
        .bind(Json(&transit));
        self.execute("insert_transit", query)?;
        Ok(())
    }

    fn update_transit(&mut self, transit: InventoryTransit) -> StorageResult<()> {
        let query = sqlx::query("UPDATE inventory_transits SET status = $2, doc = $3 WHERE id = $1")
            .bind(*transit.id.as_uuid())
            .bind(tag(&transit.status)?)
            .bind(Json(&transit));
        self.update_one("inventory transit", "update_transit", query)
    }

    fn insert_transfer(&mut self, transfer: StockTransfer) -> StorageResult<()> {
        let query = sqlx::query(
            "INSERT INTO stock_transfers (id, tenant_id, branch_id, version, doc) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(*transfer.id_typed().as_uuid())
        .bind(*transfer.tenant_id().as_uuid())
        .bind(*transfer.branch_id().as_uuid())
        .bind(transfer.version() as i64)
        .bind(Json(&transfer));
        self.execute("insert_transfer", query)?;
        Ok(())
    }

    fn update_transfer(&mut self, transfer: StockTransfer, expected_version: u64) -> StorageResult<()> {
        let id = *transfer.id_typed().as_uuid();
        let update = sqlx::query("UPDATE stock_transfers SET version = $2, doc = $3 WHERE id = $1 AND version = $4")
            .bind(id)
            .bind(transfer.version() as i64)
            .bind(Json(&transfer))
            .bind(expected_version as i64);
        let current = sqlx::query("SELECT version FROM stock_transfers WHERE id = $1").bind(id);
        self.swap_versioned("stock transfer", "update_transfer", update, current, expected_version)
    }

    fn insert_store(&mut self, store: Store) -> StorageResult<()> {
        let query = sqlx::query("INSERT INTO stores (id, tenant_id, branch_id, doc) VALUES ($1, $2, $3, $4)")
            .bind(*store.id.as_uuid())
            .bind(*store.tenant_id.as_uuid())
            .bind(*store.branch_id.as_uuid())
            .bind(Json(&store));
        self.execute("insert_store", query)?;
        Ok(())
    }

    fn update_store(&mut self, store: Store) -> StorageResult<()> {
        let query = sqlx::query("UPDATE stores SET doc = $2 WHERE id = $1")
            .bind(*store.id.as_uuid())
            .bind(Json(&store));
        self.update_one("store", "update_store", query)
    }

    fn insert_store_token(&mut self, token: StoreToken) -> StorageResult<()> {
        let query = sqlx::query("INSERT INTO store_tokens (id, store_id, doc) VALUES ($1, $2, $3)")
            .bind(*token.id.as_uuid())
            .bind(*token.store_id.as_uuid())
            .bind(Json(&token));
        self.execute("insert_store_token", query)?;
        Ok(())
    }

    fn insert_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO product_store_mappings (
                id, tenant_id, product_id, store_id, external_id, external_sku, inventory_item_id, doc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*mapping.id.as_uuid())
        .bind(*mapping.tenant_id.as_uuid())
        .bind(*mapping.product_id.as_uuid())
        .bind(*mapping.store_id.as_uuid())
        .bind(mapping.external_id.clone())
        .bind(mapping.external_sku.clone())
        .bind(mapping.inventory_item_id.clone())
        .bind(Json(&mapping));
        self.execute("insert_mapping", query)?;
        Ok(())
    }

    fn update_mapping(&mut self, mapping: ProductStoreMapping) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            UPDATE product_store_mappings
            SET external_id = $2, external_sku = $3, inventory_item_id = $4, doc = $5
            WHERE id = $1
            "#,
        )
        .bind(*mapping.id.as_uuid())
        .bind(mapping.external_id.clone())
        .bind(mapping.external_sku.clone())
        .bind(mapping.inventory_item_id.clone())
        .bind(Json(&mapping));
        self.update_one("product mapping", "update_mapping", query)
    }

    fn delete_mapping(&mut self, id: MappingId) -> StorageResult<ProductStoreMapping> {
        self.optional(
            "delete_mapping",
            sqlx::query("DELETE FROM product_store_mappings WHERE id = $1 RETURNING doc").bind(*id.as_uuid()),
        )?
        .ok_or(StorageError::NotFound { entity: "product mapping" })
    }

    fn insert_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        let query = sqlx::query("INSERT INTO external_orders (id, store_id, external_id, doc) VALUES ($1, $2, $3, $4)")
            .bind(*order.id.as_uuid())
            .bind(*order.store_id.as_uuid())
            .bind(order.external_id.clone())
            .bind(Json(&order));
        self.execute("insert_external_order", query)?;
        Ok(())
    }

    fn update_external_order(&mut self, order: ExternalOrder) -> StorageResult<()> {
        let query = sqlx::query("UPDATE external_orders SET doc = $3 WHERE store_id = $1 AND external_id = $2")
            .bind(*order.store_id.as_uuid())
            .bind(order.external_id.clone())
            .bind(Json(&order));
        self.update_one("external order", "update_external_order", query)
    }

    fn insert_workflow_definition(&mut self, definition: WorkflowDefinition) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, tenant_id, module_name, entity_type, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*definition.id.as_uuid())
        .bind(*definition.tenant_id.as_uuid())
        .bind(definition.module_name.clone())
        .bind(definition.entity_type.clone())
        .bind(Json(&definition));
        self.execute("insert_workflow_definition", query)?;
        Ok(())
    }

    fn insert_workflow_instance(&mut self, instance: WorkflowInstance) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, tenant_id, entity_type, entity_id, status, version, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*instance.id_typed().as_uuid())
        .bind(*instance.tenant_id().as_uuid())
        .bind(instance.entity_type().to_string())
        .bind(instance.entity_id().to_string())
        .bind(tag(&instance.status())?)
        .bind(instance.version() as i64)
        .bind(Json(&instance));
        self.execute("insert_workflow_instance", query)?;
        Ok(())
    }

    fn update_workflow_instance(&mut self, instance: WorkflowInstance, expected_version: u64) -> StorageResult<()> {
        let id = *instance.id_typed().as_uuid();
        let update = sqlx::query(
            "UPDATE workflow_instances SET status = $2, version = $3, doc = $4 WHERE id = $1 AND version = $5",
        )
        .bind(id)
        .bind(tag(&instance.status())?)
        .bind(instance.version() as i64)
        .bind(Json(&instance))
        .bind(expected_version as i64);
        let current = sqlx::query("SELECT version FROM workflow_instances WHERE id = $1").bind(id);
        self.swap_versioned("workflow instance", "update_workflow_instance", update, current, expected_version)
    }

    fn insert_workflow_approval(&mut self, approval: WorkflowApproval) -> StorageResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO workflow_approvals (id, instance_id, requested_at, version, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(*approval.id.as_uuid())
        .bind(*approval.instance_id.as_uuid())
        .bind(approval.requested_at)
        .bind(approval.version as i64)
        .bind(Json(&approval));
        self.execute("insert_workflow_approval", query)?;
        Ok(())
    }

    fn update_workflow_approval(&mut self, approval: WorkflowApproval, expected_version: u64) -> StorageResult<()> {
        let id = *approval.id.as_uuid();
        let update = sqlx::query("UPDATE workflow_approvals SET version = $2, doc = $3 WHERE id = $1 AND version = $4")
            .bind(id)
            .bind(approval.version as i64)
            .bind(Json(&approval))
            .bind(expected_version as i64);
        let current = sqlx::query("SELECT version FROM workflow_approvals WHERE id = $1").bind(id);
        self.swap_versioned("workflow approval", "update_workflow_approval", update, current, expected_version)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let PgTx { tx, handle } = *self;
        handle
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn doc<T: DeserializeOwned>(op: &'static str, row: &PgRow) -> StorageResult<T> {
    let Json(value) = row.try_get::<Json<T>, _>("doc").map_err(|e| map_sqlx_error(op, e))?;
    Ok(value)
}

/// Serde name of a unit enum variant, as stored in the tag columns.
fn tag<T: Serialize>(value: &T) -> StorageResult<String> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        Ok(other) => Err(StorageError::Backend {
            operation: "encode_tag",
            message: format!("expected a string tag, got {other}"),
        }),
        Err(e) => Err(StorageError::Backend {
            operation: "encode_tag",
            message: e.to_string(),
        }),
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return StorageError::UniqueViolation {
                    constraint: constraints::named(db_err.constraint()),
                };
            }
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => StorageError::Contention { operation },
                _ => StorageError::Backend {
                    operation,
                    message: db_err.message().to_string(),
                },
            }
        }
        other => StorageError::Backend {
            operation,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    //! Run against a live database when `BRANCHLEDGER_TEST_DATABASE_URL` is
    //! set; otherwise each test returns immediately.

    use super::*;
    use branchledger_core::{Money, UserId};
    use branchledger_inventory::{MovementDirection, NewMovement, ReferenceType};
    use branchledger_workflow::Decision;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::storage::unique;

    fn connect() -> Option<(tokio::runtime::Runtime, Box<dyn Database>)> {
        let url = std::env::var("BRANCHLEDGER_TEST_DATABASE_URL").ok()?;
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let db = rt.block_on(async {
            let db = PostgresDatabase::connect(&url, 4).await.expect("connect");
            db.migrate().await.expect("migrate");
            db
        });
        Some((rt, Box::new(db)))
    }

    fn movement(product: &Product, warehouse: WarehouseId, direction: MovementDirection, qty: Decimal, reference: &str) -> StockMovement {
        NewMovement {
            tenant_id: product.tenant_id,
            product_id: product.id,
            warehouse_id: warehouse,
            branch_id: product.branch_id,
            direction,
            bucket: StockBucket::Sellable,
            quantity: qty,
            reference: MovementReference::new(ReferenceType::Purchase, reference),
            created_by: UserId::new(),
            note: None,
        }
        .into_posted(Utc::now())
        .unwrap()
    }

    #[test]
    fn stock_level_and_posted_key_follow_the_ledger() {
        let Some((_rt, db)) = connect() else { return };
        let product = Product::new(TenantId::new(), BranchId::new(), "PG-1", "Thing", Money::ZERO, Utc::now());
        let warehouse = Warehouse::new(product.tenant_id, product.branch_id, "Main");
        let first = movement(&product, warehouse.id, MovementDirection::In, dec!(10), "PO-1");

        db.transaction(|tx| -> StorageResult<()> {
            tx.insert_product(product.clone())?;
            tx.insert_warehouse(warehouse.clone())?;
            tx.insert_movement(first.clone())?;
            tx.insert_movement(movement(&product, warehouse.id, MovementDirection::Out, dec!(3), "SO-1"))
        })
        .unwrap();

        assert_eq!(
            db.read(|t| t.stock_level(product.id, warehouse.id, StockBucket::Sellable)),
            Ok(dec!(7))
        );
        assert_eq!(
            db.transaction(|tx| tx.insert_movement(movement(&product, warehouse.id, MovementDirection::In, dec!(1), "PO-1"))),
            Err(unique(constraints::MOVEMENT_POSTED_REFERENCE))
        );
        assert_eq!(
            db.read(|t| t.posted_movement(&first.key())).unwrap().map(|m| m.id),
            Some(first.id)
        );
    }

    #[test]
    fn rolled_back_transactions_write_nothing() {
        let Some((_rt, db)) = connect() else { return };
        let product = Product::new(TenantId::new(), BranchId::new(), "PG-2", "Thing", Money::ZERO, Utc::now());
        let id = product.id;

        let res: StorageResult<()> = db.transaction(|tx| {
            tx.insert_product(product)?;
            Err(StorageError::NotFound { entity: "anything" })
        });
        assert!(res.is_err());
        assert_eq!(db.read(|t| t.product(id)), Ok(None));
    }

    #[test]
    fn versioned_updates_reject_stale_writers() {
        let Some((_rt, db)) = connect() else { return };
        let approval = WorkflowApproval::pending(
            WorkflowApprovalId::new(),
            WorkflowInstanceId::new(),
            BranchId::new(),
            "review".to_string(),
            None,
            Utc::now(),
        );
        db.transaction(|tx| tx.insert_workflow_approval(approval.clone())).unwrap();

        let mut decided = approval.clone();
        decided.record(Decision::Approve, UserId::new(), None, Utc::now());
        db.transaction(|tx| tx.update_workflow_approval(decided.clone(), approval.version))
            .unwrap();

        assert!(matches!(
            db.transaction(|tx| tx.update_workflow_approval(decided.clone(), approval.version)),
            Err(StorageError::StaleVersion { .. })
        ));
    }
}
