//! Product and warehouse registry.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use branchledger_auth::{capabilities, Actor, EntityKind};
use branchledger_core::{BranchId, DomainError, Money};
use branchledger_inventory::{Product, ProductId, Warehouse};

use crate::context::{permit, CoreContext};
use crate::error::{ServiceError, ServiceResult, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub branch_id: BranchId,
    pub sku: String,
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone)]
pub struct CatalogService {
    ctx: CoreContext,
}

impl CatalogService {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, actor, name), fields(tenant_id = %actor.tenant_id))]
    pub fn register_warehouse(
        &self,
        actor: &Actor,
        branch_id: BranchId,
        name: &str,
    ) -> ServiceResult<Warehouse> {
        permit(actor, &capabilities::CATALOG_MANAGE, actor.tenant_id)?;
        self.ctx.scope(actor).ensure_write(branch_id)?;
        if name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty").into());
        }

        let warehouse = Warehouse::new(actor.tenant_id, branch_id, name.trim());
        self.ctx
            .db()
            .transaction(|tx| tx.insert_warehouse(warehouse.clone()))?;
        info!(warehouse_id = %warehouse.id, "warehouse registered");
        Ok(warehouse)
    }

    /// SKUs are unique per branch among live products.
    #[instrument(skip(self, actor, request), fields(tenant_id = %actor.tenant_id, sku = %request.sku))]
    pub fn create_product(&self, actor: &Actor, request: ProductRequest) -> ServiceResult<Product> {
        permit(actor, &capabilities::CATALOG_MANAGE, actor.tenant_id)?;
        self.ctx.scope(actor).ensure_write(request.branch_id)?;
        if request.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty").into());
        }
        if request.price.is_negative() {
            return Err(DomainError::validation("price cannot be negative").into());
        }

        let product = Product::new(
            actor.tenant_id,
            request.branch_id,
            request.sku.trim(),
            request.name,
            request.price,
            Utc::now(),
        );
        self.ctx
            .db()
            .transaction(|tx| tx.insert_product(product.clone()))
            .map_err(sku_conflict)?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// Soft delete; the SKU becomes free for a new product.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub fn delete_product(&self, actor: &Actor, product_id: ProductId) -> ServiceResult<Product> {
        permit(actor, &capabilities::CATALOG_MANAGE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);

        self.ctx.db().transaction(|tx| -> ServiceResult<Product> {
            let mut product = tx
                .product(product_id)?
                .filter(|p| p.tenant_id == actor.tenant_id)
                .ok_or(StorageError::NotFound { entity: "product" })?;
            scope.ensure_write(product.branch_id)?;
            if product.deleted_at.is_none() {
                product.soft_delete(Utc::now());
                tx.update_product(product.clone())?;
            }
            Ok(product)
        })
    }

    pub fn get_product(&self, actor: &Actor, product_id: ProductId) -> ServiceResult<Product> {
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Product> {
            let product = t
                .product(product_id)?
                .filter(|p| p.tenant_id == actor.tenant_id)
                .ok_or(StorageError::NotFound { entity: "product" })?;
            scope.ensure_read(EntityKind::Product, &product)?;
            Ok(product)
        })
    }
}

fn sku_conflict(err: StorageError) -> ServiceError {
    match err {
        StorageError::UniqueViolation { .. } => DomainError::conflict("sku already in use in this branch").into(),
        other => other.into(),
    }
}
