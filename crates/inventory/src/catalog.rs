//! Products and warehouses referenced by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{typed_id, BranchId, BranchOwned, Entity, Money, TenantId};

typed_id!(ProductId, "ProductId");
typed_id!(WarehouseId, "WarehouseId");

/// A sellable product.
///
/// SKUs are unique per branch among rows that are not soft-deleted, so a new
/// product may reuse the SKU of a deleted one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn new(
        tenant_id: TenantId,
        branch_id: BranchId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProductId::new(),
            tenant_id,
            branch_id,
            sku: sku.into(),
            name: name.into(),
            price,
            is_active: true,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    /// Active and not soft-deleted.
    pub fn is_available(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &ProductId {
        &self.id
    }
}

impl BranchOwned for Product {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub name: String,
    pub is_active: bool,
}

impl Warehouse {
    pub fn new(tenant_id: TenantId, branch_id: BranchId, name: impl Into<String>) -> Self {
        Self {
            id: WarehouseId::new(),
            tenant_id,
            branch_id,
            name: name.into(),
            is_active: true,
        }
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &WarehouseId {
        &self.id
    }
}

impl BranchOwned for Warehouse {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}
