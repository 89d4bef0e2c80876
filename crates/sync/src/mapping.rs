use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{typed_id, BranchId, BranchOwned, Entity, TenantId};
use branchledger_inventory::ProductId;

use crate::store::StoreId;

typed_id!(MappingId, "MappingId");

/// Link between a local product and its listing in one external store.
///
/// Unique on `(product_id, store_id)`, on `(store_id, external_id)` and on
/// `(store_id, inventory_item_id)` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStoreMapping {
    pub id: MappingId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub external_id: String,
    pub external_sku: Option<String>,
    /// Key the platform's inventory webhooks use for this listing.
    #[serde(default)]
    pub inventory_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductStoreMapping {
    pub fn new(
        tenant_id: TenantId,
        branch_id: BranchId,
        product_id: ProductId,
        store_id: StoreId,
        external_id: impl Into<String>,
        external_sku: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MappingId::new(),
            tenant_id,
            branch_id,
            product_id,
            store_id,
            external_id: external_id.into(),
            external_sku,
            inventory_item_id: None,
            created_at: at,
            updated_at: at,
        }
    }
}

impl Entity for ProductStoreMapping {
    type Id = MappingId;

    fn id(&self) -> &MappingId {
        &self.id
    }
}

impl BranchOwned for ProductStoreMapping {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}
