use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Capability identifier (e.g. "transfer.ship").
///
/// The wildcard `"*"` grants everything and is what system actors carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities checked by the stock core before each mutation.
pub mod capabilities {
    use super::Permission;

    pub const INVENTORY_READ: Permission = Permission::from_static("inventory.read");
    pub const INVENTORY_ADJUST: Permission = Permission::from_static("inventory.adjust");
    pub const INVENTORY_VOID: Permission = Permission::from_static("inventory.void");

    /// Sales and customer returns posted against the ledger.
    pub const SALES_POST: Permission = Permission::from_static("sales.post");
    /// Goods receipts and returns to suppliers.
    pub const PURCHASES_POST: Permission = Permission::from_static("purchases.post");

    pub const TRANSFER_CREATE: Permission = Permission::from_static("transfer.create");
    pub const TRANSFER_APPROVE: Permission = Permission::from_static("transfer.approve");
    pub const TRANSFER_SHIP: Permission = Permission::from_static("transfer.ship");
    pub const TRANSFER_RECEIVE: Permission = Permission::from_static("transfer.receive");
    pub const TRANSFER_CANCEL: Permission = Permission::from_static("transfer.cancel");

    pub const WORKFLOW_START: Permission = Permission::from_static("workflow.start");
    pub const WORKFLOW_DECIDE: Permission = Permission::from_static("workflow.decide");
    pub const WORKFLOW_DEFINE: Permission = Permission::from_static("workflow.define");

    pub const STORE_MANAGE: Permission = Permission::from_static("store.manage");
    pub const CATALOG_MANAGE: Permission = Permission::from_static("catalog.manage");
}
