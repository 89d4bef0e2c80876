//! Orders placed in an external store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{typed_id, BranchId, BranchOwned, Entity, TenantId};

use crate::payload::ExternalOrderLine;
use crate::store::StoreId;

typed_id!(ExternalOrderId, "ExternalOrderId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalOrderStatus {
    Open,
    Completed,
    Cancelled,
    Refunded,
}

impl ExternalOrderStatus {
    /// Normalize a platform status string. Unknown values count as open.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cancelled" | "canceled" | "voided" | "failed" | "trash" => ExternalOrderStatus::Cancelled,
            "refunded" => ExternalOrderStatus::Refunded,
            "completed" | "complete" | "fulfilled" | "paid" => ExternalOrderStatus::Completed,
            _ => ExternalOrderStatus::Open,
        }
    }

    /// Cancelled and refunded orders give their stock back.
    pub fn releases_stock(self) -> bool {
        matches!(self, ExternalOrderStatus::Cancelled | ExternalOrderStatus::Refunded)
    }
}

/// Local record of an ingested order; stock was taken from the store's
/// fulfilment warehouse under reference `external-order:<external_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOrder {
    pub id: ExternalOrderId,
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub store_id: StoreId,
    pub external_id: String,
    pub status: ExternalOrderStatus,
    pub lines: Vec<ExternalOrderLine>,
    /// Set once the order's outbound movements were voided.
    pub stock_released: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for ExternalOrder {
    type Id = ExternalOrderId;

    fn id(&self) -> &ExternalOrderId {
        &self.id
    }
}

impl BranchOwned for ExternalOrder {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization() {
        assert_eq!(ExternalOrderStatus::parse("Canceled"), ExternalOrderStatus::Cancelled);
        assert_eq!(ExternalOrderStatus::parse("refunded"), ExternalOrderStatus::Refunded);
        assert_eq!(ExternalOrderStatus::parse("processing"), ExternalOrderStatus::Open);
        assert!(ExternalOrderStatus::Refunded.releases_stock());
        assert!(!ExternalOrderStatus::Completed.releases_stock());
    }
}
