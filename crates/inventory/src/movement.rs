//! Stock movements: the immutable facts the ledger is made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{
    typed_id, BranchId, BranchOwned, Decimal, DomainError, DomainResult, Entity, Quantity,
    TenantId, UserId,
};

use crate::catalog::{ProductId, WarehouseId};

typed_id!(MovementId, "MovementId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    In,
    Out,
}

impl MovementDirection {
    pub fn opposite(self) -> Self {
        match self {
            MovementDirection::In => MovementDirection::Out,
            MovementDirection::Out => MovementDirection::In,
        }
    }
}

/// Only `posted` movements count toward stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Posted,
    Voided,
}

/// Which pool of stock a movement affects at its warehouse.
///
/// Damaged goods stay visible in the ledger but never count as sellable.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockBucket {
    #[default]
    Sellable,
    Damaged,
}

/// The business event that caused a movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    Opening,
    Sale,
    SaleReturn,
    Purchase,
    PurchaseReturn,
    Adjustment,
    TransferShip,
    TransferReceive,
    TransferDamaged,
    TransferCancel,
    ExternalOrder,
    ExternalInventorySync,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceType::Opening => "opening",
            ReferenceType::Sale => "sale",
            ReferenceType::SaleReturn => "sale-return",
            ReferenceType::Purchase => "purchase",
            ReferenceType::PurchaseReturn => "purchase-return",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::TransferShip => "transfer-ship",
            ReferenceType::TransferReceive => "transfer-receive",
            ReferenceType::TransferDamaged => "transfer-damaged",
            ReferenceType::TransferCancel => "transfer-cancel",
            ReferenceType::ExternalOrder => "external-order",
            ReferenceType::ExternalInventorySync => "external-inventory-sync",
        }
    }
}

impl core::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(reference_type, reference_id)` pair pointing at the source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceType,
    pub id: String,
}

impl MovementReference {
    pub fn new(kind: ReferenceType, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl core::fmt::Display for MovementReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Idempotency key. At most one posted movement exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MovementKey {
    pub tenant_id: TenantId,
    pub reference: MovementReference,
    pub product_id: ProductId,
    pub direction: MovementDirection,
}

/// A movement as submitted, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub branch_id: BranchId,
    pub direction: MovementDirection,
    pub bucket: StockBucket,
    pub quantity: Decimal,
    pub reference: MovementReference,
    pub created_by: UserId,
    pub note: Option<String>,
}

impl NewMovement {
    pub fn key(&self) -> MovementKey {
        MovementKey {
            tenant_id: self.tenant_id,
            reference: self.reference.clone(),
            product_id: self.product_id,
            direction: self.direction,
        }
    }

    /// Validate and turn into a posted movement.
    pub fn into_posted(self, at: DateTime<Utc>) -> DomainResult<StockMovement> {
        let quantity = Quantity::positive(self.quantity)?;
        if self.reference.id.trim().is_empty() {
            return Err(DomainError::validation("reference id cannot be empty"));
        }

        Ok(StockMovement {
            id: MovementId::new(),
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            branch_id: self.branch_id,
            direction: self.direction,
            bucket: self.bucket,
            quantity,
            reference: self.reference,
            status: MovementStatus::Posted,
            created_by: self.created_by,
            created_at: at,
            note: self.note,
            voided_at: None,
            voided_by: None,
            void_reason: None,
        })
    }
}

/// Immutable ledger row. Only `status` (and the void audit fields) ever change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub branch_id: BranchId,
    pub direction: MovementDirection,
    pub bucket: StockBucket,
    pub quantity: Quantity,
    pub reference: MovementReference,
    pub status: MovementStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<UserId>,
    pub void_reason: Option<String>,
}

impl StockMovement {
    pub fn key(&self) -> MovementKey {
        MovementKey {
            tenant_id: self.tenant_id,
            reference: self.reference.clone(),
            product_id: self.product_id,
            direction: self.direction,
        }
    }

    pub fn is_posted(&self) -> bool {
        self.status == MovementStatus::Posted
    }

    /// `+quantity` for `in`, `-quantity` for `out`.
    pub fn signed_quantity(&self) -> Decimal {
        match self.direction {
            MovementDirection::In => self.quantity.value(),
            MovementDirection::Out => -self.quantity.value(),
        }
    }

    /// Soft-cancel. Returns `false` if the movement was already voided.
    pub fn void(&mut self, by: UserId, reason: impl Into<String>, at: DateTime<Utc>) -> bool {
        if !self.is_posted() {
            return false;
        }
        self.status = MovementStatus::Voided;
        self.voided_at = Some(at);
        self.voided_by = Some(by);
        self.void_reason = Some(reason.into());
        true
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &MovementId {
        &self.id
    }
}

impl BranchOwned for StockMovement {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_movement(qty: Decimal) -> NewMovement {
        NewMovement {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            branch_id: BranchId::new(),
            direction: MovementDirection::Out,
            bucket: StockBucket::Sellable,
            quantity: qty,
            reference: MovementReference::new(ReferenceType::Sale, "SO-1"),
            created_by: UserId::new(),
            note: None,
        }
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        for qty in [dec!(0), dec!(-3)] {
            assert!(matches!(
                new_movement(qty).into_posted(Utc::now()),
                Err(DomainError::InvalidQuantity(_))
            ));
        }
    }

    #[test]
    fn direction_encodes_sign() {
        let m = new_movement(dec!(4)).into_posted(Utc::now()).unwrap();
        assert_eq!(m.signed_quantity(), dec!(-4));
        assert_eq!(m.key().direction, MovementDirection::Out);
    }

    #[test]
    fn voiding_is_one_way() {
        let mut m = new_movement(dec!(1)).into_posted(Utc::now()).unwrap();
        let who = UserId::new();
        assert!(m.void(who, "entered twice", Utc::now()));
        assert!(!m.void(who, "again", Utc::now()));
        assert_eq!(m.status, MovementStatus::Voided);
        assert_eq!(m.void_reason.as_deref(), Some("entered twice"));
    }

    #[test]
    fn reference_types_serialize_kebab_case() {
        let json = serde_json::to_string(&ReferenceType::TransferShip).unwrap();
        assert_eq!(json, "\"transfer-ship\"");
        assert_eq!(ReferenceType::TransferShip.as_str(), "transfer-ship");
    }
}
