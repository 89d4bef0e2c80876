//! Inventory domain: stock ledger model, in-transit tracking and the stock
//! transfer state machine.
//!
//! Pure, deterministic domain logic (no IO, no storage). The infrastructure
//! crate persists these types and drives the side effects transfer events
//! call for.

pub mod catalog;
pub mod ledger;
pub mod movement;
pub mod transfer;
pub mod transit;

pub use catalog::{Product, ProductId, Warehouse, WarehouseId};
pub use ledger::{ensure_available, on_hand, InventoryEvent, MovementRecorded, MovementVoided, PolicyConfig};
pub use movement::{
    MovementDirection, MovementId, MovementKey, MovementReference, MovementStatus, NewMovement,
    ReferenceType, StockBucket, StockMovement,
};
pub use transfer::{
    CreateTransfer, ItemReceipt, NewTransferItem, ShipmentMeta, StockTransfer, StockTransferItem,
    TransferCommand, TransferEvent, TransferId, TransferItemId, TransferStatus,
};
pub use transit::{InventoryTransit, TransitId, TransitStatus, TransitSummary};
