//! Application services. Each call authorizes the actor, runs in one
//! storage transaction, and publishes its events only after commit.

pub mod catalog;
pub mod ledger;
pub mod sync;
pub mod transfer;
pub mod transit;
pub mod workflow;

pub use catalog::{CatalogService, ProductRequest};
pub use ledger::{MovementReceipt, MovementRequest, StockLedger, WarehouseStock};
pub use sync::{Cancellation, StoreRequest, StoreSyncService, WebhookOutcome, WebhookRequest};
pub use transfer::{TransferRequest, TransferService};
pub use transit::TransitTracker;
pub use workflow::WorkflowService;
