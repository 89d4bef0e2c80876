//! External store integration: stores, product mappings, webhook
//! authentication and payload normalization for each supported platform.
//!
//! Everything here is pure. The infrastructure crate's `StoreSyncService`
//! applies the normalized events to the catalog and the ledger.

pub mod events;
pub mod mapping;
pub mod order;
pub mod payload;
pub mod signature;
pub mod store;
pub mod topic;

pub use events::StoreSyncEvent;
pub use mapping::{MappingId, ProductStoreMapping};
pub use order::{ExternalOrder, ExternalOrderId, ExternalOrderStatus};
pub use payload::{
    parse_webhook, ExternalIdKind, ExternalOrderLine, ExternalOrderPayload, ExternalProduct,
    InventoryLevel, WebhookEvent,
};
pub use signature::{body_digest, sign, verify_signature};
pub use store::{Store, StoreId, StoreKind, StoreToken, StoreTokenId};
pub use topic::{resolve_topic, SyncTopic};
