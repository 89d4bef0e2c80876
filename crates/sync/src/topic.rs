//! Mapping platform topics onto the five sync handlers.

use serde::{Deserialize, Serialize};

use crate::store::StoreKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTopic {
    ProductUpsert,
    ProductDelete,
    OrderCreate,
    OrderUpdate,
    InventoryUpdate,
}

impl StoreKind {
    /// Header naming the topic, for platforms that send one.
    pub fn topic_header(self) -> Option<&'static str> {
        match self {
            StoreKind::Shopify => Some("X-Shopify-Topic"),
            StoreKind::WooCommerce => Some("X-WC-Webhook-Topic"),
            StoreKind::Laravel | StoreKind::Custom => None,
        }
    }
}

/// Resolve a platform topic string. `None` for topics this core ignores.
///
/// For generic stores `topic` is the body's `event` field.
pub fn resolve_topic(kind: StoreKind, topic: &str) -> Option<SyncTopic> {
    let topic = topic.trim();
    match kind {
        StoreKind::Shopify => match topic {
            "products/create" | "products/update" => Some(SyncTopic::ProductUpsert),
            "products/delete" => Some(SyncTopic::ProductDelete),
            "orders/create" => Some(SyncTopic::OrderCreate),
            "orders/updated" => Some(SyncTopic::OrderUpdate),
            "inventory_levels/update" => Some(SyncTopic::InventoryUpdate),
            _ => None,
        },
        StoreKind::WooCommerce => match topic {
            "product.created" | "product.updated" => Some(SyncTopic::ProductUpsert),
            "product.deleted" => Some(SyncTopic::ProductDelete),
            "order.created" => Some(SyncTopic::OrderCreate),
            "order.updated" => Some(SyncTopic::OrderUpdate),
            _ => None,
        },
        StoreKind::Laravel | StoreKind::Custom => match topic {
            "product.created" | "product.updated" => Some(SyncTopic::ProductUpsert),
            "product.deleted" => Some(SyncTopic::ProductDelete),
            "order.created" => Some(SyncTopic::OrderCreate),
            "order.updated" => Some(SyncTopic::OrderUpdate),
            "inventory.updated" => Some(SyncTopic::InventoryUpdate),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shopify_topics() {
        assert_eq!(
            resolve_topic(StoreKind::Shopify, "products/update"),
            Some(SyncTopic::ProductUpsert)
        );
        assert_eq!(
            resolve_topic(StoreKind::Shopify, "inventory_levels/update"),
            Some(SyncTopic::InventoryUpdate)
        );
        assert_eq!(resolve_topic(StoreKind::Shopify, "orders/updated"), Some(SyncTopic::OrderUpdate));
        assert_eq!(resolve_topic(StoreKind::Shopify, "carts/create"), None);
    }

    #[test]
    fn woocommerce_has_no_inventory_topic() {
        assert_eq!(resolve_topic(StoreKind::WooCommerce, "inventory.updated"), None);
        assert_eq!(
            resolve_topic(StoreKind::WooCommerce, "product.deleted"),
            Some(SyncTopic::ProductDelete)
        );
    }

    #[test]
    fn generic_events() {
        assert_eq!(
            resolve_topic(StoreKind::Custom, "inventory.updated"),
            Some(SyncTopic::InventoryUpdate)
        );
        assert_eq!(resolve_topic(StoreKind::Laravel, "order.created"), Some(SyncTopic::OrderCreate));
    }
}
