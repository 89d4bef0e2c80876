//! Normalized webhook payloads.
//!
//! Each platform's JSON is parsed into the same handful of types so the sync
//! service never branches on platform.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use branchledger_core::{Decimal, DomainError, DomainResult, Money};

use crate::order::ExternalOrderStatus;
use crate::store::StoreKind;
use crate::topic::{resolve_topic, SyncTopic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProduct {
    pub external_id: String,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub is_active: bool,
    /// Platform id of the stock-tracked item, when the platform keys
    /// inventory updates by something other than the product id.
    pub inventory_item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOrderLine {
    pub external_product_id: Option<String>,
    pub sku: Option<String>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOrderPayload {
    pub external_id: String,
    pub status: ExternalOrderStatus,
    pub lines: Vec<ExternalOrderLine>,
}

/// Which platform id an inventory update carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalIdKind {
    Product,
    InventoryItem,
}

/// Absolute available quantity reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub external_id: String,
    pub keyed_by: ExternalIdKind,
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    ProductUpsert(ExternalProduct),
    ProductDelete { external_id: String },
    OrderCreate(ExternalOrderPayload),
    OrderUpdate(ExternalOrderPayload),
    InventoryUpdate(InventoryLevel),
}

impl WebhookEvent {
    pub fn topic(&self) -> SyncTopic {
        match self {
            WebhookEvent::ProductUpsert(_) => SyncTopic::ProductUpsert,
            WebhookEvent::ProductDelete { .. } => SyncTopic::ProductDelete,
            WebhookEvent::OrderCreate(_) => SyncTopic::OrderCreate,
            WebhookEvent::OrderUpdate(_) => SyncTopic::OrderUpdate,
            WebhookEvent::InventoryUpdate(_) => SyncTopic::InventoryUpdate,
        }
    }
}

/// Parse an authenticated webhook body.
///
/// `topic_header` is the platform's topic header (ignored for generic
/// stores, which name the event in the body). Returns `Ok(None)` for topics
/// this core does not handle.
pub fn parse_webhook(
    kind: StoreKind,
    topic_header: Option<&str>,
    body: &[u8],
) -> DomainResult<Option<WebhookEvent>> {
    match kind {
        StoreKind::Laravel | StoreKind::Custom => {
            let envelope: GenericEnvelope = decode(body)?;
            match resolve_topic(kind, &envelope.event) {
                Some(topic) => generic::parse(topic, envelope.data).map(Some),
                None => Ok(None),
            }
        }
        StoreKind::Shopify | StoreKind::WooCommerce => {
            let name = topic_header
                .ok_or_else(|| DomainError::validation(format!("missing {kind} topic header")))?;
            let Some(topic) = resolve_topic(kind, name) else {
                return Ok(None);
            };
            let event = if kind == StoreKind::Shopify {
                shopify::parse(topic, body)?
            } else {
                woocommerce::parse(topic, body)?
            };
            Ok(Some(event))
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> DomainResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| DomainError::validation(format!("malformed webhook payload: {e}")))
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> DomainResult<T> {
    serde_json::from_value(value)
        .map_err(|e| DomainError::validation(format!("malformed webhook payload: {e}")))
}

/// Platform ids arrive as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Str(String),
}

impl RawId {
    fn into_string(self) -> DomainResult<String> {
        let id = match self {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s.trim().to_string(),
        };
        if id.is_empty() {
            return Err(DomainError::validation("external id cannot be empty"));
        }
        Ok(id)
    }
}

/// Decimal that may arrive as a JSON number or a (possibly empty) string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDecimal {
    Num(serde_json::Number),
    Str(String),
}

impl RawDecimal {
    fn to_decimal(&self) -> DomainResult<Option<Decimal>> {
        let text = match self {
            RawDecimal::Num(n) => n.to_string(),
            RawDecimal::Str(s) if s.trim().is_empty() => return Ok(None),
            RawDecimal::Str(s) => s.trim().to_string(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map(Some)
            .map_err(|_| DomainError::validation(format!("not a decimal: {text}")))
    }
}

fn price(raw: Option<&RawDecimal>) -> DomainResult<Money> {
    let amount = match raw {
        Some(r) => r.to_decimal()?.unwrap_or(Decimal::ZERO),
        None => Decimal::ZERO,
    };
    Ok(Money::new(amount))
}

fn quantity(raw: &RawDecimal) -> DomainResult<Decimal> {
    raw.to_decimal()?
        .ok_or_else(|| DomainError::invalid_quantity("quantity is missing"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// SKU to use locally; stores without one get a stable synthetic SKU.
fn local_sku(kind: StoreKind, sku: Option<String>, external_id: &str) -> String {
    non_empty(sku).unwrap_or_else(|| format!("{kind}-{external_id}"))
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    product_id: Option<RawId>,
    #[serde(default)]
    sku: Option<String>,
    quantity: RawDecimal,
}

impl RawLine {
    fn normalize(self) -> DomainResult<ExternalOrderLine> {
        Ok(ExternalOrderLine {
            external_product_id: self.product_id.map(RawId::into_string).transpose()?,
            sku: non_empty(self.sku),
            quantity: quantity(&self.quantity)?,
        })
    }
}

fn lines(raw: Vec<RawLine>) -> DomainResult<Vec<ExternalOrderLine>> {
    raw.into_iter().map(RawLine::normalize).collect()
}

mod shopify {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Product {
        id: RawId,
        title: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        variants: Vec<Variant>,
    }

    #[derive(Debug, Deserialize)]
    struct Variant {
        #[serde(default)]
        sku: Option<String>,
        #[serde(default)]
        price: Option<RawDecimal>,
        #[serde(default)]
        inventory_item_id: Option<RawId>,
    }

    #[derive(Debug, Deserialize)]
    struct Order {
        id: RawId,
        #[serde(default)]
        cancelled_at: Option<String>,
        #[serde(default)]
        financial_status: Option<String>,
        #[serde(default)]
        fulfillment_status: Option<String>,
        #[serde(default)]
        line_items: Vec<RawLine>,
    }

    #[derive(Debug, Deserialize)]
    struct Level {
        inventory_item_id: RawId,
        available: Option<RawDecimal>,
    }

    pub(super) fn parse(topic: SyncTopic, body: &[u8]) -> DomainResult<WebhookEvent> {
        match topic {
            SyncTopic::ProductUpsert => {
                let p: Product = decode(body)?;
                let external_id = p.id.into_string()?;
                let variant = p.variants.into_iter().next();
                let (sku, raw_price, item) = match variant {
                    Some(v) => (v.sku, v.price, v.inventory_item_id),
                    None => (None, None, None),
                };
                Ok(WebhookEvent::ProductUpsert(ExternalProduct {
                    sku: local_sku(StoreKind::Shopify, sku, &external_id),
                    name: p.title,
                    price: price(raw_price.as_ref())?,
                    is_active: p.status.as_deref().is_none_or(|s| s == "active"),
                    inventory_item_id: item.map(RawId::into_string).transpose()?,
                    external_id,
                }))
            }
            SyncTopic::ProductDelete => Ok(WebhookEvent::ProductDelete {
                external_id: decode::<IdOnly>(body)?.id.into_string()?,
            }),
            SyncTopic::OrderCreate | SyncTopic::OrderUpdate => {
                let o: Order = decode(body)?;
                let status = if o.cancelled_at.is_some() {
                    ExternalOrderStatus::Cancelled
                } else if o.financial_status.as_deref() == Some("refunded") {
                    ExternalOrderStatus::Refunded
                } else if o.fulfillment_status.as_deref() == Some("fulfilled") {
                    ExternalOrderStatus::Completed
                } else {
                    ExternalOrderStatus::Open
                };
                let payload = ExternalOrderPayload {
                    external_id: o.id.into_string()?,
                    status,
                    lines: lines(o.line_items)?,
                };
                Ok(if topic == SyncTopic::OrderCreate {
                    WebhookEvent::OrderCreate(payload)
                } else {
                    WebhookEvent::OrderUpdate(payload)
                })
            }
            SyncTopic::InventoryUpdate => {
                let level: Level = decode(body)?;
                let available = level
                    .available
                    .as_ref()
                    .map(RawDecimal::to_decimal)
                    .transpose()?
                    .flatten()
                    .ok_or_else(|| DomainError::invalid_quantity("available quantity is missing"))?;
                Ok(WebhookEvent::InventoryUpdate(InventoryLevel {
                    external_id: level.inventory_item_id.into_string()?,
                    keyed_by: ExternalIdKind::InventoryItem,
                    available,
                }))
            }
        }
    }
}

mod woocommerce {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Product {
        id: RawId,
        name: String,
        #[serde(default)]
        sku: Option<String>,
        #[serde(default)]
        price: Option<RawDecimal>,
        #[serde(default)]
        status: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct Order {
        id: RawId,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        line_items: Vec<RawLine>,
    }

    pub(super) fn parse(topic: SyncTopic, body: &[u8]) -> DomainResult<WebhookEvent> {
        match topic {
            SyncTopic::ProductUpsert => {
                let p: Product = decode(body)?;
                let external_id = p.id.into_string()?;
                Ok(WebhookEvent::ProductUpsert(ExternalProduct {
                    sku: local_sku(StoreKind::WooCommerce, p.sku, &external_id),
                    name: p.name,
                    price: price(p.price.as_ref())?,
                    is_active: p.status.as_deref().is_none_or(|s| s == "publish"),
                    inventory_item_id: None,
                    external_id,
                }))
            }
            SyncTopic::ProductDelete => Ok(WebhookEvent::ProductDelete {
                external_id: decode::<IdOnly>(body)?.id.into_string()?,
            }),
            SyncTopic::OrderCreate | SyncTopic::OrderUpdate => {
                let o: Order = decode(body)?;
                let payload = ExternalOrderPayload {
                    external_id: o.id.into_string()?,
                    status: o
                        .status
                        .as_deref()
                        .map(ExternalOrderStatus::parse)
                        .unwrap_or(ExternalOrderStatus::Open),
                    lines: lines(o.line_items)?,
                };
                Ok(if topic == SyncTopic::OrderCreate {
                    WebhookEvent::OrderCreate(payload)
                } else {
                    WebhookEvent::OrderUpdate(payload)
                })
            }
            SyncTopic::InventoryUpdate => Err(DomainError::validation(
                "woocommerce does not send inventory webhooks",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenericEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

mod generic {
    use super::*;

    fn default_true() -> bool {
        true
    }

    #[derive(Debug, Deserialize)]
    struct Product {
        id: RawId,
        name: String,
        #[serde(default)]
        sku: Option<String>,
        #[serde(default)]
        price: Option<RawDecimal>,
        #[serde(default = "default_true")]
        is_active: bool,
    }

    #[derive(Debug, Deserialize)]
    struct Order {
        id: RawId,
        #[serde(default)]
        status: Option<String>,
        #[serde(default, alias = "line_items")]
        items: Vec<RawLine>,
    }

    #[derive(Debug, Deserialize)]
    struct Level {
        #[serde(alias = "id")]
        product_id: RawId,
        #[serde(alias = "available")]
        quantity: RawDecimal,
    }

    pub(super) fn parse(topic: SyncTopic, data: Value) -> DomainResult<WebhookEvent> {
        match topic {
            SyncTopic::ProductUpsert => {
                let p: Product = from_value(data)?;
                let external_id = p.id.into_string()?;
                Ok(WebhookEvent::ProductUpsert(ExternalProduct {
                    sku: local_sku(StoreKind::Custom, p.sku, &external_id),
                    name: p.name,
                    price: price(p.price.as_ref())?,
                    is_active: p.is_active,
                    inventory_item_id: None,
                    external_id,
                }))
            }
            SyncTopic::ProductDelete => Ok(WebhookEvent::ProductDelete {
                external_id: from_value::<IdOnly>(data)?.id.into_string()?,
            }),
            SyncTopic::OrderCreate | SyncTopic::OrderUpdate => {
                let o: Order = from_value(data)?;
                let payload = ExternalOrderPayload {
                    external_id: o.id.into_string()?,
                    status: o
                        .status
                        .as_deref()
                        .map(ExternalOrderStatus::parse)
                        .unwrap_or(ExternalOrderStatus::Open),
                    lines: lines(o.items)?,
                };
                Ok(if topic == SyncTopic::OrderCreate {
                    WebhookEvent::OrderCreate(payload)
                } else {
                    WebhookEvent::OrderUpdate(payload)
                })
            }
            SyncTopic::InventoryUpdate => {
                let level: Level = from_value(data)?;
                Ok(WebhookEvent::InventoryUpdate(InventoryLevel {
                    external_id: level.product_id.into_string()?,
                    keyed_by: ExternalIdKind::Product,
                    available: quantity(&level.quantity)?,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shopify_product_takes_first_variant() {
        let body = br#"{"id":632910392,"title":"IPod Nano","status":"active",
            "variants":[{"sku":"IPOD2008PINK","price":"199.00","inventory_item_id":39072856},{"sku":"IPOD2008RED","price":"205.00"}]}"#;
        let event = parse_webhook(StoreKind::Shopify, Some("products/create"), body)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::ProductUpsert(ExternalProduct {
                external_id: "632910392".into(),
                sku: "IPOD2008PINK".into(),
                name: "IPod Nano".into(),
                price: Money::new(dec!(199.00)),
                is_active: true,
                inventory_item_id: Some("39072856".into()),
            })
        );
    }

    #[test]
    fn shopify_cancelled_order() {
        let body = br#"{"id":"450789469","cancelled_at":"2026-01-01T00:00:00Z",
            "line_items":[{"product_id":632910392,"sku":"IPOD2008PINK","quantity":2}]}"#;
        let Some(WebhookEvent::OrderUpdate(order)) =
            parse_webhook(StoreKind::Shopify, Some("orders/updated"), body).unwrap()
        else {
            panic!("expected order update");
        };
        assert_eq!(order.status, ExternalOrderStatus::Cancelled);
        assert_eq!(order.lines[0].external_product_id.as_deref(), Some("632910392"));
        assert_eq!(order.lines[0].quantity, dec!(2));
    }

    #[test]
    fn shopify_inventory_level() {
        let body = br#"{"inventory_item_id":271878346,"location_id":1,"available":7}"#;
        let event = parse_webhook(StoreKind::Shopify, Some("inventory_levels/update"), body)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::InventoryUpdate(InventoryLevel {
                external_id: "271878346".into(),
                keyed_by: ExternalIdKind::InventoryItem,
                available: dec!(7),
            })
        );
    }

    #[test]
    fn woocommerce_product_with_empty_price_and_no_sku() {
        let body = br#"{"id":799,"name":"Ship Your Idea","sku":"","price":"","status":"draft"}"#;
        let Some(WebhookEvent::ProductUpsert(p)) =
            parse_webhook(StoreKind::WooCommerce, Some("product.updated"), body).unwrap()
        else {
            panic!("expected product upsert");
        };
        assert_eq!(p.sku, "woocommerce-799");
        assert_eq!(p.price, Money::ZERO);
        assert!(!p.is_active);
    }

    #[test]
    fn generic_envelope_names_the_event() {
        let body = br#"{"event":"inventory.updated","data":{"product_id":"SKU-9","quantity":"12.5"}}"#;
        let event = parse_webhook(StoreKind::Laravel, None, body).unwrap().unwrap();
        assert_eq!(
            event,
            WebhookEvent::InventoryUpdate(InventoryLevel {
                external_id: "SKU-9".into(),
                keyed_by: ExternalIdKind::Product,
                available: dec!(12.5),
            })
        );

        let ignored = br#"{"event":"customer.created","data":{}}"#;
        assert_eq!(parse_webhook(StoreKind::Custom, None, ignored).unwrap(), None);
    }

    #[test]
    fn unknown_topics_are_ignored_and_missing_headers_rejected() {
        assert_eq!(
            parse_webhook(StoreKind::Shopify, Some("carts/update"), b"{}").unwrap(),
            None
        );
        assert!(matches!(
            parse_webhook(StoreKind::Shopify, None, b"{}"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(matches!(
            parse_webhook(StoreKind::Custom, None, b"{not json"),
            Err(DomainError::Validation(_))
        ));
    }
}
