use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

use branchledger_api::app::build_app;
use branchledger_api::app::services::{build_services, AppServices};
use branchledger_auth::{Actor, Permission};
use branchledger_events::bus::EventBus;
use branchledger_core::{BranchId, Money, TenantId, UserId};
use branchledger_infra::services::{CatalogService, MovementRequest, ProductRequest, StockLedger, StoreRequest};
use branchledger_infra::{AppConfig, InMemoryDatabase};
use branchledger_inventory::{MovementDirection, MovementReference, Product, ReferenceType, Warehouse};
use branchledger_sync::{sign, Store, StoreId, StoreKind};

const SECRET: &str = "whsec-test-secret";

struct Harness {
    services: Arc<AppServices>,
    actor: Actor,
    warehouse: Warehouse,
    store: Store,
}

impl Harness {
    fn new(kind: StoreKind) -> Self {
        let services = Arc::new(build_services(&AppConfig::default(), Arc::new(InMemoryDatabase::new())));
        let branch = BranchId::new();
        let actor = Actor::new(UserId::new(), TenantId::new(), branch).with_permission(Permission::WILDCARD);
        let warehouse = CatalogService::new(services.ctx.clone())
            .register_warehouse(&actor, branch, "Main")
            .unwrap();
        let store = services
            .sync
            .register_store(
                &actor,
                StoreRequest {
                    branch_id: branch,
                    kind,
                    name: "Web shop".into(),
                    warehouse_id: warehouse.id,
                    webhook_secret: SECRET.into(),
                },
            )
            .unwrap();
        Self {
            services,
            actor,
            warehouse,
            store,
        }
    }

    fn app(&self) -> Router {
        build_app(self.services.clone())
    }

    fn uri(&self) -> String {
        format!("/webhooks/{}/{}", self.store.kind, self.store.id)
    }

    /// A stocked product mapped to `external_id` on the store.
    fn stocked_product(&self, external_id: &str, qty: rust_decimal::Decimal) -> Product {
        let product = CatalogService::new(self.services.ctx.clone())
            .create_product(
                &self.actor,
                ProductRequest {
                    branch_id: self.warehouse.branch_id,
                    sku: format!("SKU-{external_id}"),
                    name: "Mug".into(),
                    price: Money::new(dec!(9.50)),
                },
            )
            .unwrap();
        StockLedger::new(self.services.ctx.clone())
            .record_movement(
                &self.actor,
                MovementRequest {
                    product_id: product.id,
                    warehouse_id: self.warehouse.id,
                    branch_id: self.warehouse.branch_id,
                    direction: MovementDirection::In,
                    quantity: qty,
                    reference: MovementReference::new(ReferenceType::Opening, "opening"),
                    note: None,
                },
            )
            .unwrap();
        self.services
            .sync
            .map_product(&self.actor, self.store.id, product.id, external_id, None)
            .unwrap();
        product
    }

    fn stock(&self, product: &Product) -> rust_decimal::Decimal {
        StockLedger::new(self.services.ctx.clone())
            .get_current_stock(&self.actor, product.id, self.warehouse.id)
            .unwrap()
    }
}

async fn post(app: Router, uri: &str, headers: &[(&str, String)], body: &[u8]) -> (StatusCode, Value) {
    let mut request = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        request = request.header(*name, value);
    }
    let response = app
        .oneshot(request.body(Body::from(body.to_vec())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn signed(kind: StoreKind, body: &[u8]) -> (&'static str, String) {
    (kind.signature_header(), sign(kind, SECRET, body).unwrap())
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new(StoreKind::Custom);
    let response = h
        .app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_generic_product_is_synced_and_announced() {
    let h = Harness::new(StoreKind::Custom);
    let events = h.services.bus.subscribe();
    let body = serde_json::to_vec(&json!({
        "event": "product.created",
        "data": { "id": 42, "name": "Teapot", "sku": "TP-1", "price": "24.00" }
    }))
    .unwrap();

    let (status, json) = post(h.app(), &h.uri(), &[signed(StoreKind::Custom, &body)], &body).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["result"]["outcome"], "product_synced");
    assert_eq!(json["result"]["created"], true);
    let mappings = h.services.sync.mappings(&h.actor, h.store.id).unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].external_id, "42");
    assert!(
        events
            .drain()
            .iter()
            .any(|e| e.event_type() == "sync.product.synced")
    );
}

#[tokio::test]
async fn tampered_or_unsigned_deliveries_are_401() {
    let h = Harness::new(StoreKind::Custom);
    let body = br#"{"event":"product.created","data":{"id":1,"name":"A"}}"#;
    let forged = br#"{"event":"product.created","data":{"id":1,"name":"B"}}"#;

    let (status, json) = post(h.app(), &h.uri(), &[signed(StoreKind::Custom, body)], forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "invalid_signature");

    let (status, _) = post(h.app(), &h.uri(), &[], body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(h.services.sync.mappings(&h.actor, h.store.id).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_targets_are_404() {
    let h = Harness::new(StoreKind::Custom);
    let body = br#"{"event":"product.created","data":{"id":1,"name":"A"}}"#;
    let headers = [signed(StoreKind::Custom, body)];

    let unknown_store = format!("/webhooks/custom/{}", StoreId::new());
    let unknown_platform = format!("/webhooks/magento/{}", h.store.id);
    let wrong_platform = format!("/webhooks/shopify/{}", h.store.id);

    for uri in [
        unknown_store.as_str(),
        unknown_platform.as_str(),
        wrong_platform.as_str(),
        "/webhooks/custom/not-a-uuid",
    ] {
        let (status, _) = post(h.app(), uri, &headers, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn deactivated_store_is_404() {
    let h = Harness::new(StoreKind::Custom);
    h.services.sync.deactivate_store(&h.actor, h.store.id).unwrap();
    let body = br#"{"event":"product.created","data":{"id":1,"name":"A"}}"#;

    let (status, json) = post(h.app(), &h.uri(), &[signed(StoreKind::Custom, body)], body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "unknown_store");
}

#[tokio::test]
async fn shopify_order_takes_stock_once() {
    let h = Harness::new(StoreKind::Shopify);
    let mug = h.stocked_product("111", dec!(10));
    let body = serde_json::to_vec(&json!({
        "id": 5001,
        "line_items": [
            { "product_id": 111, "quantity": 2 },
            { "product_id": 999, "quantity": 1 }
        ]
    }))
    .unwrap();
    let headers = [
        signed(StoreKind::Shopify, &body),
        ("X-Shopify-Topic", "orders/create".to_string()),
    ];

    let (status, json) = post(h.app(), &h.uri(), &headers, &body).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["result"]["outcome"], "order_ingested");
    assert_eq!(json["result"]["lines_posted"], 1);
    assert_eq!(json["result"]["lines_skipped"], 1);
    assert_eq!(h.stock(&mug), dec!(8));

    let (status, json) = post(h.app(), &h.uri(), &headers, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["replayed"], true);
    assert_eq!(h.stock(&mug), dec!(8));
}

#[tokio::test]
async fn unhandled_topic_is_acknowledged() {
    let h = Harness::new(StoreKind::Shopify);
    let body = br#"{"id": 1}"#;
    let headers = [
        signed(StoreKind::Shopify, body),
        ("X-Shopify-Topic", "customers/create".to_string()),
    ];

    let (status, json) = post(h.app(), &h.uri(), &headers, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["outcome"], "ignored");
}

#[tokio::test]
async fn negative_inventory_level_is_500() {
    let h = Harness::new(StoreKind::Laravel);
    let mug = h.stocked_product("7", dec!(3));
    let body = br#"{"event":"inventory.updated","data":{"product_id":7,"quantity":-1}}"#;

    let (status, json) = post(h.app(), &h.uri(), &[signed(StoreKind::Laravel, body)], body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "invalid_quantity");
    assert_eq!(h.stock(&mug), dec!(3));
}

#[tokio::test]
async fn order_beyond_stock_is_500_and_takes_nothing() {
    let h = Harness::new(StoreKind::Shopify);
    let mug = h.stocked_product("111", dec!(2));
    let body = serde_json::to_vec(&json!({
        "id": 5002,
        "line_items": [{ "product_id": 111, "quantity": 5 }]
    }))
    .unwrap();
    let headers = [
        signed(StoreKind::Shopify, &body),
        ("X-Shopify-Topic", "orders/create".to_string()),
    ];

    let (status, json) = post(h.app(), &h.uri(), &headers, &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "insufficient_stock");
    assert_eq!(h.stock(&mug), dec!(2));
}

#[tokio::test]
async fn malformed_payload_from_a_known_store_is_500_not_404() {
    let h = Harness::new(StoreKind::Custom);
    let body = br#"{"event":"product.created","data":"not an object"}"#;

    let (status, _) = post(h.app(), &h.uri(), &[signed(StoreKind::Custom, body)], body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.services.sync.mappings(&h.actor, h.store.id).unwrap().is_empty());
}

#[tokio::test]
async fn inventory_level_reconciles_on_hand() {
    let h = Harness::new(StoreKind::Laravel);
    let mug = h.stocked_product("7", dec!(3));
    let body = br#"{"event":"inventory.updated","data":{"product_id":7,"quantity":5}}"#;

    let (status, json) = post(h.app(), &h.uri(), &[signed(StoreKind::Laravel, body)], body).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["result"]["outcome"], "inventory_reconciled");
    assert_eq!(h.stock(&mug), dec!(5));
}
