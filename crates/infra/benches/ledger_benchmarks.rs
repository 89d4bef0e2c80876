use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use branchledger_auth::{Actor, Permission};
use branchledger_core::{BranchId, Money, Quantity, TenantId, UserId};
use branchledger_infra::services::{
    CatalogService, MovementRequest, ProductRequest, StockLedger, TransferRequest, TransferService,
};
use branchledger_infra::CoreContext;
use branchledger_inventory::{
    MovementDirection, MovementReference, NewTransferItem, Product, ReferenceType,
    ShipmentMeta, StockBucket, Warehouse,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Setup {
    ctx: CoreContext,
    actor: Actor,
    product: Product,
    source: Warehouse,
    destination: Warehouse,
}

fn setup() -> Setup {
    let ctx = CoreContext::in_memory();
    let branch = BranchId::new();
    let actor = Actor::new(UserId::new(), TenantId::new(), branch).with_permission(Permission::WILDCARD);
    let catalog = CatalogService::new(ctx.clone());
    let source = catalog.register_warehouse(&actor, branch, "source").unwrap();
    let destination = catalog.register_warehouse(&actor, branch, "destination").unwrap();
    let product = catalog
        .create_product(
            &actor,
            ProductRequest {
                branch_id: branch,
                sku: "BENCH".into(),
                name: "Bench item".into(),
                price: Money::new(dec!(1)),
            },
        )
        .unwrap();
    Setup {
        ctx,
        actor,
        product,
        source,
        destination,
    }
}

fn movement(s: &Setup, direction: MovementDirection, qty: Decimal, reference: String) -> MovementRequest {
    MovementRequest {
        product_id: s.product.id,
        warehouse_id: s.source.id,
        branch_id: s.source.branch_id,
        direction,
        quantity: qty,
        reference: MovementReference::new(ReferenceType::Adjustment, reference),
        note: None,
    }
}

/// Posting cost against a growing ledger.
fn bench_record_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_movement");
    for history in [0usize, 100, 1_000] {
        let s = setup();
        let ledger = StockLedger::new(s.ctx.clone());
        for i in 0..history {
            ledger
                .record_movement(&s.actor, movement(&s, MovementDirection::In, dec!(1), format!("seed-{i}")))
                .unwrap();
        }
        let mut n = 0u64;
        group.bench_with_input(BenchmarkId::new("inbound_after", history), &history, |b, _| {
            b.iter(|| {
                n += 1;
                let req = movement(&s, MovementDirection::In, dec!(1), format!("in-{n}"));
                black_box(ledger.record_movement(&s.actor, req).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let s = setup();
    let ledger = StockLedger::new(s.ctx.clone());
    ledger
        .record_movement(&s.actor, movement(&s, MovementDirection::In, dec!(5), "dup".into()))
        .unwrap();
    c.bench_function("record_movement/replay", |b| {
        b.iter(|| {
            let req = movement(&s, MovementDirection::In, dec!(5), "dup".into());
            black_box(ledger.record_movement(&s.actor, req).unwrap());
        })
    });
}

fn bench_stock_level(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_level");
    for size in [100usize, 10_000] {
        let s = setup();
        let ledger = StockLedger::new(s.ctx.clone());
        for i in 0..size {
            ledger
                .record_movement(&s.actor, movement(&s, MovementDirection::In, dec!(1), format!("m-{i}")))
                .unwrap();
        }
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let level = s
                    .ctx
                    .db()
                    .read(|t| t.stock_level(s.product.id, s.source.id, StockBucket::Sellable));
                black_box(level.unwrap())
            })
        });
    }
    group.finish();
}

fn bench_transfer_cycle(c: &mut Criterion) {
    let s = setup();
    let ledger = StockLedger::new(s.ctx.clone());
    let transfers = TransferService::new(s.ctx.clone());
    ledger
        .record_movement(&s.actor, movement(&s, MovementDirection::In, dec!(1000000), "opening".into()))
        .unwrap();

    c.bench_function("transfer/create_approve_ship", |b| {
        b.iter(|| {
            let transfer = transfers
                .create(
                    &s.actor,
                    TransferRequest {
                        from_warehouse_id: s.source.id,
                        to_warehouse_id: s.destination.id,
                        items: vec![NewTransferItem {
                            product_id: s.product.id,
                            quantity: Quantity::new(dec!(1)).unwrap(),
                            unit_cost: Money::ZERO,
                        }],
                        notes: None,
                    },
                )
                .unwrap();
            transfers.approve(&s.actor, transfer.id_typed()).unwrap();
            black_box(
                transfers
                    .ship(&s.actor, transfer.id_typed(), ShipmentMeta::default())
                    .unwrap(),
            );
        })
    });
}

criterion_group!(
    benches,
    bench_record_movement,
    bench_replay,
    bench_stock_level,
    bench_transfer_cycle
);
criterion_main!(benches);
