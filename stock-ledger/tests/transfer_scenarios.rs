//! End-to-end transfer scenarios against a RocksDB-backed ledger

use rust_decimal::Decimal;
use stock_ledger::{
    Config, Error, ErrorKind, Ledger, LineItem, NewProduct, NewVariant, Principal, PrincipalId,
    Product, ProductId, Role, RowKey, TransferKind,
};
use tempfile::TempDir;

struct TestLedger {
    ledger: Ledger,
    owner: Principal,
    stocklist: Principal,
    customer: Principal,
    _dir: TempDir,
}

async fn create_test_ledger() -> TestLedger {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;

    TestLedger {
        ledger: Ledger::open(config).await.unwrap(),
        owner: Principal::new(PrincipalId::generate(), Role::Owner),
        stocklist: Principal::new(PrincipalId::generate(), Role::Stocklist),
        customer: Principal::new(PrincipalId::generate(), Role::Customer),
        _dir: dir,
    }
}

impl TestLedger {
    async fn single(&self, name: &str, price: Decimal, quantity: u64) -> Product {
        self.ledger
            .register_product(self.owner, NewProduct::single(name, price, quantity))
            .await
            .unwrap()
    }

    async fn with_variants(&self, name: &str, variants: &[(&str, Decimal, u64)]) -> Product {
        let variants = variants
            .iter()
            .map(|(name, price, quantity)| NewVariant {
                name: name.to_string(),
                price: *price,
                quantity: *quantity,
            })
            .collect();
        self.ledger
            .register_product(self.owner, NewProduct::with_variants(name, variants))
            .await
            .unwrap()
    }

    fn held(&self, row: RowKey) -> Option<u64> {
        self.ledger
            .inventory_rows(&self.stocklist.id)
            .unwrap()
            .into_iter()
            .find(|(key, _)| *key == row)
            .map(|(_, inventory)| inventory.quantity)
    }

    async fn shutdown(self) {
        self.ledger.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn scenario_a_owner_purchase() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::new(50, 1), 10).await;

    let order = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(p.product_id, 4)])
        .await
        .unwrap();

    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 6);
    assert_eq!(t.held(RowKey::product(p.product_id)), Some(4));
    assert_eq!(order.total_amount, Decimal::new(200, 1));
    assert_eq!(order.kind, TransferKind::OwnerPurchase);
    assert_eq!(order.buyer, t.stocklist.id);
    assert_eq!(order.seller_stocklist, None);
    assert_eq!(order.lines[0].unit_price, Decimal::new(50, 1));

    // Stored record is the one returned
    assert_eq!(t.ledger.get_order(&order.order_id).unwrap(), Some(order));
    t.shutdown().await;
}

#[tokio::test]
async fn scenario_b_concurrent_conflicting_purchases() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::new(50, 1), 10).await;

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let handle = t.ledger.handle();
        let buyer = Principal::new(PrincipalId::generate(), Role::Stocklist);
        let product_id = p.product_id;
        tasks.push(tokio::spawn(async move {
            handle
                .owner_purchase(buyer, vec![LineItem::new(product_id, 6)])
                .await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    let failures: Vec<&Error> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    match failures[0] {
        Error::InsufficientStock {
            line,
            requested,
            available,
            ..
        } => {
            assert_eq!(*line, 0);
            assert_eq!(*requested, 6);
            assert_eq!(*available, 4);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 4);
    assert_eq!(t.ledger.order_count().unwrap(), 1);
    t.shutdown().await;
}

#[tokio::test]
async fn scenario_c_customer_overdraw_of_variant_inventory() {
    let t = create_test_ledger().await;
    let p = t
        .with_variants("P", &[("V", Decimal::new(25, 1), 10), ("W", Decimal::ONE, 10)])
        .await;
    let v = p.variants[0].variant_id;
    let row = RowKey::variant(p.product_id, v);

    t.ledger
        .owner_purchase(t.stocklist, vec![LineItem::variant(p.product_id, v, 3)])
        .await
        .unwrap();
    assert_eq!(t.held(row), Some(3));

    let err = t
        .ledger
        .customer_purchase(t.customer, t.stocklist.id, vec![LineItem::variant(p.product_id, v, 5)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    assert!(matches!(err, Error::InsufficientStock { available: 3, requested: 5, .. }));
    assert_eq!(t.held(row), Some(3));
    assert!(t.ledger.orders_for_buyer(&t.customer.id).unwrap().is_empty());
    assert_eq!(t.ledger.order_count().unwrap(), 1);
    t.shutdown().await;
}

#[tokio::test]
async fn scenario_d_unknown_product() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::ONE, 10).await;

    let err = t
        .ledger
        .owner_purchase(
            t.stocklist,
            vec![
                LineItem::new(p.product_id, 2),
                LineItem::new(ProductId::generate(), 1),
            ],
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.line(), Some(1));
    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 10);
    assert!(t.ledger.inventory_rows(&t.stocklist.id).unwrap().is_empty());
    assert_eq!(t.ledger.order_count().unwrap(), 0);
    t.shutdown().await;
}

#[tokio::test]
async fn mixed_order_spans_variant_and_plain_products() {
    let t = create_test_ledger().await;
    let rice = t.single("Rice", Decimal::new(500, 2), 10).await;
    let oil = t
        .with_variants(
            "Oil",
            &[("litre", Decimal::new(300, 2), 8), ("5 litre", Decimal::new(1400, 2), 2)],
        )
        .await;
    let litre = oil.variants[0].variant_id;
    let five = oil.variants[1].variant_id;

    let order = t
        .ledger
        .owner_purchase(
            t.stocklist,
            vec![
                LineItem::new(rice.product_id, 2),
                LineItem::variant(oil.product_id, litre, 3),
                LineItem::variant(oil.product_id, five, 1),
            ],
        )
        .await
        .unwrap();

    // 2 × 5.00 + 3 × 3.00 + 1 × 14.00
    assert_eq!(order.total_amount, Decimal::new(3300, 2));
    let names: Vec<&str> = order.lines.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Rice", "Oil (litre)", "Oil (5 litre)"]);

    assert_eq!(t.ledger.stock_level(oil.product_id, Some(litre)).unwrap().quantity, 5);
    assert_eq!(t.ledger.stock_level(oil.product_id, Some(five)).unwrap().quantity, 1);
    assert_eq!(t.held(RowKey::variant(oil.product_id, five)), Some(1));

    // Stock of a variant-tracked product is only reachable through a variant
    let err = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(oil.product_id, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VariantRequired { line: Some(0), .. }));
    t.shutdown().await;
}

#[tokio::test]
async fn duplicate_lines_compound_against_one_row() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::ONE, 10).await;
    let line = LineItem::new(p.product_id, 4);

    let order = t
        .ledger
        .owner_purchase(t.stocklist, vec![line, line])
        .await
        .unwrap();
    assert_eq!(order.lines.len(), 2);
    assert_eq!(order.total_amount, Decimal::new(8, 0));
    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 2);
    assert_eq!(t.held(RowKey::product(p.product_id)), Some(8));

    // The second copy is what runs out
    let err = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(p.product_id, 2), LineItem::new(p.product_id, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientStock { line: 1, available: 0, .. }));
    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 2);
    t.shutdown().await;
}

#[tokio::test]
async fn customer_purchase_only_touches_named_stocklist() {
    let t = create_test_ledger().await;
    let other = Principal::new(PrincipalId::generate(), Role::Stocklist);
    let p = t.single("P", Decimal::new(250, 2), 20).await;
    let row = RowKey::product(p.product_id);

    t.ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(p.product_id, 5)])
        .await
        .unwrap();
    t.ledger
        .owner_purchase(other, vec![LineItem::new(p.product_id, 5)])
        .await
        .unwrap();

    let order = t
        .ledger
        .customer_purchase(t.customer, t.stocklist.id, vec![LineItem::new(p.product_id, 2)])
        .await
        .unwrap();

    assert_eq!(order.kind, TransferKind::CustomerPurchase);
    assert_eq!(order.seller_stocklist, Some(t.stocklist.id));
    assert_eq!(order.total_amount, Decimal::new(500, 2));
    assert_eq!(t.held(row), Some(3));
    assert_eq!(t.ledger.inventory_rows(&other.id).unwrap()[0].1.quantity, 5);
    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 10);
    assert!(t.ledger.inventory_rows(&t.customer.id).unwrap().is_empty());
    assert_eq!(t.ledger.orders_for_seller(&t.stocklist.id).unwrap(), vec![order]);
    assert!(t.ledger.orders_for_seller(&other.id).unwrap().is_empty());
    t.shutdown().await;
}

#[tokio::test]
async fn roles_are_enforced_before_ledger_access() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::ONE, 10).await;
    let items = vec![LineItem::new(p.product_id, 1)];

    let err = t
        .ledger
        .owner_purchase(t.customer, items.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = t
        .ledger
        .customer_purchase(t.stocklist, t.stocklist.id, items.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = t
        .ledger
        .register_product(t.stocklist, NewProduct::single("Q", Decimal::ONE, 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = t
        .ledger
        .restock(t.customer, p.product_id, None, 5)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    assert_eq!(t.ledger.stock_level(p.product_id, None).unwrap().quantity, 10);
    assert_eq!(t.ledger.metrics().failures(ErrorKind::Forbidden), 2);
    t.shutdown().await;
}

#[tokio::test]
async fn price_changes_apply_to_later_orders_only() {
    let t = create_test_ledger().await;
    let p = t.single("P", Decimal::new(100, 2), 10).await;

    let first = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(p.product_id, 2)])
        .await
        .unwrap();
    t.ledger
        .set_price(t.owner, p.product_id, None, Decimal::new(150, 2))
        .await
        .unwrap();
    let second = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::new(p.product_id, 2)])
        .await
        .unwrap();

    assert_eq!(first.total_amount, Decimal::new(200, 2));
    assert_eq!(second.total_amount, Decimal::new(300, 2));

    // The stored snapshot of the first order is unaffected
    let stored = t.ledger.get_order(&first.order_id).unwrap().unwrap();
    assert_eq!(stored.lines[0].unit_price, Decimal::new(100, 2));

    let history = t.ledger.orders_for_buyer(&t.stocklist.id).unwrap();
    assert_eq!(history, vec![first, second]);
    t.shutdown().await;
}

#[tokio::test]
async fn request_limits_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.transfer.max_line_items = 2;
    let ledger = Ledger::open(config).await.unwrap();
    let stocklist = Principal::new(PrincipalId::generate(), Role::Stocklist);
    let product_id = ProductId::generate();

    let err = ledger
        .owner_purchase(stocklist, vec![LineItem::new(product_id, 1); 3])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ledger.owner_purchase(stocklist, vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ledger
        .owner_purchase(stocklist, vec![LineItem::new(product_id, 0)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(ledger.metrics().failures(ErrorKind::Validation), 3);

    ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn re_adding_a_product_merges_stock() {
    let t = create_test_ledger().await;
    let rice = t.single("Rice", Decimal::new(500, 2), 5).await;
    let again = t.single("Rice", Decimal::new(550, 2), 5).await;

    assert_eq!(again.product_id, rice.product_id);
    let stock = t.ledger.stock_level(rice.product_id, None).unwrap();
    assert_eq!(stock.quantity, 10);
    assert_eq!(stock.unit_price, Decimal::new(550, 2));
    assert_eq!(t.ledger.list_products(&t.owner.id).unwrap(), vec![again]);
    t.shutdown().await;
}

#[tokio::test]
async fn adding_a_variant_to_an_existing_product() {
    let t = create_test_ledger().await;
    let oil = t.with_variants("Oil", &[("litre", Decimal::new(300, 2), 8)]).await;
    let litre = oil.variants[0].variant_id;

    let merged = t
        .with_variants("Oil", &[("5 litre", Decimal::new(1400, 2), 2)])
        .await;
    assert_eq!(merged.product_id, oil.product_id);
    let five = merged.variants[1].variant_id;
    assert_eq!(t.ledger.get_product(oil.product_id).unwrap(), merged);
    assert_eq!(t.ledger.stock_level(oil.product_id, Some(litre)).unwrap().quantity, 8);
    assert_eq!(t.ledger.stock_level(oil.product_id, Some(five)).unwrap().quantity, 2);

    let order = t
        .ledger
        .owner_purchase(t.stocklist, vec![LineItem::variant(oil.product_id, five, 2)])
        .await
        .unwrap();
    assert_eq!(order.lines[0].name, "Oil (5 litre)");
    assert_eq!(t.held(RowKey::variant(oil.product_id, five)), Some(2));

    // A product-level add against per-variant stock is refused
    let err = t
        .ledger
        .register_product(t.owner, NewProduct::single("Oil", Decimal::ONE, 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(t.ledger.get_product(oil.product_id).unwrap().variants.len(), 2);
    t.shutdown().await;
}

