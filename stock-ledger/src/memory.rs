//! In-memory ledger store
//!
//! Same transaction semantics as the RocksDB [`Storage`](crate::Storage): effects are
//! staged in a changeset and applied under one write guard, so readers never see a
//! partially applied transfer. Useful for tests and for embedding the engine without
//! persistence. Commits can be made to fail on demand to exercise rollback paths.

use crate::{
    catalog::Product,
    txn::{run_scoped, Changes, LedgerStore, LedgerTxn, RowSource, WriteLock},
    types::{
        InventoryRow, OrderId, OrderRecord, PrincipalId, ProductId, RowKey, StockRow,
        StocklistId,
    },
    Error, Result,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    stock: HashMap<RowKey, StockRow>,
    inventory: BTreeMap<(StocklistId, RowKey), InventoryRow>,
    orders: Vec<OrderRecord>,
}

/// Thread-safe in-memory ledger store
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    pub(crate) write_lock: WriteLock,
    failing_commits: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            write_lock: WriteLock::new(lock_timeout),
            failing_commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` commits fail after their transaction body succeeded
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn commit(&self, changes: Changes) -> Result<()> {
        let injected = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Storage("injected commit failure".to_string()));
        }

        let mut state = self.state.write();
        for product in changes.products {
            state.products.insert(product.product_id, product);
        }
        state.stock.extend(changes.stock);
        state.inventory.extend(changes.inventory);
        state.orders.extend(changes.orders);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl RowSource for State {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.products.get(&product_id).cloned())
    }

    fn load_product_by_name(&self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>> {
        Ok(self
            .products
            .values()
            .find(|p| p.owner == *owner && p.name == name)
            .map(|p| p.product_id))
    }

    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>> {
        Ok(self.stock.get(row).copied())
    }

    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>> {
        Ok(self.inventory.get(&(*stocklist, *row)).copied())
    }

    fn load_inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        Ok(self
            .inventory
            .iter()
            .filter(|((holder, _), _)| holder == stocklist)
            .map(|((_, row), inventory)| (*row, *inventory))
            .collect())
    }
}

impl RowSource for MemoryStore {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.state.read().load_product(product_id)
    }

    fn load_product_by_name(&self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>> {
        self.state.read().load_product_by_name(owner, name)
    }

    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>> {
        self.state.read().load_stock(row)
    }

    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>> {
        self.state.read().load_inventory(stocklist, row)
    }

    fn load_inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        self.state.read().load_inventory_rows(stocklist)
    }
}

impl LedgerStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTxn) -> Result<T>,
    {
        let _guard = self.write_lock.acquire()?;
        run_scoped(self, f, |changes| self.commit(changes))
    }

    fn read_view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn RowSource) -> Result<T>,
    {
        // Commits wait for the read guard, so the view cannot change under `f`
        let state = self.state.read();
        f(&*state)
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.load_product(product_id)
    }

    fn products_for_owner(&self, owner: &PrincipalId) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .state
            .read()
            .products
            .values()
            .filter(|p| p.owner == *owner)
            .cloned()
            .collect();
        products.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.product_id.cmp(&a.product_id))
        });
        Ok(products)
    }

    fn stock_row(&self, row: &RowKey) -> Result<Option<StockRow>> {
        self.load_stock(row)
    }

    fn inventory(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        self.load_inventory_rows(stocklist)
    }

    fn order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>> {
        Ok(self
            .state
            .read()
            .orders
            .iter()
            .find(|o| o.order_id == *order_id)
            .cloned())
    }

    fn orders_for_buyer(&self, buyer: &PrincipalId) -> Result<Vec<OrderRecord>> {
        Ok(self
            .state
            .read()
            .orders
            .iter()
            .filter(|o| o.buyer == *buyer)
            .cloned()
            .collect())
    }

    fn orders_for_seller(&self, stocklist: &StocklistId) -> Result<Vec<OrderRecord>> {
        Ok(self
            .state
            .read()
            .orders
            .iter()
            .filter(|o| o.seller_stocklist.as_ref() == Some(stocklist))
            .cloned()
            .collect())
    }

    fn order_count(&self) -> Result<u64> {
        Ok(self.state.read().orders.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewProduct;
    use crate::types::LedgerKey;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn seeded(quantity: u64) -> (MemoryStore, RowKey) {
        let store = MemoryStore::default();
        let (product, rows) = NewProduct::single("Tea", Decimal::new(250, 2), quantity)
            .build(PrincipalId::generate())
            .unwrap();
        let row = rows[0].0;
        store
            .transaction(|txn| txn.insert_product(product, rows))
            .unwrap();
        (store, row)
    }

    #[test]
    fn test_staged_reads_compound() {
        let (store, row) = seeded(5);
        let key = LedgerKey::Stock(row);

        let (first, second, third) = store
            .transaction(|txn| {
                Ok((
                    txn.conditional_decrement(&key, 2)?,
                    txn.conditional_decrement(&key, 2)?,
                    txn.conditional_decrement(&key, 2)?,
                ))
            })
            .unwrap();

        assert!(first && second && !third);
        assert_eq!(store.stock_row(&row).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn test_injected_commit_failure_discards_changes() {
        let (store, row) = seeded(5);
        store.fail_next_commits(1);

        let result = store.transaction(|txn| txn.conditional_decrement(&LedgerKey::Stock(row), 5));
        assert!(result.is_err());
        assert_eq!(store.stock_row(&row).unwrap().unwrap().quantity, 5);

        // Only one failure was armed
        assert!(store
            .transaction(|txn| txn.conditional_decrement(&LedgerKey::Stock(row), 5))
            .unwrap());
        assert_eq!(store.stock_row(&row).unwrap().unwrap().quantity, 0);
    }

    #[test]
    fn test_missing_inventory_row_is_not_found() {
        let (store, row) = seeded(5);
        let key = LedgerKey::Inventory {
            stocklist: StocklistId::generate(),
            row,
        };
        let err = store
            .transaction(|txn| txn.conditional_decrement(&key, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InventoryRowNotFound { .. }));
    }

    #[test]
    fn test_lock_timeout_is_conflict() {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(20)));
        let _held = store.write_lock.acquire().unwrap();

        let contender = Arc::clone(&store);
        let err = std::thread::spawn(move || contender.transaction(|_| Ok(())))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
