//! Repository seam between the transfer engine and ledger storage
//!
//! A [`LedgerStore`] exposes one mutation entry point, [`LedgerStore::transaction`]:
//! a scoped block receiving a [`LedgerTxn`]. Returning `Ok` from the block commits
//! every staged effect in one atomic write; returning `Err` (or panicking) drops the
//! staged effects, so nothing is ever observable half-applied.
//!
//! Reads inside the block see the block's own staged writes, which is what makes
//! duplicate line items against the same row compound correctly.

use crate::catalog::{check_price, Product};
use crate::types::{
    InventoryRow, LedgerKey, OrderDraft, OrderRecord, PrincipalId, ProductId, RowKey,
    StockRow, StocklistId,
};
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

/// Operations available inside one atomic unit
pub trait LedgerTxn {
    /// Catalog entry
    fn product(&mut self, product_id: ProductId) -> Result<Option<Product>>;

    /// Owner Stock Row (quantity and price snapshot)
    fn stock_row(&mut self, row: &RowKey) -> Result<Option<StockRow>>;

    /// Current quantity of a Stock or Inventory Row
    fn quantity(&mut self, key: &LedgerKey) -> Result<Option<u64>>;

    /// Decrement by `amount` iff the current quantity is at least `amount`
    ///
    /// Returns whether the decrement was applied. A missing row is an error.
    fn conditional_decrement(&mut self, key: &LedgerKey, amount: u64) -> Result<bool>;

    /// Increment by `amount`, creating an Inventory Row if absent
    ///
    /// Stock Rows carry a price and are never created here. Returns the new quantity.
    fn upsert_increment(&mut self, key: &LedgerKey, amount: u64) -> Result<u64>;

    /// Append the order record for this unit
    fn append(&mut self, draft: OrderDraft) -> Result<OrderRecord>;

    /// Product of `owner` named `name`
    fn product_by_name(&mut self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>>;

    /// Add a catalog entry with its initial Stock Rows
    fn insert_product(&mut self, product: Product, rows: Vec<(RowKey, StockRow)>) -> Result<()>;

    /// Replace an existing catalog entry, creating Stock Rows for added variants
    fn update_product(&mut self, product: Product, created: Vec<(RowKey, StockRow)>) -> Result<()>;

    /// Replace the unit price of an existing Stock Row
    fn set_price(&mut self, row: &RowKey, price: Decimal) -> Result<()>;
}

/// Ledger persistence backend
pub trait LedgerStore: Send + Sync {
    /// Run `f` as one atomic unit: commit on `Ok`, discard on `Err`
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTxn) -> Result<T>;

    /// Run `f` against one consistent view of committed state
    ///
    /// Commits made while `f` runs are not visible to it. `f` must not write
    /// to the same store.
    fn read_view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn RowSource) -> Result<T>;

    /// Catalog entry
    fn product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Products of `owner`, newest first
    fn products_for_owner(&self, owner: &PrincipalId) -> Result<Vec<Product>>;

    /// Owner Stock Row
    fn stock_row(&self, row: &RowKey) -> Result<Option<StockRow>>;

    /// Every Inventory Row of a stocklist, ordered by row key
    fn inventory(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>>;

    /// Order by ID
    fn order(&self, order_id: &crate::types::OrderId) -> Result<Option<OrderRecord>>;

    /// Orders placed by `buyer`, oldest first
    fn orders_for_buyer(&self, buyer: &PrincipalId) -> Result<Vec<OrderRecord>>;

    /// Orders sold from `stocklist`'s inventory, oldest first
    fn orders_for_seller(&self, stocklist: &StocklistId) -> Result<Vec<OrderRecord>>;

    /// Number of persisted orders
    fn order_count(&self) -> Result<u64>;
}

/// Committed state a [`Changeset`] reads through to
pub trait RowSource {
    /// Catalog entry
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Product ID by owner and name
    fn load_product_by_name(&self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>>;

    /// Stock Row
    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>>;

    /// Inventory Row
    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>>;

    /// Every Inventory Row of a stocklist, ordered by row key
    fn load_inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>>;
}

/// Effects staged by one transaction, applied atomically by the store
#[derive(Debug, Default)]
pub struct Changes {
    /// Stock Rows to write
    pub stock: HashMap<RowKey, StockRow>,
    /// Inventory Rows to write
    pub inventory: HashMap<(StocklistId, RowKey), InventoryRow>,
    /// Catalog entries to write
    pub products: Vec<Product>,
    /// Orders to append
    pub orders: Vec<OrderRecord>,
}

impl Changes {
    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.stock.is_empty()
            && self.inventory.is_empty()
            && self.products.is_empty()
            && self.orders.is_empty()
    }
}

/// Read-your-writes staging area over committed state
pub struct Changeset<'a, S: RowSource + ?Sized> {
    source: &'a S,
    changes: Changes,
}

impl<'a, S: RowSource + ?Sized> Changeset<'a, S> {
    /// Empty changeset over `source`
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            changes: Changes::default(),
        }
    }

    /// Staged effects
    pub fn into_changes(self) -> Changes {
        self.changes
    }

    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>> {
        match self.changes.stock.get(row) {
            Some(staged) => Ok(Some(*staged)),
            None => self.source.load_stock(row),
        }
    }

    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>> {
        match self.changes.inventory.get(&(*stocklist, *row)) {
            Some(staged) => Ok(Some(*staged)),
            None => self.source.load_inventory(stocklist, row),
        }
    }

    fn missing(key: &LedgerKey) -> Error {
        match key {
            LedgerKey::Stock(row) => Error::StockRowNotFound {
                line: None,
                row: *row,
            },
            LedgerKey::Inventory { stocklist, row } => Error::InventoryRowNotFound {
                line: None,
                stocklist: *stocklist,
                row: *row,
            },
        }
    }
}

impl<S: RowSource + ?Sized> LedgerTxn for Changeset<'_, S> {
    fn product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        if let Some(staged) = self
            .changes
            .products
            .iter()
            .find(|p| p.product_id == product_id)
        {
            return Ok(Some(staged.clone()));
        }
        self.source.load_product(product_id)
    }

    fn stock_row(&mut self, row: &RowKey) -> Result<Option<StockRow>> {
        self.load_stock(row)
    }

    fn quantity(&mut self, key: &LedgerKey) -> Result<Option<u64>> {
        Ok(match key {
            LedgerKey::Stock(row) => self.load_stock(row)?.map(|r| r.quantity),
            LedgerKey::Inventory { stocklist, row } => {
                self.load_inventory(stocklist, row)?.map(|r| r.quantity)
            }
        })
    }

    fn conditional_decrement(&mut self, key: &LedgerKey, amount: u64) -> Result<bool> {
        match key {
            LedgerKey::Stock(row) => {
                let mut current = self.load_stock(row)?.ok_or_else(|| Self::missing(key))?;
                if current.quantity < amount {
                    return Ok(false);
                }
                current.quantity -= amount;
                self.changes.stock.insert(*row, current);
            }
            LedgerKey::Inventory { stocklist, row } => {
                let mut current = self
                    .load_inventory(stocklist, row)?
                    .ok_or_else(|| Self::missing(key))?;
                if current.quantity < amount {
                    return Ok(false);
                }
                current.quantity -= amount;
                self.changes.inventory.insert((*stocklist, *row), current);
            }
        }

        tracing::debug!(%key, amount, "Row decremented");
        Ok(true)
    }

    fn upsert_increment(&mut self, key: &LedgerKey, amount: u64) -> Result<u64> {
        let overflow = || Error::Validation(format!("quantity overflow on {}", key));

        let quantity = match key {
            LedgerKey::Stock(row) => {
                let mut current = self.load_stock(row)?.ok_or_else(|| Self::missing(key))?;
                current.quantity = current.quantity.checked_add(amount).ok_or_else(overflow)?;
                self.changes.stock.insert(*row, current);
                current.quantity
            }
            LedgerKey::Inventory { stocklist, row } => {
                let mut current = self.load_inventory(stocklist, row)?.unwrap_or_default();
                current.quantity = current.quantity.checked_add(amount).ok_or_else(overflow)?;
                self.changes.inventory.insert((*stocklist, *row), current);
                current.quantity
            }
        };

        tracing::debug!(%key, amount, quantity, "Row incremented");
        Ok(quantity)
    }

    fn append(&mut self, draft: OrderDraft) -> Result<OrderRecord> {
        let record = OrderRecord::from_draft(draft)?;
        self.changes.orders.push(record.clone());
        Ok(record)
    }

    fn product_by_name(&mut self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>> {
        if let Some(staged) = self
            .changes
            .products
            .iter()
            .find(|p| p.owner == *owner && p.name == name)
        {
            return Ok(Some(staged.product_id));
        }
        self.source.load_product_by_name(owner, name)
    }

    fn insert_product(&mut self, product: Product, rows: Vec<(RowKey, StockRow)>) -> Result<()> {
        for (row, stock) in rows {
            if row.product_id != product.product_id {
                return Err(Error::Validation(format!(
                    "stock row {} does not belong to product {}",
                    row, product.product_id
                )));
            }
            self.changes.stock.insert(row, stock);
        }
        self.changes.products.push(product);
        Ok(())
    }

    fn update_product(&mut self, product: Product, created: Vec<(RowKey, StockRow)>) -> Result<()> {
        let current = self.product(product.product_id)?.ok_or(Error::ProductNotFound {
            line: None,
            product_id: product.product_id,
        })?;
        if current.owner != product.owner || current.name != product.name {
            return Err(Error::Validation(format!(
                "product {} cannot change owner or name",
                product.product_id
            )));
        }

        for (row, stock) in created {
            if row.product_id != product.product_id || row.variant_id.is_none() {
                return Err(Error::Validation(format!(
                    "stock row {} is not a variant of product {}",
                    row, product.product_id
                )));
            }
            if self.load_stock(&row)?.is_some() {
                return Err(Error::Validation(format!("stock row {} already exists", row)));
            }
            self.changes.stock.insert(row, stock);
        }

        match self
            .changes
            .products
            .iter_mut()
            .find(|p| p.product_id == product.product_id)
        {
            Some(staged) => *staged = product,
            None => self.changes.products.push(product),
        }
        Ok(())
    }

    fn set_price(&mut self, row: &RowKey, price: Decimal) -> Result<()> {
        check_price(price, &row.to_string())?;
        let mut current = self.load_stock(row)?.ok_or(Error::StockRowNotFound {
            line: None,
            row: *row,
        })?;
        current.unit_price = price;
        self.changes.stock.insert(*row, current);
        Ok(())
    }
}

/// Exclusive writer slot shared by every transaction of one store
#[derive(Debug)]
pub(crate) struct WriteLock {
    lock: Mutex<()>,
    timeout: Duration,
}

impl WriteLock {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            timeout,
        }
    }

    /// Acquire the slot or fail with a retryable conflict
    pub(crate) fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.try_lock_for(self.timeout).ok_or_else(|| {
            Error::Conflict(format!(
                "write lock not acquired within {}ms",
                self.timeout.as_millis()
            ))
        })
    }
}

/// Run `f` over a fresh changeset and hand its effects to `commit` on success
pub(crate) fn run_scoped<S, T, F, C>(source: &S, f: F, commit: C) -> Result<T>
where
    S: RowSource + ?Sized,
    F: FnOnce(&mut dyn LedgerTxn) -> Result<T>,
    C: FnOnce(Changes) -> Result<()>,
{
    let mut changeset = Changeset::new(source);
    match f(&mut changeset) {
        Ok(value) => {
            let changes = changeset.into_changes();
            if !changes.is_empty() {
                commit(changes)?;
            }
            Ok(value)
        }
        Err(err) => {
            tracing::debug!(error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}
