//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `products`  - Catalog entries (key: product_id)
//! - `stock`     - Owner Stock Rows (key: row_key)
//! - `inventory` - Stocklist Inventory Rows (key: stocklist_id || row_key)
//! - `orders`    - Append-only order records (key: order_id, UUIDv7 so time-ordered)
//! - `indices`   - Secondary indices for product names and order lookups
//!
//! Every transaction is staged in a [`Changeset`](crate::txn::Changeset) and written
//! with a single `WriteBatch`, so a transfer's stock decrements, inventory increments
//! and order append land together or not at all.

use crate::{
    catalog::Product,
    error::{Error, Result},
    txn::{run_scoped, Changes, LedgerStore, LedgerTxn, RowSource, WriteLock},
    types::{
        uuid_at, InventoryRow, LedgerKey, OrderId, OrderRecord, PrincipalId, ProductId, RowKey,
        StockRow, StocklistId,
    },
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, ReadOptions,
    Snapshot, WriteBatch, WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_PRODUCTS: &str = "products";
const CF_STOCK: &str = "stock";
const CF_INVENTORY: &str = "inventory";
const CF_ORDERS: &str = "orders";
const CF_INDICES: &str = "indices";

/// Index key tags
const IDX_PRODUCT_NAME: u8 = b'N';
const IDX_BUYER_ORDER: u8 = b'B';
const IDX_SELLER_ORDER: u8 = b'S';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    write_lock: WriteLock,
    sync_writes: bool,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PRODUCTS, Self::cf_options_catalog()),
            ColumnFamilyDescriptor::new(CF_STOCK, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_INVENTORY, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_ORDERS, Self::cf_options_orders()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB stock ledger");

        Ok(Self {
            db: Arc::new(db),
            write_lock: WriteLock::new(config.transfer.lock_timeout()),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_catalog() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are hot and small, point lookups dominate
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_orders() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn read_options(snapshot: Option<&Snapshot<'_>>) -> ReadOptions {
        let mut opts = ReadOptions::default();
        if let Some(snapshot) = snapshot {
            opts.set_snapshot(snapshot);
        }
        opts
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        cf: &str,
        key: &[u8],
        snapshot: Option<&Snapshot<'_>>,
    ) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf_opt(cf, key, &Self::read_options(snapshot))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Keys and values of `cf` starting with `prefix`, in key order
    fn scan_prefix(
        &self,
        cf: &str,
        prefix: &[u8],
        snapshot: Option<&Snapshot<'_>>,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf)?;
        let iter = self.db.iterator_cf_opt(
            cf,
            Self::read_options(snapshot),
            IteratorMode::From(prefix, Direction::Forward),
        );

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn orders_by_index(&self, tag: u8, principal: &PrincipalId) -> Result<Vec<OrderRecord>> {
        let prefix = Self::index_key_order(tag, principal, None);
        let mut orders = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix, None)? {
            let order_id = OrderId::from_uuid(uuid_at(&key, prefix.len())?);
            let order = self.order(&order_id)?.ok_or_else(|| {
                Error::Storage(format!("index points at missing order {}", order_id))
            })?;
            orders.push(order);
        }
        Ok(orders)
    }

    /// Apply staged effects in one atomic write
    fn commit(&self, changes: Changes) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Catalog entries and their name index
        let cf_products = self.cf_handle(CF_PRODUCTS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for product in &changes.products {
            batch.put_cf(
                cf_products,
                product.product_id.as_bytes(),
                bincode::serialize(product)?,
            );
            batch.put_cf(
                cf_indices,
                Self::index_key_product_name(&product.owner, &product.name),
                product.product_id.as_bytes(),
            );
        }

        // 2. Stock Rows
        let cf_stock = self.cf_handle(CF_STOCK)?;
        for (row, stock) in &changes.stock {
            batch.put_cf(cf_stock, row.encode(), bincode::serialize(stock)?);
        }

        // 3. Inventory Rows
        let cf_inventory = self.cf_handle(CF_INVENTORY)?;
        for ((stocklist, row), inventory) in &changes.inventory {
            batch.put_cf(
                cf_inventory,
                LedgerKey::encode_inventory(stocklist, row),
                bincode::serialize(inventory)?,
            );
        }

        // 4. Orders and their indices
        let cf_orders = self.cf_handle(CF_ORDERS)?;
        for order in &changes.orders {
            batch.put_cf(cf_orders, order.order_id.as_bytes(), bincode::serialize(order)?);
            batch.put_cf(
                cf_indices,
                Self::index_key_order(IDX_BUYER_ORDER, &order.buyer, Some(&order.order_id)),
                b"",
            );
            if let Some(seller) = &order.seller_stocklist {
                batch.put_cf(
                    cf_indices,
                    Self::index_key_order(IDX_SELLER_ORDER, seller, Some(&order.order_id)),
                    b"",
                );
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(
            stock_rows = changes.stock.len(),
            inventory_rows = changes.inventory.len(),
            orders = changes.orders.len(),
            "Transaction committed"
        );

        Ok(())
    }

    // Index key helpers

    fn index_key_product_name(owner: &PrincipalId, name: &str) -> Vec<u8> {
        let mut key = vec![IDX_PRODUCT_NAME];
        key.extend_from_slice(owner.as_bytes());
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn index_key_order(tag: u8, principal: &PrincipalId, order_id: Option<&OrderId>) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(principal.as_bytes());
        if let Some(order_id) = order_id {
            key.extend_from_slice(order_id.as_bytes());
        }
        key
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }

    fn product_id_by_name(
        &self,
        owner: &PrincipalId,
        name: &str,
        snapshot: Option<&Snapshot<'_>>,
    ) -> Result<Option<ProductId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_product_name(owner, name);
        match self.db.get_cf_opt(cf, key, &Self::read_options(snapshot))? {
            Some(value) => Ok(Some(ProductId::from_uuid(uuid_at(&value, 0)?))),
            None => Ok(None),
        }
    }

    fn inventory_rows(
        &self,
        stocklist: &StocklistId,
        snapshot: Option<&Snapshot<'_>>,
    ) -> Result<Vec<(RowKey, InventoryRow)>> {
        let prefix = stocklist.as_bytes();
        self.scan_prefix(CF_INVENTORY, prefix, snapshot)?
            .into_iter()
            .map(|(key, value)| {
                let row = key.get(prefix.len()..).ok_or_else(|| {
                    Error::Storage(format!("inventory key too short: {} bytes", key.len()))
                })?;
                Ok((RowKey::decode(row)?, bincode::deserialize(&value)?))
            })
            .collect()
    }
}

impl RowSource for Storage {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.get(CF_PRODUCTS, product_id.as_bytes(), None)
    }

    fn load_product_by_name(&self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>> {
        self.product_id_by_name(owner, name, None)
    }

    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>> {
        self.get(CF_STOCK, &row.encode(), None)
    }

    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>> {
        self.get(CF_INVENTORY, &LedgerKey::encode_inventory(stocklist, row), None)
    }

    fn load_inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        self.inventory_rows(stocklist, None)
    }
}

/// Committed state as of one RocksDB snapshot
struct SnapshotView<'a> {
    storage: &'a Storage,
    snapshot: Snapshot<'a>,
}

impl RowSource for SnapshotView<'_> {
    fn load_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.storage
            .get(CF_PRODUCTS, product_id.as_bytes(), Some(&self.snapshot))
    }

    fn load_product_by_name(&self, owner: &PrincipalId, name: &str) -> Result<Option<ProductId>> {
        self.storage
            .product_id_by_name(owner, name, Some(&self.snapshot))
    }

    fn load_stock(&self, row: &RowKey) -> Result<Option<StockRow>> {
        self.storage.get(CF_STOCK, &row.encode(), Some(&self.snapshot))
    }

    fn load_inventory(&self, stocklist: &StocklistId, row: &RowKey) -> Result<Option<InventoryRow>> {
        self.storage.get(
            CF_INVENTORY,
            &LedgerKey::encode_inventory(stocklist, row),
            Some(&self.snapshot),
        )
    }

    fn load_inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        self.storage.inventory_rows(stocklist, Some(&self.snapshot))
    }
}

impl LedgerStore for Storage {
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
        let view = SnapshotView {
            storage: self,
            snapshot: self.db.snapshot(),
        };
        f(&view)
    }

    fn product(&self, product_id: ProductId) -> Result<Option<Product>> {
        self.load_product(product_id)
    }

    fn products_for_owner(&self, owner: &PrincipalId) -> Result<Vec<Product>> {
        let snapshot = self.db.snapshot();
        let prefix = Self::index_key_product_name(owner, "");

        let mut products: Vec<Product> = Vec::new();
        for (_, value) in self.scan_prefix(CF_INDICES, &prefix, Some(&snapshot))? {
            let product_id = ProductId::from_uuid(uuid_at(&value, 0)?);
            let product = self
                .get(CF_PRODUCTS, product_id.as_bytes(), Some(&snapshot))?
                .ok_or_else(|| {
                    Error::Storage(format!("index points at missing product {}", product_id))
                })?;
            products.push(product);
        }

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
        self.inventory_rows(stocklist, None)
    }

    fn order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>> {
        self.get(CF_ORDERS, order_id.as_bytes(), None)
    }

    fn orders_for_buyer(&self, buyer: &PrincipalId) -> Result<Vec<OrderRecord>> {
        self.orders_by_index(IDX_BUYER_ORDER, buyer)
    }

    fn orders_for_seller(&self, stocklist: &StocklistId) -> Result<Vec<OrderRecord>> {
        self.orders_by_index(IDX_SELLER_ORDER, stocklist)
    }

    fn order_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ORDERS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
