//! Main ledger interface
//!
//! Ties storage, the transfer engine, the actor and metrics together. Mutations
//! are funneled through the actor; reads go straight to RocksDB.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use stock_ledger::{Config, LineItem, Ledger, NewProduct, Principal, PrincipalId, Role};
//!
//! #[tokio::main]
//! async fn main() -> stock_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let owner = Principal::new(PrincipalId::generate(), Role::Owner);
//!     let stocklist = Principal::new(PrincipalId::generate(), Role::Stocklist);
//!
//!     let rice = ledger
//!         .register_product(owner, NewProduct::single("Rice", Decimal::new(500, 2), 10))
//!         .await?;
//!     let order = ledger
//!         .owner_purchase(stocklist, vec![LineItem::new(rice.product_id, 4)])
//!         .await?;
//!     assert_eq!(order.total_amount, Decimal::new(2000, 2));
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    catalog::{NewProduct, Product},
    metrics::Metrics,
    transfer::{inventory_snapshot, TransferEngine},
    txn::LedgerStore,
    types::{
        InventoryEntry, InventoryRow, LineItem, OrderId, OrderRecord, Principal, PrincipalId,
        ProductId, RowKey, StockRow, StocklistId, VariantId,
    },
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Transfer metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        let engine = TransferEngine::new(Arc::clone(&storage), &config.transfer)
            .with_metrics(metrics.clone());
        let handle = spawn_ledger_actor(engine, config.transfer.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = %config.data_dir.display(),
            "Ledger opened"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Actor handle, cloneable across tasks
    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Stocklist buys `items` from owner stock
    pub async fn owner_purchase(&self, buyer: Principal, items: Vec<LineItem>) -> Result<OrderRecord> {
        self.handle.owner_purchase(buyer, items).await
    }

    /// Customer buys `items` from `stocklist`'s inventory
    pub async fn customer_purchase(
        &self,
        buyer: Principal,
        stocklist: StocklistId,
        items: Vec<LineItem>,
    ) -> Result<OrderRecord> {
        self.handle.customer_purchase(buyer, stocklist, items).await
    }

    /// Owner adds a product, or adds stock and variants to one with the same name
    pub async fn register_product(&self, owner: Principal, product: NewProduct) -> Result<Product> {
        self.handle.register_product(owner, product).await
    }

    /// Owner adds stock, returning the new quantity on hand
    pub async fn restock(
        &self,
        owner: Principal,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u64,
    ) -> Result<u64> {
        self.handle
            .restock(owner, product_id, variant_id, quantity)
            .await
    }

    /// Owner changes a unit price
    pub async fn set_price(
        &self,
        owner: Principal,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        price: Decimal,
    ) -> Result<()> {
        self.handle
            .set_price(owner, product_id, variant_id, price)
            .await
    }

    /// Stocklist inventory joined with catalog names and current prices
    pub fn inventory_snapshot(&self, stocklist: &StocklistId) -> Result<Vec<InventoryEntry>> {
        inventory_snapshot(self.storage.as_ref(), stocklist)
    }

    /// Catalog entry
    pub fn get_product(&self, product_id: ProductId) -> Result<Product> {
        self.storage
            .product(product_id)?
            .ok_or(Error::ProductNotFound {
                line: None,
                product_id,
            })
    }

    /// Products of `owner`, newest first
    pub fn list_products(&self, owner: &PrincipalId) -> Result<Vec<Product>> {
        self.storage.products_for_owner(owner)
    }

    /// Owner Stock Row of a product or variant
    pub fn stock_level(&self, product_id: ProductId, variant_id: Option<VariantId>) -> Result<StockRow> {
        let row = self.get_product(product_id)?.resolve(variant_id)?.row;
        self.storage
            .stock_row(&row)?
            .ok_or(Error::StockRowNotFound { line: None, row })
    }

    /// Order by ID
    pub fn get_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>> {
        self.storage.order(order_id)
    }

    /// Orders placed by `buyer`, oldest first
    pub fn orders_for_buyer(&self, buyer: &PrincipalId) -> Result<Vec<OrderRecord>> {
        self.storage.orders_for_buyer(buyer)
    }

    /// Orders sold from `stocklist`'s inventory, oldest first
    pub fn orders_for_seller(&self, stocklist: &StocklistId) -> Result<Vec<OrderRecord>> {
        self.storage.orders_for_seller(stocklist)
    }

    /// Number of persisted orders
    pub fn order_count(&self) -> Result<u64> {
        self.storage.order_count()
    }

    /// Raw Inventory Rows of a stocklist
    pub fn inventory_rows(&self, stocklist: &StocklistId) -> Result<Vec<(RowKey, InventoryRow)>> {
        self.storage.inventory(stocklist)
    }

    /// Transfer metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    ///
    /// Waits for queued mutations to finish and for the actor to release storage.
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        tracing::info!("Ledger shut down");
        Ok(())
    }
}
