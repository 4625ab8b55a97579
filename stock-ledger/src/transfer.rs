//! Transfer engine
//!
//! Executes a purchase as one atomic unit against an injected [`LedgerStore`]:
//!
//! 1. Validate the request (no ledger access)
//! 2. Resolve every line to its canonical row and unit price
//! 3. In input order, conditionally decrement the source row of each line
//! 4. Owner purchases only: upsert-increment the buyer's Inventory Row
//! 5. Append one order record carrying the price snapshot and total
//!
//! Any error inside the transaction block discards every staged effect.
//! The engine never retries; a [`Conflict`](crate::Error::Conflict) is returned to the caller.

use crate::{
    catalog::{NewProduct, Product},
    config::TransferConfig,
    metrics::Metrics,
    txn::{LedgerStore, LedgerTxn, RowSource},
    types::{
        InventoryEntry, LedgerKey, LineItem, OrderDraft, OrderLine, OrderRecord, Principal,
        PrincipalId, ProductId, Role, RowKey, StocklistId, TransferKind, VariantId,
    },
    Error, Result,
};
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Where the goods of a transfer come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSource {
    /// Global owner Stock Ledger
    Owner,
    /// One stocklist's slice of the Inventory Ledger
    Stocklist(StocklistId),
}

impl TransferSource {
    /// Transfer kind recorded on the order
    pub fn kind(&self) -> TransferKind {
        match self {
            TransferSource::Owner => TransferKind::OwnerPurchase,
            TransferSource::Stocklist(_) => TransferKind::CustomerPurchase,
        }
    }

    /// Role a buyer needs to buy from this source
    pub fn buyer_role(&self) -> Role {
        match self {
            TransferSource::Owner => Role::Stocklist,
            TransferSource::Stocklist(_) => Role::Customer,
        }
    }

    fn key(&self, row: RowKey) -> LedgerKey {
        match self {
            TransferSource::Owner => LedgerKey::Stock(row),
            TransferSource::Stocklist(stocklist) => LedgerKey::Inventory {
                stocklist: *stocklist,
                row,
            },
        }
    }
}

/// Line item resolved against the catalog and the source ledger
#[derive(Debug, Clone)]
struct ResolvedLine {
    index: usize,
    source: LedgerKey,
    name: String,
    quantity: u64,
    unit_price: Decimal,
}

/// Orchestrates check-decrement-increment-append transfers
pub struct TransferEngine<S> {
    store: Arc<S>,
    max_line_items: usize,
    metrics: Option<Metrics>,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create an engine over `store`
    pub fn new(store: Arc<S>, config: &TransferConfig) -> Self {
        Self {
            store,
            max_line_items: config.max_line_items,
            metrics: None,
        }
    }

    /// Record outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stocklist buys from owner stock
    pub fn execute_owner_purchase(
        &self,
        buyer: &Principal,
        items: &[LineItem],
    ) -> Result<OrderRecord> {
        self.execute_transfer(buyer, TransferSource::Owner, items)
    }

    /// Customer buys from `stocklist`'s inventory
    pub fn execute_customer_purchase(
        &self,
        buyer: &Principal,
        stocklist: StocklistId,
        items: &[LineItem],
    ) -> Result<OrderRecord> {
        self.execute_transfer(buyer, TransferSource::Stocklist(stocklist), items)
    }

    /// Execute one transfer atomically
    pub fn execute_transfer(
        &self,
        buyer: &Principal,
        source: TransferSource,
        items: &[LineItem],
    ) -> Result<OrderRecord> {
        let started = Instant::now();
        let kind = source.kind();

        let result = self
            .validate(buyer, source, items)
            .and_then(|()| {
                self.store
                    .transaction(|txn| apply_transfer(txn, buyer.id, source, items))
            });

        match &result {
            Ok(order) => {
                tracing::info!(
                    order_id = %order.order_id,
                    buyer = %order.buyer,
                    kind = kind.label(),
                    lines = order.lines.len(),
                    total = %order.total_amount,
                    "Transfer committed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_transfer(kind, order.total_units(), started.elapsed().as_secs_f64());
                }
            }
            Err(err) => {
                tracing::warn!(
                    buyer = %buyer.id,
                    kind = kind.label(),
                    reason = err.kind().label(),
                    line = ?err.line(),
                    error = %err,
                    "Transfer rejected"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(err.kind());
                }
            }
        }

        result
    }

    fn validate(&self, buyer: &Principal, source: TransferSource, items: &[LineItem]) -> Result<()> {
        buyer.require(source.buyer_role())?;

        if buyer.id.is_nil() {
            return Err(Error::Validation("buyer id is required".to_string()));
        }
        if let TransferSource::Stocklist(stocklist) = source {
            if stocklist.is_nil() {
                return Err(Error::Validation("source stocklist id is required".to_string()));
            }
        }
        if items.is_empty() {
            return Err(Error::Validation("at least one line item is required".to_string()));
        }
        if items.len() > self.max_line_items {
            return Err(Error::Validation(format!(
                "{} line items exceed the limit of {}",
                items.len(),
                self.max_line_items
            )));
        }
        for (index, item) in items.iter().enumerate() {
            if item.product_id.is_nil() {
                return Err(Error::Validation(format!("line {}: product id is required", index)));
            }
            if item.quantity == 0 {
                return Err(Error::Validation(format!(
                    "line {}: quantity must be positive",
                    index
                )));
            }
        }
        Ok(())
    }
}

/// Owner stock operations
impl<S: LedgerStore> TransferEngine<S> {
    /// Add a product, or fold the request into the owner's product of the same name
    ///
    /// A new name creates the product and its Stock Rows. A known name reprices
    /// and tops up the matching rows and appends any new variants, all in one unit.
    pub fn register_product(&self, owner: &Principal, new: NewProduct) -> Result<Product> {
        owner.require(Role::Owner)?;

        let (product, merged) = self.store.transaction(move |txn| {
            let existing = match txn.product_by_name(&owner.id, new.name.trim())? {
                Some(product_id) => txn.product(product_id)?,
                None => None,
            };

            match existing {
                None => {
                    let (product, rows) = new.build(owner.id)?;
                    txn.insert_product(product.clone(), rows)?;
                    Ok((product, false))
                }
                Some(existing) => {
                    let merge = new.merge_into(&existing)?;
                    for restock in &merge.restocked {
                        txn.set_price(&restock.row, restock.price)?;
                        if restock.quantity > 0 {
                            txn.upsert_increment(&LedgerKey::Stock(restock.row), restock.quantity)?;
                        }
                    }
                    txn.update_product(merge.product.clone(), merge.created)?;
                    Ok((merge.product, true))
                }
            }
        })?;

        tracing::info!(
            product_id = %product.product_id,
            owner = %product.owner,
            variants = product.variants.len(),
            merged,
            "Product registered"
        );
        Ok(product)
    }

    /// Add `quantity` units to an owned Stock Row, returning the new quantity
    pub fn restock(
        &self,
        owner: &Principal,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u64,
    ) -> Result<u64> {
        owner.require(Role::Owner)?;
        if quantity == 0 {
            return Err(Error::Validation("restock quantity must be positive".to_string()));
        }

        let on_hand = self.store.transaction(|txn| {
            let row = owned_row(txn, owner, product_id, variant_id)?;
            txn.upsert_increment(&LedgerKey::Stock(row), quantity)
        })?;

        tracing::info!(%product_id, variant_id = ?variant_id, quantity, on_hand, "Stock added");
        Ok(on_hand)
    }

    /// Replace the unit price of an owned Stock Row
    pub fn set_price(
        &self,
        owner: &Principal,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        price: Decimal,
    ) -> Result<()> {
        owner.require(Role::Owner)?;

        self.store.transaction(|txn| {
            let row = owned_row(txn, owner, product_id, variant_id)?;
            txn.set_price(&row, price)
        })?;

        tracing::info!(%product_id, variant_id = ?variant_id, %price, "Price updated");
        Ok(())
    }

    /// Inventory of `stocklist` joined with catalog names and current prices
    pub fn inventory_snapshot(&self, stocklist: &StocklistId) -> Result<Vec<InventoryEntry>> {
        inventory_snapshot(self.store.as_ref(), stocklist)
    }
}

/// Resolve a row of a product `owner` owns
fn owned_row(
    txn: &mut dyn LedgerTxn,
    owner: &Principal,
    product_id: ProductId,
    variant_id: Option<VariantId>,
) -> Result<RowKey> {
    let product = txn.product(product_id)?.ok_or(Error::ProductNotFound {
        line: None,
        product_id,
    })?;
    if product.owner != owner.id {
        return Err(Error::Forbidden(format!(
            "product {} is not owned by {}",
            product_id, owner.id
        )));
    }
    Ok(product.resolve(variant_id)?.row)
}

/// Read-only projection of a stocklist's Inventory Rows
///
/// Rows are returned in row key order. Names and prices come from the catalog
/// and Stock Rows as they are now, not as they were at purchase time. Every
/// read goes through one [`LedgerStore::read_view`], so quantities and prices
/// belong to the same committed state.
pub fn inventory_snapshot<S: LedgerStore + ?Sized>(
    store: &S,
    stocklist: &StocklistId,
) -> Result<Vec<InventoryEntry>> {
    store.read_view(|view| {
        let mut products: HashMap<ProductId, Product> = HashMap::new();
        let mut entries = Vec::new();

        for (row, inventory) in view.load_inventory_rows(stocklist)? {
            let product = match products.entry(row.product_id) {
                Entry::Occupied(cached) => cached.into_mut(),
                Entry::Vacant(slot) => {
                    let product = view.load_product(row.product_id)?.ok_or(Error::ProductNotFound {
                        line: None,
                        product_id: row.product_id,
                    })?;
                    slot.insert(product)
                }
            };
            let catalog = product.resolve(row.variant_id)?;
            let stock = view
                .load_stock(&row)?
                .ok_or(Error::StockRowNotFound { line: None, row })?;

            entries.push(InventoryEntry {
                product_id: row.product_id,
                variant_id: row.variant_id,
                name: catalog.name,
                variant_name: catalog.variant_name,
                price: stock.unit_price,
                quantity: inventory.quantity,
            });
        }

        Ok(entries)
    })
}

/// Body of the transfer transaction
fn apply_transfer(
    txn: &mut dyn LedgerTxn,
    buyer: PrincipalId,
    source: TransferSource,
    items: &[LineItem],
) -> Result<OrderRecord> {
    let mut resolved = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        resolved.push(resolve_line(&mut *txn, source, index, item)?);
    }

    for line in &resolved {
        let applied = txn
            .conditional_decrement(&line.source, line.quantity)
            .map_err(|e| e.at_line(line.index))?;
        if !applied {
            let available = txn.quantity(&line.source)?.unwrap_or(0);
            return Err(Error::InsufficientStock {
                line: line.index,
                row: line.source.row(),
                requested: line.quantity,
                available,
            });
        }

        if source == TransferSource::Owner {
            let destination = LedgerKey::Inventory {
                stocklist: buyer,
                row: line.source.row(),
            };
            txn.upsert_increment(&destination, line.quantity)?;
        }
    }

    let seller_stocklist = match source {
        TransferSource::Owner => None,
        TransferSource::Stocklist(stocklist) => Some(stocklist),
    };

    txn.append(OrderDraft {
        buyer,
        seller_stocklist,
        kind: source.kind(),
        lines: resolved
            .into_iter()
            .map(|line| {
                let row = line.source.row();
                OrderLine {
                    product_id: row.product_id,
                    variant_id: row.variant_id,
                    name: line.name,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                }
            })
            .collect(),
    })
}

/// Resolve a line to its source row and current price
fn resolve_line(
    txn: &mut dyn LedgerTxn,
    source: TransferSource,
    index: usize,
    item: &LineItem,
) -> Result<ResolvedLine> {
    let product = txn
        .product(item.product_id)?
        .ok_or(Error::ProductNotFound {
            line: Some(index),
            product_id: item.product_id,
        })?;
    let catalog = product
        .resolve(item.variant_id)
        .map_err(|e| e.at_line(index))?;

    let stock = txn
        .stock_row(&catalog.row)?
        .ok_or(Error::StockRowNotFound {
            line: Some(index),
            row: catalog.row,
        })?;

    let key = source.key(catalog.row);
    if let LedgerKey::Inventory { stocklist, row } = key {
        if txn.quantity(&key)?.is_none() {
            return Err(Error::InventoryRowNotFound {
                line: Some(index),
                stocklist,
                row,
            });
        }
    }

    Ok(ResolvedLine {
        index,
        source: key,
        name: catalog.display_name(),
        quantity: item.quantity,
        unit_price: stock.unit_price,
    })
}
