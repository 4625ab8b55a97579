//! Stock Ledger
//!
//! Atomic stock transfers for a two-tier supply chain: an owner holds master
//! stock, stocklists buy from it into their own inventory, customers buy from a
//! stocklist's inventory.
//!
//! # Architecture
//!
//! - **Scoped transactions**: a transfer is one block that commits on `Ok` and rolls back on `Err`
//! - **Conditional decrements**: stock is only taken when enough is on hand at write time
//! - **Single writer**: one actor task serializes every mutation
//! - **Pluggable store**: RocksDB in production, in-memory for tests
//!
//! # Invariants
//!
//! - Quantities never go negative
//! - Stock decrement, inventory increment and order append are visible together or not at all
//! - Order total == Σ(quantity × unit price at transfer time)
//! - Orders are append-only

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    clippy::all
)]

pub mod actor;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod storage;
pub mod transfer;
pub mod txn;
pub mod types;

// Re-exports
pub use catalog::{NewProduct, NewStock, NewVariant, Product, Variant};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ledger::Ledger;
pub use memory::MemoryStore;
pub use metrics::Metrics;
pub use storage::Storage;
pub use transfer::{TransferEngine, TransferSource};
pub use txn::{LedgerStore, LedgerTxn, RowSource};
pub use types::{
    InventoryEntry, InventoryRow, LineItem, OrderId, OrderLine, OrderRecord, Principal,
    PrincipalId, ProductId, Role, RowKey, StockRow, StocklistId, TransferKind, VariantId,
};
