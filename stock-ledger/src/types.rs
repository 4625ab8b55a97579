//! Core types for the stock ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for prices and totals)
//! - Stable byte keys for RocksDB column families

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a new time-ordered ID
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            /// Underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Raw key bytes
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// True for the all-zero ID
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Authenticated user (owner, stocklist or customer)
    PrincipalId
);
uuid_id!(
    /// Catalog product
    ProductId
);
uuid_id!(
    /// Priced sub-unit of a product
    VariantId
);
uuid_id!(
    /// Persisted order record
    OrderId
);

/// A stocklist is identified by its principal ID
pub type StocklistId = PrincipalId;

/// Role carried by an authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Holds master stock and the catalog
    Owner,
    /// Buys from the owner, sells to customers
    Stocklist,
    /// Buys from a stocklist
    Customer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Owner => "owner",
            Role::Stocklist => "stocklist",
            Role::Customer => "customer",
        };
        f.write_str(name)
    }
}

/// Authenticated principal, produced by the identity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal ID
    pub id: PrincipalId,
    /// Verified role
    pub role: Role,
}

impl Principal {
    /// Create a principal
    pub fn new(id: PrincipalId, role: Role) -> Self {
        Self { id, role }
    }

    /// Fail with `Forbidden` unless the principal has `role`
    pub fn require(&self, role: Role) -> Result<()> {
        if self.role != role {
            return Err(Error::Forbidden(format!(
                "principal {} has role {}, requires {}",
                self.id, self.role, role
            )));
        }
        Ok(())
    }
}

/// Canonical key of a stock-tracked catalog line
///
/// Products without variants are tracked at the product level (`variant_id == None`),
/// products with variants are tracked per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    /// Product
    pub product_id: ProductId,
    /// Variant, if the product tracks stock per variant
    pub variant_id: Option<VariantId>,
}

impl RowKey {
    /// Encoded length of a product-level key
    pub const PRODUCT_LEN: usize = 17;
    /// Encoded length of a variant-level key
    pub const VARIANT_LEN: usize = 33;

    /// Product-level key
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    /// Variant-level key
    pub fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }

    /// Encode as `product_id || tag [|| variant_id]`
    pub fn encode(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(Self::VARIANT_LEN);
        key.extend_from_slice(self.product_id.as_bytes());
        match self.variant_id {
            Some(variant_id) => {
                key.push(1);
                key.extend_from_slice(variant_id.as_bytes());
            }
            None => key.push(0),
        }
        key
    }

    /// Decode a key produced by [`RowKey::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let product_id = ProductId::from_uuid(uuid_at(bytes, 0)?);
        match (bytes.get(16), bytes.len()) {
            (Some(0), Self::PRODUCT_LEN) => Ok(Self::product(product_id)),
            (Some(1), Self::VARIANT_LEN) => Ok(Self::variant(
                product_id,
                VariantId::from_uuid(uuid_at(bytes, 17)?),
            )),
            _ => Err(Error::Storage(format!(
                "malformed row key of {} bytes",
                bytes.len()
            ))),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(variant_id) => write!(f, "{}/{}", self.product_id, variant_id),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Read a UUID from `bytes[offset..offset + 16]`
pub(crate) fn uuid_at(bytes: &[u8], offset: usize) -> Result<Uuid> {
    bytes
        .get(offset..offset + 16)
        .and_then(|slice| <[u8; 16]>::try_from(slice).ok())
        .map(Uuid::from_bytes)
        .ok_or_else(|| Error::Storage(format!("key too short: {} bytes", bytes.len())))
}

/// Address of a mutable quantity row in either ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerKey {
    /// Owner Stock Row
    Stock(RowKey),
    /// Stocklist Inventory Row
    Inventory {
        /// Holding stocklist
        stocklist: StocklistId,
        /// Catalog line
        row: RowKey,
    },
}

impl LedgerKey {
    /// Catalog line this row tracks
    pub fn row(&self) -> RowKey {
        match self {
            LedgerKey::Stock(row) => *row,
            LedgerKey::Inventory { row, .. } => *row,
        }
    }

    /// Encode an inventory key as `stocklist_id || row_key`
    pub fn encode_inventory(stocklist: &StocklistId, row: &RowKey) -> Vec<u8> {
        let mut key = Vec::with_capacity(16 + RowKey::VARIANT_LEN);
        key.extend_from_slice(stocklist.as_bytes());
        key.extend_from_slice(&row.encode());
        key
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKey::Stock(row) => write!(f, "stock:{}", row),
            LedgerKey::Inventory { stocklist, row } => write!(f, "inventory:{}:{}", stocklist, row),
        }
    }
}

/// Owner quantity-on-hand and unit price for one catalog line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    /// Quantity on hand (never negative)
    pub quantity: u64,
    /// Unit price (never negative)
    pub unit_price: Decimal,
}

/// Stocklist quantity-on-hand for one catalog line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InventoryRow {
    /// Quantity on hand (never negative)
    pub quantity: u64,
}

/// Requested line of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product
    pub product_id: ProductId,
    /// Variant, for products that track stock per variant
    pub variant_id: Option<VariantId>,
    /// Requested quantity (must be positive)
    pub quantity: u64,
}

impl LineItem {
    /// Product-level line
    pub fn new(product_id: ProductId, quantity: u64) -> Self {
        Self {
            product_id,
            variant_id: None,
            quantity,
        }
    }

    /// Variant-level line
    pub fn variant(product_id: ProductId, variant_id: VariantId, quantity: u64) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
            quantity,
        }
    }
}

/// Transfer kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferKind {
    /// Stocklist buys from owner stock
    OwnerPurchase = 1,
    /// Customer buys from a stocklist's inventory
    CustomerPurchase = 2,
}

impl TransferKind {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            TransferKind::OwnerPurchase => "owner_purchase",
            TransferKind::CustomerPurchase => "customer_purchase",
        }
    }
}

/// One line of an order, with the price captured at transaction time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Product
    pub product_id: ProductId,
    /// Variant
    pub variant_id: Option<VariantId>,
    /// Display name at transaction time
    pub name: String,
    /// Quantity transferred
    pub quantity: u64,
    /// Unit price snapshot
    pub unit_price: Decimal,
}

impl OrderLine {
    /// `quantity * unit_price`
    pub fn subtotal(&self) -> Result<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| Error::Validation(format!("subtotal overflow for {}", self.name)))
    }
}

/// Order contents before it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    /// Buyer
    pub buyer: PrincipalId,
    /// Selling stocklist (customer purchases only)
    pub seller_stocklist: Option<StocklistId>,
    /// Transfer kind
    pub kind: TransferKind,
    /// Lines in request order
    pub lines: Vec<OrderLine>,
}

impl OrderDraft {
    /// Σ quantity × unit price
    pub fn total_amount(&self) -> Result<Decimal> {
        self.lines.iter().try_fold(Decimal::ZERO, |total, line| {
            total
                .checked_add(line.subtotal()?)
                .ok_or_else(|| Error::Validation("order total overflow".to_string()))
        })
    }
}

/// Immutable record of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order ID (UUIDv7, time-ordered)
    pub order_id: OrderId,
    /// Buyer
    pub buyer: PrincipalId,
    /// Selling stocklist (customer purchases only)
    pub seller_stocklist: Option<StocklistId>,
    /// Lines in request order
    pub lines: Vec<OrderLine>,
    /// Σ quantity × unit price
    pub total_amount: Decimal,
    /// Transfer kind
    pub kind: TransferKind,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Stamp a draft with an ID, timestamp and total
    pub fn from_draft(draft: OrderDraft) -> Result<Self> {
        let total_amount = draft.total_amount()?;
        Ok(Self {
            order_id: OrderId::generate(),
            buyer: draft.buyer,
            seller_stocklist: draft.seller_stocklist,
            lines: draft.lines,
            total_amount,
            kind: draft.kind,
            created_at: Utc::now(),
        })
    }

    /// Total units across all lines
    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// Dashboard projection of one Inventory Row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Product
    pub product_id: ProductId,
    /// Variant
    pub variant_id: Option<VariantId>,
    /// Product name
    pub name: String,
    /// Variant name
    pub variant_name: Option<String>,
    /// Current catalog price
    pub price: Decimal,
    /// Quantity held by the stocklist
    pub quantity: u64,
}
