//! Product catalog and line resolution
//!
//! The catalog only carries what transfers need: ownership, display names and
//! the variant layout that decides which row a line item resolves to. Prices and
//! quantities live in the Stock Rows.

use crate::types::{PrincipalId, ProductId, RowKey, StockRow, VariantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product ID
    pub product_id: ProductId,
    /// Owning principal (never changes)
    pub owner: PrincipalId,
    /// Name, unique per owner
    pub name: String,
    /// Variants; empty means stock is tracked at the product level
    pub variants: Vec<Variant>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Priced sub-unit of a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant ID
    pub variant_id: VariantId,
    /// Name, e.g. "kg" or "litre"
    pub name: String,
}

/// Catalog line a line item resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLine {
    /// Canonical row key
    pub row: RowKey,
    /// Product name
    pub name: String,
    /// Variant name
    pub variant_name: Option<String>,
}

impl CatalogLine {
    /// Name captured on order lines
    pub fn display_name(&self) -> String {
        match &self.variant_name {
            Some(variant) => format!("{} ({})", self.name, variant),
            None => self.name.clone(),
        }
    }
}

impl Product {
    /// Whether stock is tracked per variant
    pub fn tracks_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Resolve an optional variant to the canonical row key
    pub fn resolve(&self, variant_id: Option<VariantId>) -> Result<CatalogLine> {
        match (variant_id, self.tracks_variants()) {
            (None, false) => Ok(CatalogLine {
                row: RowKey::product(self.product_id),
                name: self.name.clone(),
                variant_name: None,
            }),
            (None, true) => Err(Error::VariantRequired {
                line: None,
                product_id: self.product_id,
            }),
            (Some(variant_id), _) => {
                let variant = self
                    .variants
                    .iter()
                    .find(|v| v.variant_id == variant_id)
                    .ok_or(Error::VariantNotFound {
                        line: None,
                        product_id: self.product_id,
                        variant_id,
                    })?;
                Ok(CatalogLine {
                    row: RowKey::variant(self.product_id, variant_id),
                    name: self.name.clone(),
                    variant_name: Some(variant.name.clone()),
                })
            }
        }
    }
}

/// Owner request to add a product to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    /// Product name
    pub name: String,
    /// Initial stock layout
    pub stock: NewStock,
}

/// Initial stock of a new product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewStock {
    /// Stock tracked at the product level
    Single {
        /// Unit price
        price: Decimal,
        /// Quantity on hand
        quantity: u64,
    },
    /// Stock tracked per variant
    Variants(Vec<NewVariant>),
}

/// Variant of a new product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    /// Variant name
    pub name: String,
    /// Unit price
    pub price: Decimal,
    /// Quantity on hand
    pub quantity: u64,
}

impl NewProduct {
    /// Product-level stock
    pub fn single(name: impl Into<String>, price: Decimal, quantity: u64) -> Self {
        Self {
            name: name.into(),
            stock: NewStock::Single { price, quantity },
        }
    }

    /// Per-variant stock
    pub fn with_variants(name: impl Into<String>, variants: Vec<NewVariant>) -> Self {
        Self {
            name: name.into(),
            stock: NewStock::Variants(variants),
        }
    }

    /// Validate and build the product plus its initial Stock Rows
    pub fn build(self, owner: PrincipalId) -> Result<(Product, Vec<(RowKey, StockRow)>)> {
        let name = checked_name(&self.name)?;

        let product_id = ProductId::generate();
        let (variants, rows) = match self.stock {
            NewStock::Single { price, quantity } => {
                check_price(price, &name)?;
                let row = StockRow {
                    quantity,
                    unit_price: price,
                };
                (Vec::new(), vec![(RowKey::product(product_id), row)])
            }
            NewStock::Variants(new_variants) => {
                let mut variants = Vec::new();
                let mut rows = Vec::new();
                for v in checked_variants(&name, new_variants)? {
                    let variant_id = VariantId::generate();
                    rows.push((
                        RowKey::variant(product_id, variant_id),
                        StockRow {
                            quantity: v.quantity,
                            unit_price: v.price,
                        },
                    ));
                    variants.push(Variant {
                        variant_id,
                        name: v.name,
                    });
                }
                (variants, rows)
            }
        };

        let product = Product {
            product_id,
            owner,
            name,
            variants,
            created_at: Utc::now(),
        };
        Ok((product, rows))
    }

    /// Fold this request into `existing`, a product of the same owner and name
    ///
    /// Rows that already exist get the requested price and have the quantity
    /// added. Variants with a new name are appended with fresh Stock Rows.
    /// Switching between product-level and per-variant stock is rejected.
    pub fn merge_into(self, existing: &Product) -> Result<ProductMerge> {
        let name = checked_name(&self.name)?;
        if name != existing.name {
            return Err(Error::Validation(format!(
                "product {} cannot be merged into {}",
                name, existing.name
            )));
        }

        let mut product = existing.clone();
        let mut restocked = Vec::new();
        let mut created = Vec::new();

        match (self.stock, existing.tracks_variants()) {
            (NewStock::Single { price, quantity }, false) => {
                check_price(price, &name)?;
                restocked.push(RowRestock {
                    row: RowKey::product(product.product_id),
                    price,
                    quantity,
                });
            }
            (NewStock::Variants(new_variants), true) => {
                for v in checked_variants(&name, new_variants)? {
                    match product.variants.iter().find(|known| known.name == v.name) {
                        Some(known) => restocked.push(RowRestock {
                            row: RowKey::variant(product.product_id, known.variant_id),
                            price: v.price,
                            quantity: v.quantity,
                        }),
                        None => {
                            let variant_id = VariantId::generate();
                            created.push((
                                RowKey::variant(product.product_id, variant_id),
                                StockRow {
                                    quantity: v.quantity,
                                    unit_price: v.price,
                                },
                            ));
                            product.variants.push(Variant {
                                variant_id,
                                name: v.name,
                            });
                        }
                    }
                }
            }
            (NewStock::Single { .. }, true) => {
                return Err(Error::Validation(format!(
                    "product {} tracks stock per variant",
                    name
                )));
            }
            (NewStock::Variants(_), false) => {
                return Err(Error::Validation(format!(
                    "product {} tracks stock at the product level",
                    name
                )));
            }
        }

        Ok(ProductMerge {
            product,
            restocked,
            created,
        })
    }
}

/// Effect of an add-product request on an existing product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMerge {
    /// Catalog entry after the merge
    pub product: Product,
    /// Existing Stock Rows to reprice and top up
    pub restocked: Vec<RowRestock>,
    /// Stock Rows of newly added variants
    pub created: Vec<(RowKey, StockRow)>,
}

/// Price and quantity to apply to an existing Stock Row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRestock {
    /// Stock Row
    pub row: RowKey,
    /// New unit price
    pub price: Decimal,
    /// Units to add
    pub quantity: u64,
}

fn checked_name(raw: &str) -> Result<String> {
    let name = raw.trim().to_string();
    if name.is_empty() {
        return Err(Error::Validation("product name is required".to_string()));
    }
    Ok(name)
}

/// Trimmed, uniquely named, non-negatively priced variants
fn checked_variants(product: &str, new_variants: Vec<NewVariant>) -> Result<Vec<NewVariant>> {
    if new_variants.is_empty() {
        return Err(Error::Validation(format!(
            "product {} declares variant stock without variants",
            product
        )));
    }

    let mut checked: Vec<NewVariant> = Vec::with_capacity(new_variants.len());
    for (i, v) in new_variants.into_iter().enumerate() {
        let name = v.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation(format!("variants[{}].name is required", i)));
        }
        if checked.iter().any(|existing| existing.name == name) {
            return Err(Error::Validation(format!(
                "variants[{}].name {} is repeated",
                i, name
            )));
        }
        check_price(v.price, &name)?;
        checked.push(NewVariant { name, ..v });
    }
    Ok(checked)
}

/// Prices are never negative
pub(crate) fn check_price(price: Decimal, what: &str) -> Result<()> {
    if price < Decimal::ZERO {
        return Err(Error::Validation(format!(
            "price of {} must not be negative",
            what
        )));
    }
    Ok(())
}
