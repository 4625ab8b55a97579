//! Error types for the stock ledger

use crate::types::{ProductId, RowKey, StocklistId, VariantId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Principal lacks the required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced product does not exist
    #[error("Product not found: {product_id} (line {line:?})")]
    ProductNotFound {
        /// Offending line, if raised by a transfer
        line: Option<usize>,
        /// Missing product
        product_id: ProductId,
    },

    /// Referenced variant does not exist on the product
    #[error("Variant not found: {product_id}/{variant_id} (line {line:?})")]
    VariantNotFound {
        /// Offending line, if raised by a transfer
        line: Option<usize>,
        /// Product
        product_id: ProductId,
        /// Missing variant
        variant_id: VariantId,
    },

    /// Product tracks stock per variant but no variant was given
    #[error("Product {product_id} tracks stock per variant, no product-level row (line {line:?})")]
    VariantRequired {
        /// Offending line, if raised by a transfer
        line: Option<usize>,
        /// Product
        product_id: ProductId,
    },

    /// Stock Row missing for a resolved catalog line
    #[error("Stock row not found: {row}")]
    StockRowNotFound {
        /// Offending line, if raised by a transfer
        line: Option<usize>,
        /// Missing row
        row: RowKey,
    },

    /// Stocklist holds no inventory for the catalog line
    #[error("Inventory row not found: stocklist {stocklist} has no {row} (line {line:?})")]
    InventoryRowNotFound {
        /// Offending line, if raised by a transfer
        line: Option<usize>,
        /// Stocklist
        stocklist: StocklistId,
        /// Catalog line
        row: RowKey,
    },

    /// Requested quantity exceeds quantity on hand
    #[error("Insufficient stock on line {line} for {row}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Offending line (input order)
        line: usize,
        /// Catalog line
        row: RowKey,
        /// Requested quantity
        requested: u64,
        /// Quantity on hand when the line was checked
        available: u64,
    },

    /// Commit could not proceed due to contention (retryable)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request, no ledger access attempted
    Validation,
    /// Role mismatch, no ledger access attempted
    Forbidden,
    /// Referenced product/variant/inventory row missing
    NotFound,
    /// Requested quantity exceeds quantity on hand
    InsufficientStock,
    /// Contention on commit, retryable
    Conflict,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::ProductNotFound { .. }
            | Error::VariantNotFound { .. }
            | Error::VariantRequired { .. }
            | Error::StockRowNotFound { .. }
            | Error::InventoryRowNotFound { .. } => ErrorKind::NotFound,
            Error::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may safely retry
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Offending line item (input order), when attributable to one
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::ProductNotFound { line, .. }
            | Error::VariantNotFound { line, .. }
            | Error::VariantRequired { line, .. }
            | Error::StockRowNotFound { line, .. }
            | Error::InventoryRowNotFound { line, .. } => *line,
            Error::InsufficientStock { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Attach a line index to a not-found error raised outside a transfer context
    pub(crate) fn at_line(mut self, index: usize) -> Self {
        match &mut self {
            Error::ProductNotFound { line, .. }
            | Error::VariantNotFound { line, .. }
            | Error::VariantRequired { line, .. }
            | Error::StockRowNotFound { line, .. }
            | Error::InventoryRowNotFound { line, .. } => *line = Some(index),
            _ => {}
        }
        self
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let row = RowKey::product(ProductId::generate());

        let err = Error::InsufficientStock {
            line: 2,
            row,
            requested: 5,
            available: 3,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(err.line(), Some(2));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("available 3"));

        let err = Error::Conflict("lock timeout".to_string());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());

        let err = Error::Storage("disk gone".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.line(), None);
    }

    #[test]
    fn test_at_line() {
        let err = Error::ProductNotFound {
            line: None,
            product_id: ProductId::generate(),
        }
        .at_line(4);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.line(), Some(4));

        let err = Error::Validation("bad".to_string()).at_line(1);
        assert_eq!(err.line(), None);
    }
}
