//! Single-writer actor for ledger mutations
//!
//! Every transfer and owner stock operation is sent to one actor that owns the
//! [`TransferEngine`]. Mutations therefore never race each other inside one
//! process; the store's write lock still guards against writers outside the actor.
//!
//! Store calls are synchronous and may wait up to the lock timeout, so the actor
//! loop runs on Tokio's blocking pool and never parks an async worker.
//!
//! ```text
//!   LedgerHandle (Clone) ──mpsc (bounded)──▶ LedgerActor ──▶ TransferEngine ──▶ LedgerStore
//!          ▲                                      │
//!          └──────────── oneshot reply ───────────┘
//! ```
//!
//! Reads do not go through the actor; they hit the store directly.

use crate::{
    catalog::{NewProduct, Product},
    transfer::TransferEngine,
    txn::LedgerStore,
    types::{LineItem, OrderRecord, Principal, ProductId, StocklistId, VariantId},
    Error, Result,
};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Stocklist buys from owner stock
    OwnerPurchase {
        /// Buying stocklist
        buyer: Principal,
        /// Requested lines
        items: Vec<LineItem>,
        /// Committed order or the rejection
        response: oneshot::Sender<Result<OrderRecord>>,
    },

    /// Customer buys from a stocklist's inventory
    CustomerPurchase {
        /// Buying customer
        buyer: Principal,
        /// Selling stocklist
        stocklist: StocklistId,
        /// Requested lines
        items: Vec<LineItem>,
        /// Committed order or the rejection
        response: oneshot::Sender<Result<OrderRecord>>,
    },

    /// Owner adds a product or merges into one of the same name
    RegisterProduct {
        /// Owner
        owner: Principal,
        /// Requested product and stock
        product: NewProduct,
        /// Resulting catalog entry
        response: oneshot::Sender<Result<Product>>,
    },

    /// Owner adds stock to an existing row
    Restock {
        /// Owner
        owner: Principal,
        /// Product
        product_id: ProductId,
        /// Variant, for per-variant stock
        variant_id: Option<VariantId>,
        /// Units to add
        quantity: u64,
        /// New quantity on hand
        response: oneshot::Sender<Result<u64>>,
    },

    /// Owner changes a unit price
    SetPrice {
        /// Owner
        owner: Principal,
        /// Product
        product_id: ProductId,
        /// Variant, for per-variant stock
        variant_id: Option<VariantId>,
        /// New unit price
        price: Decimal,
        /// Outcome
        response: oneshot::Sender<Result<()>>,
    },

    /// Stop after the messages already queued ahead of this one
    Shutdown {
        /// Sent once the store has been released
        response: oneshot::Sender<()>,
    },
}

/// Actor that processes ledger messages
pub struct LedgerActor<S> {
    /// Transfer engine (owns the store handle)
    engine: TransferEngine<S>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Messages handled so far
    handled: u64,
}

impl<S: LedgerStore> LedgerActor<S> {
    /// Create new actor
    pub fn new(engine: TransferEngine<S>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self {
            engine,
            mailbox,
            handled: 0,
        }
    }

    /// Run the actor loop on the calling thread
    ///
    /// Blocks between messages, so it must run outside an async context.
    pub fn run(mut self) {
        let mut shutdown_ack = None;

        while let Some(msg) = self.mailbox.blocking_recv() {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    shutdown_ack = Some(response);
                    break;
                }
                msg => self.handle_message(msg),
            }
        }

        let handled = self.handled;
        // Release the store before acknowledging so a caller may reopen it
        drop(self);
        tracing::info!(handled, "Ledger actor stopped");

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        self.handled += 1;

        let delivered = match msg {
            LedgerMessage::OwnerPurchase {
                buyer,
                items,
                response,
            } => response
                .send(self.engine.execute_owner_purchase(&buyer, &items))
                .is_ok(),

            LedgerMessage::CustomerPurchase {
                buyer,
                stocklist,
                items,
                response,
            } => response
                .send(self.engine.execute_customer_purchase(&buyer, stocklist, &items))
                .is_ok(),

            LedgerMessage::RegisterProduct {
                owner,
                product,
                response,
            } => response
                .send(self.engine.register_product(&owner, product))
                .is_ok(),

            LedgerMessage::Restock {
                owner,
                product_id,
                variant_id,
                quantity,
                response,
            } => response
                .send(self.engine.restock(&owner, product_id, variant_id, quantity))
                .is_ok(),

            LedgerMessage::SetPrice {
                owner,
                product_id,
                variant_id,
                price,
                response,
            } => response
                .send(self.engine.set_price(&owner, product_id, variant_id, price))
                .is_ok(),

            // Handled in the run loop
            LedgerMessage::Shutdown { .. } => true,
        };

        if !delivered {
            // The caller went away; the outcome is already committed or rolled back
            tracing::debug!("Response receiver dropped before reply");
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Stocklist buys from owner stock
    pub async fn owner_purchase(&self, buyer: Principal, items: Vec<LineItem>) -> Result<OrderRecord> {
        self.call(|response| LedgerMessage::OwnerPurchase {
            buyer,
            items,
            response,
        })
        .await
    }

    /// Customer buys from `stocklist`'s inventory
    pub async fn customer_purchase(
        &self,
        buyer: Principal,
        stocklist: StocklistId,
        items: Vec<LineItem>,
    ) -> Result<OrderRecord> {
        self.call(|response| LedgerMessage::CustomerPurchase {
            buyer,
            stocklist,
            items,
            response,
        })
        .await
    }

    /// Owner adds a product
    pub async fn register_product(&self, owner: Principal, product: NewProduct) -> Result<Product> {
        self.call(|response| LedgerMessage::RegisterProduct {
            owner,
            product,
            response,
        })
        .await
    }

    /// Owner adds stock
    pub async fn restock(
        &self,
        owner: Principal,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u64,
    ) -> Result<u64> {
        self.call(|response| LedgerMessage::Restock {
            owner,
            product_id,
            variant_id,
            quantity,
            response,
        })
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
        self.call(|response| LedgerMessage::SetPrice {
            owner,
            product_id,
            variant_id,
            price,
            response,
        })
        .await
    }

    /// Shutdown actor and wait until it has released the store
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor<S>(engine: TransferEngine<S>, mailbox_capacity: usize) -> LedgerHandle
where
    S: LedgerStore + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(engine, rx);

    tokio::task::spawn_blocking(move || actor.run());

    LedgerHandle::new(tx)
}
