use crate::{
    error::IapError,
    models::{
        product::Product,
        results::PurchaseResult,
        transaction::{Payment, PlatformError, PlatformErrorCode, Transaction, TransactionState},
    },
    platform::{PaymentQueue, PurchaseDelegate},
    services::receipt_service::ReceiptService,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Transactions observed as purchased but not finished yet, per product.
///
/// Memory only: after a restart the payment queue delivers them again.
#[derive(Debug, Default)]
pub struct PendingTransactions {
    transactions: Mutex<HashMap<String, Vec<Transaction>>>,
}

impl PendingTransactions {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Transaction>>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_pending_transaction(&self, product_id: &str) -> bool {
        self.lock()
            .get(product_id)
            .is_some_and(|pending| !pending.is_empty())
    }

    pub fn has_any(&self) -> bool {
        self.lock().values().any(|pending| !pending.is_empty())
    }

    pub fn count(&self, product_id: &str) -> usize {
        self.lock().get(product_id).map_or(0, Vec::len)
    }

    // A redelivered transaction is only kept once
    pub(crate) fn push(&self, transaction: Transaction) {
        let mut transactions = self.lock();
        let pending = transactions
            .entry(transaction.product_id.clone())
            .or_default();
        if !pending.iter().any(|t| t.identifier == transaction.identifier) {
            pending.push(transaction);
        }
    }

    /// Acknowledge every pending transaction for the product and forget them
    pub fn finish_all(&self, product_id: &str, queue: &dyn PaymentQueue) -> usize {
        let finished = self.lock().remove(product_id).unwrap_or_default();
        for transaction in &finished {
            queue.finish_transaction(transaction);
        }
        finished.len()
    }
}

/// Purchase delegate used when the application does not supply one: content
/// is considered delivered as soon as the receipt confirms it.
pub struct FinishTransactionsDelegate {
    pending: Arc<PendingTransactions>,
    queue: Arc<dyn PaymentQueue>,
}

impl FinishTransactionsDelegate {
    pub fn new(pending: Arc<PendingTransactions>, queue: Arc<dyn PaymentQueue>) -> Self {
        Self { pending, queue }
    }
}

impl PurchaseDelegate for FinishTransactionsDelegate {
    fn product_purchased(&self, product_id: &str) {
        let finished = self.pending.finish_all(product_id, self.queue.as_ref());
        debug!(product_id, finished, "Finished transactions for purchased product");
    }
}

struct AwaitedPurchase {
    token: Uuid,
    product_id: String,
    reply: oneshot::Sender<PurchaseResult>,
}

// Frees the slot when the purchase future is dropped before its result arrives
struct AwaitedSlot<'a> {
    service: &'a TransactionService,
    token: Uuid,
}

impl Drop for AwaitedSlot<'_> {
    fn drop(&mut self) {
        self.service.release(self.token);
    }
}

#[derive(Default)]
struct TrackerState {
    transaction_states: HashMap<String, TransactionState>,
    awaited: Option<AwaitedPurchase>,
}

/// Observes the payment queue and drives purchases through receipt validation
pub struct TransactionService {
    queue: Arc<dyn PaymentQueue>,
    receipts: Arc<ReceiptService>,
    pending: Arc<PendingTransactions>,
    state: Mutex<TrackerState>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionService {
    pub fn new(
        queue: Arc<dyn PaymentQueue>,
        receipts: Arc<ReceiptService>,
        pending: Arc<PendingTransactions>,
    ) -> Self {
        Self {
            queue,
            receipts,
            pending,
            state: Mutex::new(TrackerState::default()),
            observer: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach to the payment queue. Calling it again while attached does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if observer.is_some() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, payment queue observer not attached");
            return;
        };

        let mut updates = self.queue.add_observer();
        let service = Arc::downgrade(self);
        *observer = Some(runtime.spawn(async move {
            while let Some(transactions) = updates.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.handle_transactions(transactions);
            }
            debug!("Payment queue observer finished");
        }));

        info!("Payment queue observer attached");
    }

    /// Detach from the payment queue. A purchase still awaiting its result is interrupted.
    pub fn stop(&self) {
        let handle = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            self.queue.remove_observer();
            info!("Payment queue observer removed");
        }

        // Dropping the sender resolves the waiting purchase
        self.lock_state().awaited = None;
    }

    pub fn can_make_payments(self: &Arc<Self>) -> bool {
        self.start();
        self.queue.can_make_payments()
    }

    /// Submit a payment and wait until the receipt confirms it, or the queue reports otherwise
    #[instrument(skip(self, product), fields(product_id = %product.identifier))]
    pub async fn purchase(
        self: &Arc<Self>,
        product: &Product,
        quantity: u32,
        application_username: Option<String>,
    ) -> PurchaseResult {
        if !self.can_make_payments() {
            return PurchaseResult::failed(IapError::CannotMakePurchase);
        }
        if self.queue.last_transaction_state() == Some(TransactionState::Purchasing) {
            return PurchaseResult::failed(IapError::AlreadyPurchasing);
        }

        let token = Uuid::new_v4();
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if let Some(awaited) = &state.awaited {
                warn!(
                    awaiting = %awaited.product_id,
                    "Rejecting purchase while another one is awaiting its result"
                );
                return PurchaseResult::failed(IapError::AlreadyPurchasing);
            }
            state.awaited = Some(AwaitedPurchase {
                token,
                product_id: product.identifier.clone(),
                reply,
            });
        }
        let _slot = AwaitedSlot {
            service: self,
            token,
        };

        info!(%token, quantity, "Submitting payment");
        self.queue.add_payment(Payment {
            product_id: product.identifier.clone(),
            quantity: quantity.max(1),
            application_username,
        });

        match rx.await {
            Ok(result) => {
                info!(%token, state = ?result.state, "Purchase completed");
                result
            }
            Err(_) => PurchaseResult::failed(IapError::Interrupted(
                "payment queue observer stopped".to_string(),
            )),
        }
    }

    pub fn finish_transactions(&self, product_id: &str) {
        let finished = self.pending.finish_all(product_id, self.queue.as_ref());
        info!(product_id, finished, "Finished transactions");
    }

    pub fn get_transaction_state(&self, product_id: &str) -> Option<TransactionState> {
        self.lock_state()
            .transaction_states
            .get(product_id)
            .copied()
    }

    /// Whether the last transaction seen for the product is waiting on approval
    pub fn has_deferred_transaction(&self, product_id: &str) -> bool {
        self.get_transaction_state(product_id) == Some(TransactionState::Deferred)
    }

    /// Apply a batch of transaction updates, in the order the queue emitted them
    fn handle_transactions(&self, transactions: Vec<Transaction>) {
        for transaction in transactions {
            let product_id = transaction.product_id.clone();
            debug!(
                product_id = %product_id,
                transaction = %transaction.identifier,
                state = ?transaction.state,
                "Transaction updated"
            );

            self.lock_state()
                .transaction_states
                .insert(product_id.clone(), transaction.state);

            match transaction.state {
                TransactionState::Purchased => {
                    self.pending.push(transaction);
                    self.confirm_purchase(&product_id);
                }
                TransactionState::Restored => {
                    self.queue.finish_transaction(&transaction);
                }
                TransactionState::Failed => {
                    self.queue.finish_transaction(&transaction);
                    let result = match transaction.error {
                        Some(error) if error.is_cancellation() => PurchaseResult::cancelled(),
                        Some(error) => {
                            warn!(product_id = %product_id, "Transaction failed: {}", error);
                            PurchaseResult::failed(IapError::Platform(error))
                        }
                        None => PurchaseResult::failed(IapError::Platform(PlatformError::new(
                            PlatformErrorCode::Unknown,
                            "transaction failed without an error",
                        ))),
                    };
                    self.notify(&product_id, result);
                }
                TransactionState::Deferred => {
                    self.notify(&product_id, PurchaseResult::deferred());
                }
                TransactionState::Purchasing => {}
            }
        }
    }

    // The awaited purchase is resolved by the receipt; anything else (restores,
    // family sharing, redelivery after restart) only refreshes ownership.
    fn confirm_purchase(&self, product_id: &str) {
        let awaited = self.take_awaited(product_id);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(product_id, "No async runtime, purchased transaction left pending");
            if let Some(awaited) = awaited {
                let _ = awaited.reply.send(PurchaseResult::failed(IapError::Interrupted(
                    "no async runtime to validate the receipt".to_string(),
                )));
            }
            return;
        };

        let receipts = Arc::clone(&self.receipts);
        match awaited {
            Some(awaited) => {
                runtime.spawn(async move {
                    let result = receipts.refresh_after_purchased(&awaited.product_id).await;
                    debug!(
                        token = %awaited.token,
                        state = ?result.state,
                        "Purchase checked against receipt"
                    );
                    let _ = awaited.reply.send(result);
                });
            }
            None => {
                runtime.spawn(async move {
                    let result = receipts.refresh_after_transaction().await;
                    debug!(state = ?result.state, "Refresh after unsolicited transaction");
                });
            }
        }
    }

    fn notify(&self, product_id: &str, result: PurchaseResult) {
        let awaited = self.take_awaited(product_id);
        if let Some(awaited) = awaited {
            let _ = awaited.reply.send(result);
        }
    }

    fn take_awaited(&self, product_id: &str) -> Option<AwaitedPurchase> {
        let mut state = self.lock_state();
        if state
            .awaited
            .as_ref()
            .is_some_and(|a| a.product_id == product_id)
        {
            state.awaited.take()
        } else {
            None
        }
    }

    fn release(&self, token: Uuid) {
        let mut state = self.lock_state();
        if state.awaited.as_ref().is_some_and(|a| a.token == token) {
            state.awaited = None;
        }
    }
}
