//! Receipt reconciliation
//!
//! Every refresh request is queued as a waiter. At most one validation runs at
//! a time; all waiters queued on it receive the same outcome. Waiters that need
//! a receipt loaded after they arrived (a purchase that just landed) are held
//! for the following round instead of joining one already in flight.

use crate::{
    config::RefreshConfig,
    error::{IapError, Result},
    models::{
        iap::{ValidationRequest, ValidatorResponse},
        product::Catalog,
        purchase::PurchaseRecord,
        results::{PurchaseResult, RefreshResult},
    },
    platform::{PurchaseDelegate, ReceiptSource},
    services::{
        ownership_service::{BoolField, DateField, OwnershipBatch, OwnershipStore, StringSetField},
        transaction_service::PendingTransactions,
        validator_service::{receipt_fingerprint, ReceiptValidator},
    },
};
use serde_json::Value;
use std::{
    collections::BTreeSet,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, info, instrument, warn};

/// Result of one successful validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub added_purchases: u32,
    pub updated_purchases: u32,
    /// Catalog products present in the validated receipt
    pub present: BTreeSet<String>,
    /// Products reported to the purchase delegate, in catalog order
    pub purchased: Vec<String>,
}

enum Waiter {
    Refresh(oneshot::Sender<RefreshResult>),
    Purchase {
        product_id: String,
        reply: oneshot::Sender<PurchaseResult>,
    },
}

impl Waiter {
    fn resolve(self, outcome: &Result<ValidationOutcome>) {
        // A dropped receiver only means the caller stopped waiting
        match self {
            Waiter::Refresh(reply) => {
                let result = match outcome {
                    Ok(o) => RefreshResult::succeeded(o.added_purchases, o.updated_purchases),
                    Err(e) => RefreshResult::failed(e.clone()),
                };
                let _ = reply.send(result);
            }
            Waiter::Purchase { product_id, reply } => {
                let result = match outcome {
                    Ok(o) if o.present.contains(&product_id) => PurchaseResult::purchased(),
                    Ok(_) => PurchaseResult::failed(IapError::ProductNotInReceipt(product_id)),
                    Err(e) => PurchaseResult::failed(e.clone()),
                };
                let _ = reply.send(result);
            }
        }
    }
}

struct LastRefresh {
    at: Instant,
    succeeded: bool,
}

#[derive(Default)]
struct SyncState {
    in_flight: bool,
    // Served by the validation in flight
    current: Vec<Waiter>,
    // Served by the round after it
    next: Vec<Waiter>,
    last_refresh: Option<LastRefresh>,
}

pub struct ReceiptService {
    catalog: Arc<Catalog>,
    ownership: OwnershipStore,
    pending: Arc<PendingTransactions>,
    source: Arc<dyn ReceiptSource>,
    validator: Arc<dyn ReceiptValidator>,
    delegate: Option<Arc<dyn PurchaseDelegate>>,
    application_username: Option<String>,
    intervals: RefreshConfig,
    state: Mutex<SyncState>,
}

impl ReceiptService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        ownership: OwnershipStore,
        pending: Arc<PendingTransactions>,
        source: Arc<dyn ReceiptSource>,
        validator: Arc<dyn ReceiptValidator>,
        delegate: Option<Arc<dyn PurchaseDelegate>>,
        application_username: Option<String>,
        intervals: RefreshConfig,
    ) -> Self {
        Self {
            catalog,
            ownership,
            pending,
            source,
            validator,
            delegate,
            application_username,
            intervals,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn application_username(&self) -> Option<&str> {
        self.application_username.as_deref()
    }

    /// Validate the receipt, unless a refresh completed within the minimum interval
    #[instrument(skip(self))]
    pub async fn refresh(self: &Arc<Self>) -> RefreshResult {
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if !state.in_flight && self.within_minimum_interval(&state) {
                debug!("Receipt refresh skipped, last refresh is recent");
                return RefreshResult::skipped();
            }
            self.enqueue(&mut state, Waiter::Refresh(reply), false);
        }
        Self::await_refresh(rx).await
    }

    /// Validate the receipt regardless of the minimum interval
    #[instrument(skip(self))]
    pub async fn refresh_now(self: &Arc<Self>) -> RefreshResult {
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            self.enqueue(&mut state, Waiter::Refresh(reply), false);
        }
        Self::await_refresh(rx).await
    }

    /// Validate a receipt loaded after a transaction landed
    pub(crate) async fn refresh_after_transaction(self: &Arc<Self>) -> RefreshResult {
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            self.enqueue(&mut state, Waiter::Refresh(reply), true);
        }
        Self::await_refresh(rx).await
    }

    /// Confirm a purchase: `Purchased` only if the validated receipt contains `product_id`
    #[instrument(skip(self))]
    pub async fn refresh_after_purchased(self: &Arc<Self>, product_id: &str) -> PurchaseResult {
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            let waiter = Waiter::Purchase {
                product_id: product_id.to_string(),
                reply,
            };
            self.enqueue(&mut state, waiter, true);
        }
        rx.await.unwrap_or_else(|_| {
            PurchaseResult::failed(IapError::Interrupted(
                "receipt validation was dropped".to_string(),
            ))
        })
    }

    async fn await_refresh(rx: oneshot::Receiver<RefreshResult>) -> RefreshResult {
        rx.await.unwrap_or_else(|_| {
            RefreshResult::failed(IapError::Interrupted(
                "receipt validation was dropped".to_string(),
            ))
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, state: &mut SyncState, waiter: Waiter, fresh_receipt: bool) {
        if !state.in_flight {
            state.in_flight = true;
            state.current.push(waiter);

            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_validation().await });
        } else if fresh_receipt {
            state.next.push(waiter);
        } else {
            state.current.push(waiter);
        }
    }

    fn within_minimum_interval(&self, state: &SyncState) -> bool {
        let Some(last) = &state.last_refresh else {
            return false;
        };
        // Anything waiting on delivery keeps the short interval
        let interval = if last.succeeded && !self.pending.has_any() {
            self.intervals.success_interval()
        } else {
            self.intervals.failure_interval()
        };
        last.at.elapsed() < interval
    }

    async fn run_validation(self: Arc<Self>) {
        loop {
            let outcome = self.validate_receipt().await;
            match &outcome {
                Err(e) if e.is_configuration() => {
                    error!(code = e.code(), "Receipt validation misconfigured: {}", e)
                }
                Err(e) => warn!(code = e.code(), "Receipt validation failed: {}", e),
                Ok(_) => {}
            }

            let (waiters, again) = {
                let mut state = self.lock_state();
                state.last_refresh = Some(LastRefresh {
                    at: Instant::now(),
                    succeeded: outcome.is_ok(),
                });
                let waiters = mem::take(&mut state.current);
                let again = !state.next.is_empty();
                if again {
                    state.current = mem::take(&mut state.next);
                } else {
                    state.in_flight = false;
                }
                (waiters, again)
            };

            debug!(waiters = waiters.len(), "Delivering receipt validation outcome");
            for waiter in waiters {
                waiter.resolve(&outcome);
            }

            if !again {
                break;
            }
        }
    }

    async fn validate_receipt(&self) -> Result<ValidationOutcome> {
        let receipt = self.load_receipt().await?;

        let bundle_identifier = self
            .source
            .bundle_identifier()
            .filter(|id| !id.trim().is_empty())
            .ok_or(IapError::BundleIdentifierInvalid)?;

        info!(
            receipt = %receipt_fingerprint(&receipt),
            bytes = receipt.len(),
            "Validating receipt"
        );

        let request = ValidationRequest::new(
            &bundle_identifier,
            self.source.device(),
            &receipt,
            self.application_username.clone(),
        );
        let response = self.validator.validate(&request).await?;

        self.apply_validation(response)
    }

    // A missing receipt is requested from the platform first, then read again
    async fn load_receipt(&self) -> Result<Vec<u8>> {
        if let Some(receipt) = self.source.load_receipt() {
            return Ok(receipt);
        }

        info!("No local receipt, requesting a receipt refresh");
        self.source
            .refresh_receipt()
            .await
            .map_err(|e| IapError::RefreshReceiptFailed(e.to_string()))?;

        self.source.load_receipt().ok_or_else(|| {
            IapError::RefreshReceiptFailed("receipt still missing after refresh".to_string())
        })
    }

    /// Diff the validator's snapshot against the ownership store and overwrite it.
    ///
    /// Every catalog product is rewritten, so a product missing from the receipt
    /// becomes un-owned. A product counts as purchased when its purchase date
    /// changed to a new value, or when it is in the receipt while a transaction
    /// for it is still unfinished; it counts as added if no purchase date was
    /// stored before, updated otherwise.
    pub(crate) fn apply_validation(&self, response: Value) -> Result<ValidationOutcome> {
        let response: ValidatorResponse = serde_json::from_value(response)
            .map_err(|e| IapError::ReadReceiptFailed(e.to_string()))?;
        let data = response.data;
        let entries = data.entries();

        let mut batch = OwnershipBatch::default();
        batch.set_string_set(
            StringSetField::IneligibleForIntroPrice,
            &data.ineligible_products(),
        );
        batch.set_bool(BoolField::HasAlreadyPurchased, !entries.is_empty());

        let mut outcome = ValidationOutcome::default();

        for product in self.catalog.iter() {
            let product_id = product.identifier.as_str();
            let entry = entries
                .iter()
                .find(|e| e.id.as_deref() == Some(product_id));

            let previous = self.ownership.get_date(DateField::Purchase, product_id);
            let record = PurchaseRecord::from_entry(entry);
            batch.set_purchase_record(product_id, &record);

            if entry.is_none() {
                continue;
            }
            outcome.present.insert(product_id.to_string());

            let changed = record.purchase_date.is_some() && record.purchase_date != previous;
            if changed || self.pending.has_pending_transaction(product_id) {
                if previous.is_none() {
                    outcome.added_purchases += 1;
                } else {
                    outcome.updated_purchases += 1;
                }
                outcome.purchased.push(product_id.to_string());
            }
        }

        self.ownership.commit(batch)?;

        info!(
            added = outcome.added_purchases,
            updated = outcome.updated_purchases,
            owned = outcome.present.len(),
            "Receipt reconciled"
        );

        if let Some(delegate) = &self.delegate {
            for product_id in &outcome.purchased {
                delegate.product_purchased(product_id);
            }
        }

        Ok(outcome)
    }
}
