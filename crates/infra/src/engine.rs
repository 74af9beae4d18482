//! Wiring of the ledger components over one set of repositories.

use std::sync::Arc;

use crate::catalog::PartCatalog;
use crate::config::EngineConfig;
use crate::ledger::StockLedger;
use crate::low_stock::LowStockMonitor;
use crate::receiving::PurchaseOrderReceiver;
use crate::reservations::JobReservationManager;
use crate::serials::SerializedUnitTracker;
use crate::store::{
    InMemoryJobPartRepository, InMemoryLedgerStore, InMemoryPurchaseOrderRepository,
    InMemorySerializedItemRepository, JobPartRepository, LedgerStore, PurchaseOrderRepository,
    SerializedItemRepository,
};

/// All components sharing one ledger. `Send + Sync`; wrap in `Arc` to share.
#[derive(Debug)]
pub struct InventoryEngine<S, J, P, R> {
    config: EngineConfig,
    ledger: Arc<StockLedger<Arc<S>>>,
    catalog: PartCatalog<Arc<S>>,
    reservations: JobReservationManager<Arc<S>, J>,
    receiving: PurchaseOrderReceiver<Arc<S>, P>,
    serials: SerializedUnitTracker<Arc<S>, R>,
    low_stock: LowStockMonitor<Arc<S>>,
}

pub type InMemoryInventoryEngine = InventoryEngine<
    InMemoryLedgerStore,
    InMemoryJobPartRepository,
    InMemoryPurchaseOrderRepository,
    InMemorySerializedItemRepository,
>;

impl<S, J, P, R> InventoryEngine<S, J, P, R>
where
    S: LedgerStore,
    J: JobPartRepository,
    P: PurchaseOrderRepository,
    R: SerializedItemRepository,
{
    pub fn new(store: S, job_parts: J, orders: P, units: R, config: EngineConfig) -> Self {
        let store = Arc::new(store);
        let ledger = Arc::new(StockLedger::new(store.clone(), config.max_append_retries));
        Self {
            config,
            catalog: PartCatalog::new(ledger.clone()),
            reservations: JobReservationManager::new(
                ledger.clone(),
                job_parts,
                config.deduction_policy,
            ),
            receiving: PurchaseOrderReceiver::new(ledger.clone(), orders),
            serials: SerializedUnitTracker::new(ledger.clone(), units),
            low_stock: LowStockMonitor::new(store),
            ledger,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StockLedger<Arc<S>> {
        &self.ledger
    }

    pub fn catalog(&self) -> &PartCatalog<Arc<S>> {
        &self.catalog
    }

    pub fn reservations(&self) -> &JobReservationManager<Arc<S>, J> {
        &self.reservations
    }

    pub fn receiving(&self) -> &PurchaseOrderReceiver<Arc<S>, P> {
        &self.receiving
    }

    pub fn serials(&self) -> &SerializedUnitTracker<Arc<S>, R> {
        &self.serials
    }

    pub fn low_stock(&self) -> &LowStockMonitor<Arc<S>> {
        &self.low_stock
    }
}

impl InMemoryInventoryEngine {
    /// Engine over fresh in-memory repositories.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            InMemoryLedgerStore::new(),
            InMemoryJobPartRepository::new(),
            InMemoryPurchaseOrderRepository::new(),
            InMemorySerializedItemRepository::new(),
            config,
        )
    }
}
