//! Infrastructure layer: repositories, stores and the ledger services.
//!
//! Components, leaves first:
//!
//! - [`StockLedger`]: append-only movement log, the only writer of part quantity
//! - [`PartCatalog`]: parts and their current quantity
//! - [`JobReservationManager`]: soft allocation to jobs, deduction through the ledger
//! - [`PurchaseOrderReceiver`]: purchase orders and goods receipt
//! - [`SerializedUnitTracker`]: per-unit lifecycle, independent of quantity
//! - [`LowStockMonitor`]: read-only view over the catalog

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod low_stock;
pub mod receiving;
pub mod report;
pub mod reservations;
pub mod serials;
pub mod store;


pub use catalog::PartCatalog;
pub use config::{ConfigError, EngineConfig, database_url_from_env};
pub use engine::{InMemoryInventoryEngine, InventoryEngine};
pub use error::{FailedLine, LedgerError, LedgerResult, StoreError};
pub use ledger::{Reconciliation, StockLedger};
pub use low_stock::{LowStockEntry, LowStockMonitor};
pub use receiving::{PurchaseOrderReceiver, ReceiptOutcome, ReceiptReport};
pub use report::BatchReport;
pub use reservations::{DeductionOutcome, DeductionReport, JobReservationManager};
pub use serials::{SerialReconciliation, SerializedUnitTracker};
