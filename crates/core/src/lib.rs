//! `stockledger-core`: shared building blocks for the stock ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the tenant context threaded through every call, and the domain
//! error model.

pub mod context;
pub mod entity;
pub mod error;
pub mod id;

pub use context::TenantContext;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    CustomerId, JobId, JobPartId, PartId, PoItemId, PurchaseOrderId, SerializedItemId,
    StockMovementId, TenantId, UserId,
};
