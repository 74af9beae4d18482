//! Purchasing domain module (purchase orders and receipt lines).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod order;

pub use order::{
    NewPoItem, NewPurchaseOrder, PoItem, PurchaseOrder, PurchaseOrderStatus, ReceiptLine,
};
