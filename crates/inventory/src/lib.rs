//! Inventory domain module.
//!
//! This crate contains the business rules for stocked parts, the movement
//! ledger, job allocations and serialized units, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod job_part;
pub mod movement;
pub mod part;
pub mod serial;

pub use job_part::{DeductionPolicy, JobPart};
pub use movement::{MovementContext, MovementType, StockMovement, replay_quantity};
pub use part::{NewPart, Part, PartDetails, StoredPart};
pub use serial::{AcquisitionMetadata, SerialStatus, SerializedItem, TransitionContext};
