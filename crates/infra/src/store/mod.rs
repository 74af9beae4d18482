//! Strongly-typed, tenant-scoped repositories.
//!
//! One repository per entity. Every method takes the tenant explicitly and a
//! row from another tenant behaves as if it did not exist.
//!
//! `LedgerStore` is the transactional unit of the ledger: it commits a movement
//! and the part quantity it produces together, or not at all.

pub mod in_memory;
pub mod postgres;
pub mod tenant_store;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockledger_core::{
    DomainResult, JobId, JobPartId, PartId, PoItemId, PurchaseOrderId, SerializedItemId, TenantId,
};
use stockledger_inventory::{JobPart, Part, PartDetails, SerializedItem, StockMovement};
use stockledger_purchasing::{PoItem, PurchaseOrder};

use crate::error::StoreError;

pub use in_memory::{
    InMemoryJobPartRepository, InMemoryLedgerStore, InMemoryPurchaseOrderRepository,
    InMemorySerializedItemRepository,
};
pub use postgres::PostgresLedgerStore;
pub use tenant_store::InMemoryTenantStore;

/// Result of replaying a part's movements into its stored quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityRepair {
    pub part: Part,
    /// Quantity stored before the replay overwrote it.
    pub previous_quantity: i64,
    pub movement_count: usize,
}

/// Part catalog rows. `quantity` is never written through this trait.
pub trait PartRepository: Send + Sync {
    /// Insert a new part. Part numbers are unique per tenant.
    fn insert_part(&self, part: &Part) -> Result<(), StoreError>;

    fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> Result<Option<Part>, StoreError>;

    /// Whether the part is registered. Does not wait on appends to the part.
    fn part_exists(&self, tenant_id: TenantId, part_id: PartId) -> Result<bool, StoreError> {
        Ok(self.get_part(tenant_id, part_id)?.is_some())
    }

    fn find_part_by_number(
        &self,
        tenant_id: TenantId,
        part_number: &str,
    ) -> Result<Option<Part>, StoreError>;

    /// All parts of a tenant, ordered by part number.
    fn list_parts(&self, tenant_id: TenantId) -> Result<Vec<Part>, StoreError>;

    /// Update name, minimum and price in place, leaving quantity untouched.
    fn update_part_details(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> Result<Part, StoreError>;
}

/// Append-only movement history.
pub trait StockMovementRepository: Send + Sync {
    /// Movements of one part in creation order.
    fn list_movements(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn movements_for_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn movements_for_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// The `job_usage` movement already written for an allocation, if any.
    fn find_job_part_movement(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        job_part_id: JobPartId,
    ) -> Result<Option<StockMovement>, StoreError>;
}

/// Transactional ledger writes over parts + movements.
pub trait LedgerStore: PartRepository + StockMovementRepository {
    /// Atomically append `movement` and set the part quantity to `quantity_after`.
    ///
    /// Fails with `StoreError::Concurrency` if the stored quantity no longer
    /// equals `movement.quantity_before`, and with `StoreError::Duplicate` on a
    /// second `job_usage` movement for the same job part; nothing is written in
    /// either case.
    fn commit_movement(&self, movement: &StockMovement) -> Result<Part, StoreError>;

    /// Atomically replay all movements of a part and overwrite its quantity.
    fn recompute_quantity(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        now: DateTime<Utc>,
    ) -> Result<QuantityRepair, StoreError>;
}

/// Job allocations.
pub trait JobPartRepository: Send + Sync {
    fn insert_job_part(&self, job_part: &JobPart) -> Result<(), StoreError>;

    fn get_job_part(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<Option<JobPart>, StoreError>;

    /// Allocations of a job in creation order.
    fn list_for_job(&self, tenant_id: TenantId, job_id: JobId) -> Result<Vec<JobPart>, StoreError>;

    fn list_for_part(&self, tenant_id: TenantId, part_id: PartId)
    -> Result<Vec<JobPart>, StoreError>;

    /// Claim an allocation for deduction. `NotFound` once it has been released.
    fn begin_deduction(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
        now: DateTime<Utc>,
    ) -> Result<JobPart, StoreError>;

    /// Hand back the claim of a deduction that wrote no movement.
    fn abandon_deduction(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<JobPart, StoreError>;

    /// Flip `is_deducted` from false to true. Returns `false` if it was already set.
    fn mark_deducted(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Remove an allocation no deduction has claimed.
    fn remove_pending(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<JobPart, StoreError>;
}

/// Purchase orders and their lines.
pub trait PurchaseOrderRepository: Send + Sync {
    /// Insert an order with its lines. PO numbers are unique per tenant.
    fn insert_order(&self, order: &PurchaseOrder, items: &[PoItem]) -> Result<(), StoreError>;

    fn get_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    fn update_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        apply: &mut dyn FnMut(&mut PurchaseOrder) -> DomainResult<()>,
    ) -> Result<PurchaseOrder, StoreError>;

    /// Cancel an order. Its lines are checked and its status flipped under
    /// the lock `record_receipt` takes.
    fn cancel_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOrder, StoreError>;

    /// Re-derive the order status from its current lines.
    fn refresh_status(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOrder, StoreError>;

    /// Lines of an order ordered by line number.
    fn list_items(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<PoItem>, StoreError>;

    fn get_item(&self, tenant_id: TenantId, po_item_id: PoItemId)
    -> Result<Option<PoItem>, StoreError>;

    /// Add `quantity` to a line whose order still accepts receipts.
    fn record_receipt(
        &self,
        tenant_id: TenantId,
        po_item_id: PoItemId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<PoItem, StoreError>;

    fn update_item(
        &self,
        tenant_id: TenantId,
        po_item_id: PoItemId,
        apply: &mut dyn FnMut(&mut PoItem) -> DomainResult<()>,
    ) -> Result<PoItem, StoreError>;
}

/// Serialized units.
pub trait SerializedItemRepository: Send + Sync {
    /// Insert a unit. Serial numbers are unique per part.
    fn insert_serial(&self, item: &SerializedItem) -> Result<(), StoreError>;

    fn get_serial(
        &self,
        tenant_id: TenantId,
        item_id: SerializedItemId,
    ) -> Result<Option<SerializedItem>, StoreError>;

    fn find_serial(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        serial_number: &str,
    ) -> Result<Option<SerializedItem>, StoreError>;

    /// Units of a part ordered by serial number.
    fn list_serials(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<SerializedItem>, StoreError>;

    fn update_serial(
        &self,
        tenant_id: TenantId,
        item_id: SerializedItemId,
        apply: &mut dyn FnMut(&mut SerializedItem) -> DomainResult<()>,
    ) -> Result<SerializedItem, StoreError>;
}

impl<S> PartRepository for Arc<S>
where
    S: PartRepository + ?Sized,
{
    fn insert_part(&self, part: &Part) -> Result<(), StoreError> {
        (**self).insert_part(part)
    }

    fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> Result<Option<Part>, StoreError> {
        (**self).get_part(tenant_id, part_id)
    }

    fn part_exists(&self, tenant_id: TenantId, part_id: PartId) -> Result<bool, StoreError> {
        (**self).part_exists(tenant_id, part_id)
    }

    fn find_part_by_number(
        &self,
        tenant_id: TenantId,
        part_number: &str,
    ) -> Result<Option<Part>, StoreError> {
        (**self).find_part_by_number(tenant_id, part_number)
    }

    fn list_parts(&self, tenant_id: TenantId) -> Result<Vec<Part>, StoreError> {
        (**self).list_parts(tenant_id)
    }

    fn update_part_details(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> Result<Part, StoreError> {
        (**self).update_part_details(tenant_id, part_id, details, now)
    }
}

impl<S> StockMovementRepository for Arc<S>
where
    S: StockMovementRepository + ?Sized,
{
    fn list_movements(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_movements(tenant_id, part_id)
    }

    fn movements_for_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_for_job(tenant_id, job_id)
    }

    fn movements_for_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_for_purchase_order(tenant_id, purchase_order_id)
    }

    fn find_job_part_movement(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        job_part_id: JobPartId,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).find_job_part_movement(tenant_id, part_id, job_part_id)
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn commit_movement(&self, movement: &StockMovement) -> Result<Part, StoreError> {
        (**self).commit_movement(movement)
    }

    fn recompute_quantity(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        now: DateTime<Utc>,
    ) -> Result<QuantityRepair, StoreError> {
        (**self).recompute_quantity(tenant_id, part_id, now)
    }
}
