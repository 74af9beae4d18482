//! Serialized unit tracking.
//!
//! A sub-ledger of individual units. It never writes part quantity, and
//! [`SerializedUnitTracker::reconcile`] only reports how far the two have drifted.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use stockledger_core::{PartId, SerializedItemId, TenantContext};
use stockledger_inventory::{AcquisitionMetadata, SerialStatus, SerializedItem, TransitionContext};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::StockLedger;
use crate::store::{LedgerStore, SerializedItemRepository};

/// Aggregate quantity against units physically on hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialReconciliation {
    pub part_id: PartId,
    pub aggregate_quantity: i64,
    /// Units in `in_stock` or `reserved`.
    pub serialized_in_stock: i64,
    /// `aggregate_quantity - serialized_in_stock`.
    pub difference: i64,
}

#[derive(Debug)]
pub struct SerializedUnitTracker<S, R> {
    ledger: Arc<StockLedger<S>>,
    units: R,
}

impl<S, R> SerializedUnitTracker<S, R>
where
    S: LedgerStore,
    R: SerializedItemRepository,
{
    pub fn new(ledger: Arc<StockLedger<S>>, units: R) -> Self {
        Self { ledger, units }
    }

    /// Take a new unit into stock.
    #[instrument(skip(self, ctx, acquisition), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
        serial_number: &str,
        acquisition: AcquisitionMetadata,
    ) -> LedgerResult<SerializedItem> {
        if !self.ledger.store().part_exists(ctx.tenant_id(), part_id)? {
            return Err(LedgerError::not_found(format!("part {part_id}")));
        }
        let item = SerializedItem::intake(
            ctx.tenant_id(),
            part_id,
            serial_number,
            acquisition,
            Utc::now(),
        )?;
        self.units.insert_serial(&item)?;
        Ok(item)
    }

    #[instrument(skip(self, ctx, context), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn transition(
        &self,
        ctx: &TenantContext,
        item_id: SerializedItemId,
        next: SerialStatus,
        context: &TransitionContext,
    ) -> LedgerResult<SerializedItem> {
        let now = Utc::now();
        let item = self
            .units
            .update_serial(ctx.tenant_id(), item_id, &mut |item| {
                item.transition(next, context, now)
            })?;
        debug!(serial_number = %item.serial_number, status = %item.status, "unit moved");
        Ok(item)
    }

    pub fn get(
        &self,
        ctx: &TenantContext,
        item_id: SerializedItemId,
    ) -> LedgerResult<SerializedItem> {
        self.units
            .get_serial(ctx.tenant_id(), item_id)?
            .ok_or_else(|| LedgerError::not_found(format!("serialized item {item_id}")))
    }

    pub fn find_by_serial(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
        serial_number: &str,
    ) -> LedgerResult<Option<SerializedItem>> {
        Ok(self
            .units
            .find_serial(ctx.tenant_id(), part_id, serial_number.trim())?)
    }

    /// Units of a part ordered by serial number.
    pub fn list_for_part(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
    ) -> LedgerResult<Vec<SerializedItem>> {
        Ok(self.units.list_serials(ctx.tenant_id(), part_id)?)
    }

    /// Read-only comparison; nothing is corrected.
    pub fn reconcile(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
    ) -> LedgerResult<SerialReconciliation> {
        let aggregate_quantity = self.ledger.quantity(ctx, part_id)?;
        let serialized_in_stock = self
            .units
            .list_serials(ctx.tenant_id(), part_id)?
            .iter()
            .filter(|u| u.status.is_on_hand())
            .count() as i64;

        Ok(SerialReconciliation {
            part_id,
            aggregate_quantity,
            serialized_in_stock,
            difference: aggregate_quantity - serialized_in_stock,
        })
    }
}
