//! Stock ledger service: the only writer of part quantities.
//!
//! Every append plans a movement against the part as it was just read, then
//! asks the store to commit movement and quantity together. A commit that lost
//! a race (the part moved in between) is re-planned from a fresh read, up to the
//! configured number of retries.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use stockledger_core::{JobId, PartId, PurchaseOrderId, TenantContext};
use stockledger_inventory::{MovementContext, MovementType, Part, StockMovement, replay_quantity};

use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::store::LedgerStore;

/// What a replay of the ledger found for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub part_id: PartId,
    /// Quantity stored on the part before any repair.
    pub stored_quantity: i64,
    /// Sum of all movements.
    pub ledger_quantity: i64,
    /// `stored_quantity - ledger_quantity`.
    pub drift: i64,
    pub movement_count: usize,
    /// Whether the stored quantity was overwritten.
    pub corrected: bool,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }
}

#[derive(Debug)]
pub struct StockLedger<S> {
    store: S,
    max_retries: u32,
}

impl<S: LedgerStore> StockLedger<S> {
    pub fn new(store: S, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append a movement of `quantity_change` to a part.
    pub fn append(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
        movement_type: MovementType,
        quantity_change: i64,
        context: MovementContext,
    ) -> LedgerResult<StockMovement> {
        self.append_with(ctx, part_id, movement_type, context, |_| Ok(Some(quantity_change)))?
            .ok_or_else(|| LedgerError::validation("quantity change cannot be zero"))
    }

    /// Append a movement whose change depends on the part's current state.
    ///
    /// `change` is called with the freshly read part on every attempt; returning
    /// `None` means there is nothing to record and no movement is written.
    #[instrument(
        skip(self, ctx, context, change),
        fields(tenant_id = %ctx.tenant_id(), part_id = %part_id, movement_type = %movement_type),
        err
    )]
    pub fn append_with<F>(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
        movement_type: MovementType,
        context: MovementContext,
        mut change: F,
    ) -> LedgerResult<Option<StockMovement>>
    where
        F: FnMut(&Part) -> LedgerResult<Option<i64>>,
    {
        let mut attempt = 0u32;
        loop {
            let part = self.load_part(ctx, part_id)?;
            let Some(quantity_change) = change(&part)? else {
                debug!(quantity = part.quantity(), "nothing to append");
                return Ok(None);
            };

            let movement = StockMovement::plan(
                ctx,
                &part,
                movement_type,
                quantity_change,
                context.clone(),
                Utc::now(),
            )?;

            match self.store.commit_movement(&movement) {
                Ok(_) => {
                    debug!(
                        quantity_before = movement.quantity_before,
                        quantity_after = movement.quantity_after,
                        attempt,
                        "movement appended"
                    );
                    return Ok(Some(movement));
                }
                Err(StoreError::Concurrency(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(attempt, reason = %msg, "quantity moved underneath append, retrying");
                }
                Err(StoreError::Concurrency(msg)) => {
                    warn!(attempts = attempt + 1, "append gave up after repeated conflicts");
                    return Err(LedgerError::ConcurrencyConflict(msg));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Movements of a part in creation order.
    pub fn history(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
    ) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.list_movements(ctx.tenant_id(), part_id)?)
    }

    pub fn movements_for_job(
        &self,
        ctx: &TenantContext,
        job_id: JobId,
    ) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.movements_for_job(ctx.tenant_id(), job_id)?)
    }

    pub fn movements_for_purchase_order(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
    ) -> LedgerResult<Vec<StockMovement>> {
        Ok(self
            .store
            .movements_for_purchase_order(ctx.tenant_id(), purchase_order_id)?)
    }

    pub fn quantity(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<i64> {
        Ok(self.load_part(ctx, part_id)?.quantity())
    }

    /// Replay all movements and overwrite the stored quantity with the result.
    ///
    /// Idempotent: a second call finds no drift.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), part_id = %part_id), err)]
    pub fn recompute_from_ledger(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
    ) -> LedgerResult<Reconciliation> {
        let repair = self
            .store
            .recompute_quantity(ctx.tenant_id(), part_id, Utc::now())?;
        let ledger_quantity = repair.part.quantity();
        let drift = repair.previous_quantity - ledger_quantity;
        if drift != 0 {
            info!(
                stored = repair.previous_quantity,
                ledger = ledger_quantity,
                drift,
                "part quantity repaired from ledger"
            );
        }
        Ok(Reconciliation {
            part_id,
            stored_quantity: repair.previous_quantity,
            ledger_quantity,
            drift,
            movement_count: repair.movement_count,
            corrected: drift != 0,
        })
    }

    /// Compare stored quantity with the ledger sum without writing anything.
    pub fn verify(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<Reconciliation> {
        let part = self.load_part(ctx, part_id)?;
        let movements = self.store.list_movements(ctx.tenant_id(), part_id)?;
        let ledger_quantity = replay_quantity(&movements);
        Ok(Reconciliation {
            part_id,
            stored_quantity: part.quantity(),
            ledger_quantity,
            drift: part.quantity() - ledger_quantity,
            movement_count: movements.len(),
            corrected: false,
        })
    }

    fn load_part(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<Part> {
        self.store
            .get_part(ctx.tenant_id(), part_id)?
            .ok_or_else(|| LedgerError::not_found(format!("part {part_id}")))
    }
}
