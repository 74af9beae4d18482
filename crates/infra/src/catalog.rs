//! Part catalog: registration, lookup and detail edits.
//!
//! Quantity is read here but only ever written by [`StockLedger`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{PartId, TenantContext};
use stockledger_inventory::{MovementContext, MovementType, NewPart, Part, PartDetails};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Reconciliation, StockLedger};
use crate::store::LedgerStore;

pub const OPENING_BALANCE_REASON: &str = "opening balance";

#[derive(Debug)]
pub struct PartCatalog<S> {
    ledger: Arc<StockLedger<S>>,
}

impl<S: LedgerStore> PartCatalog<S> {
    pub fn new(ledger: Arc<StockLedger<S>>) -> Self {
        Self { ledger }
    }

    /// Register a part. A non-zero opening quantity goes through the ledger as a `count`.
    #[instrument(
        skip(self, ctx, input),
        fields(tenant_id = %ctx.tenant_id(), part_number = %input.part_number),
        err
    )]
    pub fn register(&self, ctx: &TenantContext, input: &NewPart) -> LedgerResult<Part> {
        let part = Part::register(ctx.tenant_id(), input, Utc::now())?;
        self.ledger.store().insert_part(&part)?;

        if input.opening_quantity > 0 {
            self.ledger.append(
                ctx,
                part.id_typed(),
                MovementType::Count,
                input.opening_quantity,
                MovementContext::with_reason(OPENING_BALANCE_REASON),
            )?;
        }

        info!(part_id = %part.id_typed(), "part registered");
        self.get(ctx, part.id_typed())
    }

    pub fn get(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<Part> {
        self.ledger
            .store()
            .get_part(ctx.tenant_id(), part_id)?
            .ok_or_else(|| LedgerError::not_found(format!("part {part_id}")))
    }

    pub fn find_by_part_number(
        &self,
        ctx: &TenantContext,
        part_number: &str,
    ) -> LedgerResult<Option<Part>> {
        Ok(self
            .ledger
            .store()
            .find_part_by_number(ctx.tenant_id(), part_number.trim())?)
    }

    /// All parts of the tenant ordered by part number.
    pub fn list(&self, ctx: &TenantContext) -> LedgerResult<Vec<Part>> {
        Ok(self.ledger.store().list_parts(ctx.tenant_id())?)
    }

    pub fn quantity(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<i64> {
        self.ledger.quantity(ctx, part_id)
    }

    pub fn update_details(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
        details: &PartDetails,
    ) -> LedgerResult<Part> {
        Ok(self
            .ledger
            .store()
            .update_part_details(ctx.tenant_id(), part_id, details, Utc::now())?)
    }

    pub fn recompute_from_ledger(
        &self,
        ctx: &TenantContext,
        part_id: PartId,
    ) -> LedgerResult<Reconciliation> {
        self.ledger.recompute_from_ledger(ctx, part_id)
    }
}
