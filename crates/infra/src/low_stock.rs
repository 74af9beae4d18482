//! Low-stock view, recomputed from the catalog on every call.

use serde::Serialize;

use stockledger_core::TenantContext;
use stockledger_inventory::Part;

use crate::error::LedgerResult;
use crate::store::PartRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockEntry {
    pub part: Part,
    /// `min_quantity - quantity`; zero when sitting exactly at the minimum.
    pub shortfall: i64,
}

#[derive(Debug)]
pub struct LowStockMonitor<S> {
    parts: S,
}

impl<S: PartRepository> LowStockMonitor<S> {
    pub fn new(parts: S) -> Self {
        Self { parts }
    }

    /// Parts with `quantity <= min_quantity`, ordered by part number.
    pub fn list(&self, ctx: &TenantContext) -> LedgerResult<Vec<LowStockEntry>> {
        Ok(self
            .parts
            .list_parts(ctx.tenant_id())?
            .into_iter()
            .filter(Part::is_low_stock)
            .map(|part| LowStockEntry {
                shortfall: part.shortfall(),
                part,
            })
            .collect())
    }
}
