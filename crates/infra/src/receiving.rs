//! Purchase order lifecycle and goods receipt.
//!
//! Each receipt line commits on its own: a failing line does not undo the lines
//! before it. Receiving is additive and therefore not idempotent; submitting the
//! same lines twice books the goods twice.
//!
//! A line is recorded on the order before its stock is booked, and taken back
//! if the ledger refuses the movement. Recording re-checks the order status, and
//! cancelling refuses once any line is recorded, so a cancelled order never
//! holds received goods.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockledger_core::{PartId, PoItemId, PurchaseOrderId, TenantContext};
use stockledger_inventory::{MovementContext, MovementType, StockMovement};
use stockledger_purchasing::{
    NewPurchaseOrder, PoItem, PurchaseOrder, PurchaseOrderStatus, ReceiptLine,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::StockLedger;
use crate::report::BatchReport;
use crate::store::{LedgerStore, PurchaseOrderRepository};

/// What receiving one line did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub po_item_id: PoItemId,
    pub part_id: Option<PartId>,
    /// Units booked by this call (zero for skipped lines).
    pub quantity: i64,
    /// `None` for skipped lines and lines without a linked part.
    pub movement: Option<StockMovement>,
    /// Running total on the line after this call.
    pub quantity_received: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptReport {
    pub lines: BatchReport<PoItemId, ReceiptOutcome>,
    /// Order status after re-deriving it from its lines.
    pub status: PurchaseOrderStatus,
}

#[derive(Debug)]
pub struct PurchaseOrderReceiver<S, P> {
    ledger: Arc<StockLedger<S>>,
    orders: P,
}

impl<S, P> PurchaseOrderReceiver<S, P>
where
    S: LedgerStore,
    P: PurchaseOrderRepository,
{
    pub fn new(ledger: Arc<StockLedger<S>>, orders: P) -> Self {
        Self { ledger, orders }
    }

    /// Create a draft order. Linked parts must exist for the tenant.
    #[instrument(
        skip(self, ctx, input),
        fields(tenant_id = %ctx.tenant_id(), po_number = %input.po_number),
        err
    )]
    pub fn create_order(
        &self,
        ctx: &TenantContext,
        input: &NewPurchaseOrder,
    ) -> LedgerResult<PurchaseOrder> {
        for part_id in input.items.iter().filter_map(|i| i.part_id) {
            if !self.ledger.store().part_exists(ctx.tenant_id(), part_id)? {
                return Err(LedgerError::not_found(format!("part {part_id}")));
            }
        }

        let (order, items) = PurchaseOrder::create(ctx.tenant_id(), input, Utc::now())?;
        self.orders.insert_order(&order, &items)?;
        info!(
            purchase_order_id = %order.id_typed(),
            lines = items.len(),
            "purchase order created"
        );
        Ok(order)
    }

    /// `draft -> ordered`.
    pub fn place_order(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
    ) -> LedgerResult<PurchaseOrder> {
        let now = Utc::now();
        Ok(self
            .orders
            .update_order(ctx.tenant_id(), purchase_order_id, &mut |o| o.place(now))?)
    }

    /// Cancel an order that has not received anything.
    pub fn cancel(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
    ) -> LedgerResult<PurchaseOrder> {
        Ok(self
            .orders
            .cancel_order(ctx.tenant_id(), purchase_order_id, Utc::now())?)
    }

    pub fn get(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
    ) -> LedgerResult<PurchaseOrder> {
        self.orders
            .get_order(ctx.tenant_id(), purchase_order_id)?
            .ok_or_else(|| LedgerError::not_found(format!("purchase order {purchase_order_id}")))
    }

    /// Lines of an order by line number.
    pub fn items(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
    ) -> LedgerResult<Vec<PoItem>> {
        self.get(ctx, purchase_order_id)?;
        Ok(self.orders.list_items(ctx.tenant_id(), purchase_order_id)?)
    }

    /// Book received goods line by line, then re-derive the order status.
    ///
    /// Fails as a whole, before touching any line, if the order is a draft or
    /// cancelled.
    #[instrument(
        skip(self, ctx, lines),
        fields(
            tenant_id = %ctx.tenant_id(),
            purchase_order_id = %purchase_order_id,
            lines = lines.len()
        ),
        err
    )]
    pub fn receive(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
        lines: &[ReceiptLine],
    ) -> LedgerResult<ReceiptReport> {
        let order = self.get(ctx, purchase_order_id)?;
        order.ensure_receivable()?;

        let mut report = BatchReport::new();
        for line in lines {
            report.record(line.po_item_id, self.receive_line(ctx, purchase_order_id, line));
        }

        let order = self
            .orders
            .refresh_status(ctx.tenant_id(), purchase_order_id, Utc::now())?;

        if report.is_complete() {
            info!(status = %order.status(), "goods received");
        } else {
            warn!(
                status = %order.status(),
                failed = report.failed.len(),
                "goods receipt partially failed"
            );
        }

        Ok(ReceiptReport {
            lines: report,
            status: order.status(),
        })
    }

    fn receive_line(
        &self,
        ctx: &TenantContext,
        purchase_order_id: PurchaseOrderId,
        line: &ReceiptLine,
    ) -> LedgerResult<ReceiptOutcome> {
        if line.quantity_received < 0 {
            return Err(LedgerError::validation(format!(
                "received quantity cannot be negative (got {})",
                line.quantity_received
            )));
        }

        let item = self
            .orders
            .get_item(ctx.tenant_id(), line.po_item_id)?
            .filter(|i| i.purchase_order_id() == purchase_order_id)
            .ok_or_else(|| LedgerError::not_found(format!("po item {}", line.po_item_id)))?;

        if line.quantity_received == 0 {
            return Ok(ReceiptOutcome {
                po_item_id: item.id_typed(),
                part_id: item.part_id(),
                quantity: 0,
                movement: None,
                quantity_received: item.quantity_received(),
            });
        }

        let item = self.orders.record_receipt(
            ctx.tenant_id(),
            item.id_typed(),
            line.quantity_received,
            Utc::now(),
        )?;

        let movement = match item.part_id() {
            Some(part_id) => match self.ledger.append(
                ctx,
                part_id,
                MovementType::Purchase,
                line.quantity_received,
                MovementContext::for_purchase_order(purchase_order_id, item.id_typed()),
            ) {
                Ok(movement) => Some(movement),
                Err(err) => {
                    self.revert_line(ctx, &item, line.quantity_received);
                    return Err(err);
                }
            },
            None => None,
        };

        Ok(ReceiptOutcome {
            po_item_id: item.id_typed(),
            part_id: item.part_id(),
            quantity: line.quantity_received,
            movement,
            quantity_received: item.quantity_received(),
        })
    }

    fn revert_line(&self, ctx: &TenantContext, item: &PoItem, quantity: i64) {
        let reverted = self
            .orders
            .update_item(ctx.tenant_id(), item.id_typed(), &mut |i| {
                i.revert_receipt(quantity)
            });
        if let Err(err) = reverted {
            warn!(
                po_item_id = %item.id_typed(),
                quantity,
                error = %err,
                "receipt recorded without stock"
            );
        }
    }
}
