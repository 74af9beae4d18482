use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, PartId, PoItemId, PurchaseOrderId, TenantId,
};

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    /// Goods can be booked in once the order has been placed.
    pub fn accepts_receipts(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Ordered
                | PurchaseOrderStatus::PartiallyReceived
                | PurchaseOrderStatus::Received
        )
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input line for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPoItem {
    /// `None` for non-stock lines (freight, services).
    pub part_id: Option<PartId>,
    pub description: String,
    pub quantity_ordered: i64,
    /// Cost per unit in the smallest currency unit.
    pub unit_cost: i64,
}

/// Input for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub po_number: String,
    pub supplier: String,
    pub items: Vec<NewPoItem>,
}

/// One receipt instruction: how many units of an item arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub po_item_id: PoItemId,
    pub quantity_received: i64,
}

/// Purchase order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: TenantId,
    po_number: String,
    supplier: String,
    status: PurchaseOrderStatus,
    total_cost: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Purchase order line.
///
/// `quantity_received` only grows, apart from reverting a receipt whose stock
/// was never booked; a line is closed once it reaches `quantity_ordered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoItem {
    id: PoItemId,
    tenant_id: TenantId,
    purchase_order_id: PurchaseOrderId,
    line_no: u32,
    part_id: Option<PartId>,
    description: String,
    quantity_ordered: i64,
    quantity_received: i64,
    unit_cost: i64,
    received_date: Option<DateTime<Utc>>,
}

impl PurchaseOrder {
    /// Create a draft order and its lines.
    pub fn create(
        tenant_id: TenantId,
        input: &NewPurchaseOrder,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, Vec<PoItem>)> {
        let po_number = input.po_number.trim();
        if po_number.is_empty() {
            return Err(DomainError::validation("po number cannot be empty"));
        }
        let supplier = input.supplier.trim();
        if supplier.is_empty() {
            return Err(DomainError::validation("supplier cannot be empty"));
        }
        if input.items.is_empty() {
            return Err(DomainError::validation(
                "cannot create purchase order without items",
            ));
        }

        let id = PurchaseOrderId::new();
        let mut items = Vec::with_capacity(input.items.len());
        let mut total_cost = 0i64;
        for (idx, line) in input.items.iter().enumerate() {
            if line.quantity_ordered <= 0 {
                return Err(DomainError::validation(format!(
                    "item {idx}: quantity ordered must be positive"
                )));
            }
            if line.unit_cost < 0 {
                return Err(DomainError::validation(format!(
                    "item {idx}: unit cost cannot be negative"
                )));
            }
            let line_total = line
                .quantity_ordered
                .checked_mul(line.unit_cost)
                .ok_or_else(|| DomainError::validation(format!("item {idx}: total overflows")))?;
            total_cost = total_cost
                .checked_add(line_total)
                .ok_or_else(|| DomainError::validation("order total overflows"))?;

            items.push(PoItem {
                id: PoItemId::new(),
                tenant_id,
                purchase_order_id: id,
                line_no: (idx as u32) + 1,
                part_id: line.part_id,
                description: line.description.trim().to_string(),
                quantity_ordered: line.quantity_ordered,
                quantity_received: 0,
                unit_cost: line.unit_cost,
                received_date: None,
            });
        }

        let order = Self {
            id,
            tenant_id,
            po_number: po_number.to_string(),
            supplier: supplier.to_string(),
            status: PurchaseOrderStatus::Draft,
            total_cost,
            created_at: now,
            updated_at: now,
        };
        Ok((order, items))
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }

    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn total_cost(&self) -> i64 {
        self.total_cost
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn place(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Ordered,
            ));
        }
        self.status = PurchaseOrderStatus::Ordered;
        self.updated_at = now;
        Ok(())
    }

    /// Cancel an order that has not received anything yet.
    pub fn cancel(&mut self, items: &[PoItem], now: DateTime<Utc>) -> DomainResult<()> {
        if !matches!(
            self.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Ordered
        ) {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Cancelled,
            ));
        }
        if items.iter().any(|i| i.quantity_received > 0) {
            return Err(DomainError::invariant(
                "cannot cancel a purchase order with received goods",
            ));
        }
        self.status = PurchaseOrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_receivable(&self) -> DomainResult<()> {
        if !self.status.accepts_receipts() {
            return Err(DomainError::validation(format!(
                "cannot receive goods against a {} purchase order",
                self.status
            )));
        }
        Ok(())
    }

    /// Re-derive status from the current lines.
    ///
    /// All lines closed → received; anything received → partially received;
    /// otherwise the status is left as is.
    pub fn refresh_status(&mut self, items: &[PoItem], now: DateTime<Utc>) -> bool {
        if !self.status.accepts_receipts() {
            return false;
        }
        let next = if !items.is_empty() && items.iter().all(PoItem::is_closed) {
            PurchaseOrderStatus::Received
        } else if items.iter().any(|i| i.quantity_received > 0) {
            PurchaseOrderStatus::PartiallyReceived
        } else {
            self.status
        };
        if next == self.status {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

impl PoItem {
    pub fn id_typed(&self) -> PoItemId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn purchase_order_id(&self) -> PurchaseOrderId {
        self.purchase_order_id
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn part_id(&self) -> Option<PartId> {
        self.part_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity_ordered(&self) -> i64 {
        self.quantity_ordered
    }

    pub fn quantity_received(&self) -> i64 {
        self.quantity_received
    }

    pub fn unit_cost(&self) -> i64 {
        self.unit_cost
    }

    pub fn received_date(&self) -> Option<DateTime<Utc>> {
        self.received_date
    }

    pub fn is_closed(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    pub fn outstanding(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }

    /// Accumulate a receipt. Over-receipt is allowed.
    pub fn record_receipt(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        self.quantity_received = self
            .quantity_received
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation("received quantity overflows"))?;
        self.received_date = Some(now);
        Ok(())
    }

    /// Take back a receipt whose stock could not be booked.
    pub fn revert_receipt(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 || quantity > self.quantity_received {
            return Err(DomainError::invariant(format!(
                "cannot revert {quantity} of {} received",
                self.quantity_received
            )));
        }
        self.quantity_received -= quantity;
        if self.quantity_received == 0 {
            self.received_date = None;
        }
        Ok(())
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Entity for PoItem {
    type Id = PoItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
