use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, JobId, JobPartId, PartId, PoItemId, PurchaseOrderId,
    StockMovementId, TenantContext, TenantId, UserId,
};

use crate::part::Part;

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Adjustment,
    JobUsage,
    Purchase,
    Return,
    Transfer,
    Damage,
    Count,
}

impl MovementType {
    pub const ALL: [MovementType; 7] = [
        MovementType::Adjustment,
        MovementType::JobUsage,
        MovementType::Purchase,
        MovementType::Return,
        MovementType::Transfer,
        MovementType::Damage,
        MovementType::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Adjustment => "adjustment",
            MovementType::JobUsage => "job_usage",
            MovementType::Purchase => "purchase",
            MovementType::Return => "return",
            MovementType::Transfer => "transfer",
            MovementType::Damage => "damage",
            MovementType::Count => "count",
        }
    }

    /// Only manual adjustments may record a known deficit below zero.
    pub fn allows_negative_stock(self) -> bool {
        matches!(self, MovementType::Adjustment)
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Optional references and reason attached to a movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementContext {
    pub job_id: Option<JobId>,
    pub job_part_id: Option<JobPartId>,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub po_item_id: Option<PoItemId>,
    pub reason: Option<String>,
}

impl MovementContext {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn for_job(job_id: JobId, job_part_id: JobPartId) -> Self {
        Self {
            job_id: Some(job_id),
            job_part_id: Some(job_part_id),
            ..Self::default()
        }
    }

    pub fn for_purchase_order(purchase_order_id: PurchaseOrderId, po_item_id: PoItemId) -> Self {
        Self {
            purchase_order_id: Some(purchase_order_id),
            po_item_id: Some(po_item_id),
            ..Self::default()
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// One immutable, signed quantity change recorded in the ledger.
///
/// Invariant: `quantity_after == quantity_before + quantity_change`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: StockMovementId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub job_id: Option<JobId>,
    pub job_part_id: Option<JobPartId>,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub po_item_id: Option<PoItemId>,
    pub reason: Option<String>,
    pub actor: UserId,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Plan a movement against the part's current quantity.
    ///
    /// Rejects a zero change, a part from another tenant, and a negative result
    /// for movement types that do not allow negative stock.
    pub fn plan(
        ctx: &TenantContext,
        part: &Part,
        movement_type: MovementType,
        quantity_change: i64,
        context: MovementContext,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if part.tenant_id() != ctx.tenant_id() {
            return Err(DomainError::not_found(format!("part {}", part.id_typed())));
        }
        if quantity_change == 0 {
            return Err(DomainError::validation("quantity change cannot be zero"));
        }

        let quantity_before = part.quantity();
        let quantity_after = quantity_before
            .checked_add(quantity_change)
            .ok_or_else(|| DomainError::validation("quantity change overflows"))?;

        if quantity_after < 0 && !movement_type.allows_negative_stock() {
            return Err(DomainError::validation(format!(
                "{movement_type} of {quantity_change} would leave part {} at {quantity_after}",
                part.part_number()
            )));
        }

        Ok(Self {
            id: StockMovementId::new(),
            tenant_id: ctx.tenant_id(),
            part_id: part.id_typed(),
            movement_type,
            quantity_change,
            quantity_before,
            quantity_after,
            job_id: context.job_id,
            job_part_id: context.job_part_id,
            purchase_order_id: context.purchase_order_id,
            po_item_id: context.po_item_id,
            reason: context.reason,
            actor: ctx.actor(),
            created_at: now,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity_before.checked_add(self.quantity_change) == Some(self.quantity_after)
    }
}

impl Entity for StockMovement {
    type Id = StockMovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Replay movements in creation order and return the terminal quantity.
pub fn replay_quantity<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(|m| m.quantity_change).sum()
}
