use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, JobId, JobPartId, PartId, TenantId};

/// A part allocated to a job.
///
/// Lifecycle: allocated → claimed for deduction → deducted (terminal).
/// A claimed allocation can no longer be released; a failed deduction hands
/// the claim back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPart {
    pub id: JobPartId,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub part_id: PartId,
    pub quantity: i64,
    pub unit_price: i64,
    pub total_price: i64,
    pub is_deducted: bool,
    pub deducted_at: Option<DateTime<Utc>>,
    /// Set while a deduction holds the allocation.
    #[serde(default)]
    pub deduction_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobPart {
    /// Soft reservation: nothing here reads or writes part quantity.
    pub fn allocate(
        tenant_id: TenantId,
        job_id: JobId,
        part_id: PartId,
        quantity: i64,
        unit_price: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation("allocated quantity must be positive"));
        }
        if unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        let total_price = quantity
            .checked_mul(unit_price)
            .ok_or_else(|| DomainError::validation("total price overflows"))?;

        Ok(Self {
            id: JobPartId::new(),
            tenant_id,
            job_id,
            part_id,
            quantity,
            unit_price,
            total_price,
            is_deducted: false,
            deducted_at: None,
            deduction_started_at: None,
            created_at: now,
        })
    }

    /// Claim the allocation for a deduction. Re-entrant so an interrupted
    /// deduction can be resumed; a no-op once deducted.
    pub fn begin_deduction(&mut self, now: DateTime<Utc>) {
        if !self.is_deducted && self.deduction_started_at.is_none() {
            self.deduction_started_at = Some(now);
        }
    }

    /// Hand back the claim of a deduction that wrote nothing.
    pub fn abandon_deduction(&mut self) {
        if !self.is_deducted {
            self.deduction_started_at = None;
        }
    }

    /// Only allocations no deduction has touched may be released.
    pub fn ensure_releasable(&self) -> DomainResult<()> {
        if self.is_deducted {
            return Err(DomainError::invariant(format!(
                "job part {} is already deducted",
                self.id
            )));
        }
        if self.deduction_started_at.is_some() {
            return Err(DomainError::invariant(format!(
                "job part {} is being deducted",
                self.id
            )));
        }
        Ok(())
    }

    pub fn mark_deducted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_deducted {
            return Err(DomainError::invariant(format!(
                "job part {} is already deducted",
                self.id
            )));
        }
        self.is_deducted = true;
        self.deducted_at = Some(now);
        Ok(())
    }
}

impl Entity for JobPart {
    type Id = JobPartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What to do when a job consumes more than is on hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeductionPolicy {
    /// Clamp the part at zero and record only what was actually on hand.
    #[default]
    Floor,
    /// Fail the line and leave the part untouched.
    Reject,
}

impl DeductionPolicy {
    /// Signed quantity change for consuming `requested` units from `on_hand`.
    ///
    /// `Floor` may return zero when nothing is on hand.
    pub fn quantity_change(self, on_hand: i64, requested: i64) -> DomainResult<i64> {
        if requested <= 0 {
            return Err(DomainError::validation("requested quantity must be positive"));
        }
        match self {
            DeductionPolicy::Floor => {
                let new_quantity = (on_hand - requested).max(0);
                Ok((new_quantity - on_hand).min(0))
            }
            DeductionPolicy::Reject => {
                if on_hand < requested {
                    return Err(DomainError::validation(format!(
                        "insufficient stock: {on_hand} on hand, {requested} requested"
                    )));
                }
                Ok(-requested)
            }
        }
    }
}

impl FromStr for DeductionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "floor" => Ok(DeductionPolicy::Floor),
            "reject" => Ok(DeductionPolicy::Reject),
            other => Err(DomainError::validation(format!(
                "unknown deduction policy '{other}' (expected floor or reject)"
            ))),
        }
    }
}
