//! Job part allocation and deduction.
//!
//! Allocation is a soft reservation and never reads or writes part quantity.
//! Deduction consumes stock through the ledger, at most once per allocation:
//! only lines with `is_deducted = false` are processed, and a line whose
//! `job_usage` movement already exists is marked without appending again.
//!
//! Each line is claimed before its movement is appended. A claimed allocation
//! cannot be released, and a released one cannot be claimed, so stock is never
//! consumed for an allocation that no longer exists.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use stockledger_core::{JobId, JobPartId, PartId, TenantContext};
use stockledger_inventory::{
    DeductionPolicy, JobPart, MovementContext, MovementType, StockMovement,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::StockLedger;
use crate::report::BatchReport;
use crate::store::{JobPartRepository, LedgerStore};

/// What deducting one allocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionOutcome {
    pub job_part_id: JobPartId,
    pub part_id: PartId,
    pub requested: i64,
    /// Units actually taken off the shelf. Below `requested` when the floor policy clamped.
    pub applied: i64,
    pub movement: Option<StockMovement>,
    /// The movement was found from an earlier interrupted attempt.
    pub recovered: bool,
}

impl DeductionOutcome {
    pub fn shortfall(&self) -> i64 {
        self.requested - self.applied
    }
}

pub type DeductionReport = BatchReport<JobPartId, DeductionOutcome>;

#[derive(Debug)]
pub struct JobReservationManager<S, J> {
    ledger: Arc<StockLedger<S>>,
    job_parts: J,
    policy: DeductionPolicy,
}

impl<S, J> JobReservationManager<S, J>
where
    S: LedgerStore,
    J: JobPartRepository,
{
    pub fn new(ledger: Arc<StockLedger<S>>, job_parts: J, policy: DeductionPolicy) -> Self {
        Self {
            ledger,
            job_parts,
            policy,
        }
    }

    pub fn policy(&self) -> DeductionPolicy {
        self.policy
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn allocate(
        &self,
        ctx: &TenantContext,
        job_id: JobId,
        part_id: PartId,
        quantity: i64,
        unit_price: i64,
    ) -> LedgerResult<JobPart> {
        if !self.ledger.store().part_exists(ctx.tenant_id(), part_id)? {
            return Err(LedgerError::not_found(format!("part {part_id}")));
        }
        let job_part = JobPart::allocate(
            ctx.tenant_id(),
            job_id,
            part_id,
            quantity,
            unit_price,
            Utc::now(),
        )?;
        self.job_parts.insert_job_part(&job_part)?;
        debug!(job_part_id = %job_part.id, "part allocated to job");
        Ok(job_part)
    }

    /// Allocations of a job in creation order.
    pub fn allocations(&self, ctx: &TenantContext, job_id: JobId) -> LedgerResult<Vec<JobPart>> {
        Ok(self.job_parts.list_for_job(ctx.tenant_id(), job_id)?)
    }

    /// Drop an allocation no deduction has claimed yet.
    pub fn release(&self, ctx: &TenantContext, job_part_id: JobPartId) -> LedgerResult<JobPart> {
        Ok(self.job_parts.remove_pending(ctx.tenant_id(), job_part_id)?)
    }

    /// Units allocated to jobs but not yet deducted.
    pub fn reserved_quantity(&self, ctx: &TenantContext, part_id: PartId) -> LedgerResult<i64> {
        Ok(self
            .job_parts
            .list_for_part(ctx.tenant_id(), part_id)?
            .iter()
            .filter(|jp| !jp.is_deducted)
            .map(|jp| jp.quantity)
            .sum())
    }

    /// Deduct every pending allocation of a job. Lines commit independently.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), policy = ?self.policy))]
    pub fn deduct_for_job(
        &self,
        ctx: &TenantContext,
        job_id: JobId,
    ) -> LedgerResult<DeductionReport> {
        let pending: Vec<JobPart> = self
            .job_parts
            .list_for_job(ctx.tenant_id(), job_id)?
            .into_iter()
            .filter(|jp| !jp.is_deducted)
            .collect();

        let mut report = DeductionReport::new();
        for job_part in &pending {
            report.record(job_part.id, self.deduct_line(ctx, job_part));
        }

        if report.is_complete() {
            info!(lines = report.len(), "job deducted");
        } else {
            warn!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "job deduction partially failed"
            );
        }
        Ok(report)
    }

    fn deduct_line(
        &self,
        ctx: &TenantContext,
        pending: &JobPart,
    ) -> LedgerResult<DeductionOutcome> {
        let claimed = self
            .job_parts
            .begin_deduction(ctx.tenant_id(), pending.id, Utc::now())?;
        let job_part = &claimed;
        if job_part.is_deducted {
            let existing = self.existing_usage(ctx, job_part)?;
            return Ok(outcome(job_part, existing, true));
        }
        if let Some(existing) = self.existing_usage(ctx, job_part)? {
            return self.finish(ctx, job_part, Some(existing), true);
        }

        let policy = self.policy;
        let appended = self.ledger.append_with(
            ctx,
            job_part.part_id,
            MovementType::JobUsage,
            MovementContext::for_job(job_part.job_id, job_part.id),
            |part| {
                let change = policy.quantity_change(part.quantity(), job_part.quantity)?;
                Ok((change != 0).then_some(change))
            },
        );

        match appended {
            Ok(movement) => self.finish(ctx, job_part, movement, false),
            // A concurrent deduction of the same line may have won the append.
            Err(err) => match self.existing_usage(ctx, job_part)? {
                Some(existing) => self.finish(ctx, job_part, Some(existing), true),
                None => {
                    if let Err(abandon) =
                        self.job_parts.abandon_deduction(ctx.tenant_id(), job_part.id)
                    {
                        warn!(job_part_id = %job_part.id, error = %abandon, "deduction claim kept");
                    }
                    Err(err)
                }
            },
        }
    }

    fn existing_usage(
        &self,
        ctx: &TenantContext,
        job_part: &JobPart,
    ) -> LedgerResult<Option<StockMovement>> {
        Ok(self.ledger.store().find_job_part_movement(
            ctx.tenant_id(),
            job_part.part_id,
            job_part.id,
        )?)
    }

    fn finish(
        &self,
        ctx: &TenantContext,
        job_part: &JobPart,
        movement: Option<StockMovement>,
        recovered: bool,
    ) -> LedgerResult<DeductionOutcome> {
        let flipped = self
            .job_parts
            .mark_deducted(ctx.tenant_id(), job_part.id, Utc::now())?;
        if !flipped {
            debug!(job_part_id = %job_part.id, "allocation already marked deducted");
        }
        Ok(outcome(job_part, movement, recovered))
    }
}

fn outcome(
    job_part: &JobPart,
    movement: Option<StockMovement>,
    recovered: bool,
) -> DeductionOutcome {
    DeductionOutcome {
        job_part_id: job_part.id,
        part_id: job_part.part_id,
        requested: job_part.quantity,
        applied: movement.as_ref().map_or(0, |m| -m.quantity_change),
        movement,
        recovered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{TenantId, UserId};
    use stockledger_inventory::{NewPart, Part};

    use chrono::DateTime;

    use crate::error::StoreError;
    use crate::store::{InMemoryJobPartRepository, InMemoryLedgerStore, PartRepository};

    type Manager = JobReservationManager<InMemoryLedgerStore, InMemoryJobPartRepository>;

    fn test_ctx() -> TenantContext {
        TenantContext::new(TenantId::new(), UserId::new()).unwrap()
    }

    fn setup(policy: DeductionPolicy, on_hand: i64) -> (Manager, TenantContext, Part) {
        let ledger = Arc::new(StockLedger::new(InMemoryLedgerStore::new(), 3));
        let ctx = test_ctx();
        let part = Part::register(
            ctx.tenant_id(),
            &NewPart {
                name: "Spark plug".to_string(),
                part_number: "SP-4".to_string(),
                min_quantity: 0,
                retail_price: 450,
                opening_quantity: 0,
            },
            Utc::now(),
        )
        .unwrap();
        ledger.store().insert_part(&part).unwrap();
        if on_hand > 0 {
            ledger
                .append(
                    &ctx,
                    part.id_typed(),
                    MovementType::Count,
                    on_hand,
                    MovementContext::default(),
                )
                .unwrap();
        }
        let manager = JobReservationManager::new(ledger, InMemoryJobPartRepository::new(), policy);
        (manager, ctx, part)
    }

    #[test]
    fn allocation_does_not_touch_quantity() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 2);
        let job = JobId::new();
        let jp = manager.allocate(&ctx, job, part.id_typed(), 5, 450).unwrap();

        assert_eq!(jp.total_price, 2250);
        assert!(!jp.is_deducted);
        assert_eq!(manager.ledger.quantity(&ctx, part.id_typed()).unwrap(), 2);
        assert_eq!(manager.reserved_quantity(&ctx, part.id_typed()).unwrap(), 5);
    }

    #[test]
    fn allocate_validates_inputs() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 0);
        let job = JobId::new();
        assert!(matches!(
            manager.allocate(&ctx, job, PartId::new(), 1, 0),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            manager.allocate(&ctx, job, part.id_typed(), 0, 0),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            manager.allocate(&ctx, job, part.id_typed(), 1, -1),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn floor_at_zero_marks_without_movement() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 0);
        let job = JobId::new();
        manager.allocate(&ctx, job, part.id_typed(), 2, 0).unwrap();

        let report = manager.deduct_for_job(&ctx, job).unwrap();
        let (_, outcome) = &report.succeeded[0];
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.shortfall(), 2);
        assert!(outcome.movement.is_none());
        assert!(manager.allocations(&ctx, job).unwrap()[0].is_deducted);
        assert!(manager.ledger.history(&ctx, part.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn reject_policy_fails_line_and_keeps_quantity() {
        let (manager, ctx, part) = setup(DeductionPolicy::Reject, 3);
        let job = JobId::new();
        let jp = manager.allocate(&ctx, job, part.id_typed(), 5, 0).unwrap();

        let report = manager.deduct_for_job(&ctx, job).unwrap();
        assert_eq!(report.failed_ids(), vec![jp.id]);
        assert!(matches!(report.failed[0].1, LedgerError::Validation(_)));
        assert_eq!(manager.ledger.quantity(&ctx, part.id_typed()).unwrap(), 3);
        let line = &manager.allocations(&ctx, job).unwrap()[0];
        assert!(!line.is_deducted);
        assert!(line.deduction_started_at.is_none());
        // The failed line is released back to the job.
        manager.release(&ctx, jp.id).unwrap();
    }

    #[test]
    fn interrupted_deduction_is_recovered_without_second_movement() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 10);
        let job = JobId::new();
        let jp = manager.allocate(&ctx, job, part.id_typed(), 4, 0).unwrap();

        // Movement written, crash before the line was marked.
        manager
            .ledger
            .append(
                &ctx,
                part.id_typed(),
                MovementType::JobUsage,
                -4,
                MovementContext::for_job(job, jp.id),
            )
            .unwrap();

        let report = manager.deduct_for_job(&ctx, job).unwrap();
        let (_, outcome) = &report.succeeded[0];
        assert!(outcome.recovered);
        assert_eq!(outcome.applied, 4);
        assert_eq!(manager.ledger.quantity(&ctx, part.id_typed()).unwrap(), 6);
        assert_eq!(manager.ledger.history(&ctx, part.id_typed()).unwrap().len(), 2);
    }

    #[test]
    fn deducted_lines_cannot_be_released() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 10);
        let job = JobId::new();
        let kept = manager.allocate(&ctx, job, part.id_typed(), 1, 0).unwrap();
        manager.deduct_for_job(&ctx, job).unwrap();
        let pending = manager.allocate(&ctx, job, part.id_typed(), 2, 0).unwrap();

        assert!(matches!(
            manager.release(&ctx, kept.id),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(manager.release(&ctx, pending.id).unwrap().id, pending.id);
        assert_eq!(manager.reserved_quantity(&ctx, part.id_typed()).unwrap(), 0);
    }

    /// Releases every allocation it lists, as a concurrent `release` would
    /// right after a deduction took its snapshot.
    #[derive(Debug, Default)]
    struct ReleasingRepository {
        inner: InMemoryJobPartRepository,
    }

    impl JobPartRepository for ReleasingRepository {
        fn insert_job_part(&self, job_part: &JobPart) -> Result<(), StoreError> {
            self.inner.insert_job_part(job_part)
        }

        fn get_job_part(
            &self,
            tenant_id: TenantId,
            job_part_id: JobPartId,
        ) -> Result<Option<JobPart>, StoreError> {
            self.inner.get_job_part(tenant_id, job_part_id)
        }

        fn list_for_job(
            &self,
            tenant_id: TenantId,
            job_id: JobId,
        ) -> Result<Vec<JobPart>, StoreError> {
            let rows = self.inner.list_for_job(tenant_id, job_id)?;
            for row in &rows {
                self.inner.remove_pending(tenant_id, row.id)?;
            }
            Ok(rows)
        }

        fn list_for_part(
            &self,
            tenant_id: TenantId,
            part_id: PartId,
        ) -> Result<Vec<JobPart>, StoreError> {
            self.inner.list_for_part(tenant_id, part_id)
        }

        fn begin_deduction(
            &self,
            tenant_id: TenantId,
            job_part_id: JobPartId,
            now: DateTime<Utc>,
        ) -> Result<JobPart, StoreError> {
            self.inner.begin_deduction(tenant_id, job_part_id, now)
        }

        fn abandon_deduction(
            &self,
            tenant_id: TenantId,
            job_part_id: JobPartId,
        ) -> Result<JobPart, StoreError> {
            self.inner.abandon_deduction(tenant_id, job_part_id)
        }

        fn mark_deducted(
            &self,
            tenant_id: TenantId,
            job_part_id: JobPartId,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.mark_deducted(tenant_id, job_part_id, now)
        }

        fn remove_pending(
            &self,
            tenant_id: TenantId,
            job_part_id: JobPartId,
        ) -> Result<JobPart, StoreError> {
            self.inner.remove_pending(tenant_id, job_part_id)
        }
    }

    #[test]
    fn release_after_snapshot_consumes_no_stock() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 10);
        let manager = JobReservationManager::new(
            manager.ledger.clone(),
            ReleasingRepository::default(),
            DeductionPolicy::Floor,
        );
        let job = JobId::new();
        let jp = manager.allocate(&ctx, job, part.id_typed(), 4, 0).unwrap();

        let report = manager.deduct_for_job(&ctx, job).unwrap();
        assert_eq!(report.failed_ids(), vec![jp.id]);
        assert!(matches!(report.failed[0].1, LedgerError::NotFound(_)));
        assert_eq!(manager.ledger.quantity(&ctx, part.id_typed()).unwrap(), 10);
        assert!(manager.ledger.movements_for_job(&ctx, job).unwrap().is_empty());
    }

    #[test]
    fn claimed_line_refuses_release_until_deduction_finishes() {
        let (manager, ctx, part) = setup(DeductionPolicy::Floor, 10);
        let job = JobId::new();
        let jp = manager.allocate(&ctx, job, part.id_typed(), 4, 0).unwrap();

        // A deduction claimed the line, then stopped before appending.
        manager
            .job_parts
            .begin_deduction(ctx.tenant_id(), jp.id, Utc::now())
            .unwrap();
        assert!(matches!(
            manager.release(&ctx, jp.id),
            Err(LedgerError::Validation(_))
        ));

        let report = manager.deduct_for_job(&ctx, job).unwrap();
        assert!(report.is_complete());
        assert_eq!(manager.ledger.quantity(&ctx, part.id_typed()).unwrap(), 6);
        assert!(manager.allocations(&ctx, job).unwrap()[0].is_deducted);
    }
}
