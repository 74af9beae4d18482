use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    CustomerId, DomainError, DomainResult, Entity, JobId, PartId, PurchaseOrderId,
    SerializedItemId, TenantId,
};

/// Lifecycle status of one serial-numbered unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    InStock,
    Reserved,
    Sold,
    UsedInJob,
    Returned,
    Damaged,
}

impl SerialStatus {
    pub const ALL: [SerialStatus; 6] = [
        SerialStatus::InStock,
        SerialStatus::Reserved,
        SerialStatus::Sold,
        SerialStatus::UsedInJob,
        SerialStatus::Returned,
        SerialStatus::Damaged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SerialStatus::InStock => "in_stock",
            SerialStatus::Reserved => "reserved",
            SerialStatus::Sold => "sold",
            SerialStatus::UsedInJob => "used_in_job",
            SerialStatus::Returned => "returned",
            SerialStatus::Damaged => "damaged",
        }
    }

    /// Allowed next states.
    pub fn allowed_transitions(self) -> &'static [SerialStatus] {
        use SerialStatus::*;
        match self {
            InStock => &[Reserved, Sold, UsedInJob, Damaged],
            Reserved => &[Sold, UsedInJob, InStock, Damaged],
            UsedInJob => &[Returned, Sold],
            Sold => &[Returned],
            Returned => &[InStock, Damaged],
            Damaged => &[],
        }
    }

    pub fn can_transition_to(self, next: SerialStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Physically on the shelf: in stock or held for a job.
    pub fn is_on_hand(self) -> bool {
        matches!(self, SerialStatus::InStock | SerialStatus::Reserved)
    }
}

impl core::fmt::Display for SerialStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SerialStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SerialStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown serial status '{s}'")))
    }
}

/// Where and how a unit was acquired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    pub acquired_at: Option<DateTime<Utc>>,
    pub supplier: Option<String>,
    pub purchase_order_id: Option<PurchaseOrderId>,
    /// Cost in the smallest currency unit.
    pub unit_cost: Option<i64>,
    pub notes: Option<String>,
}

/// References carried by a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    pub job_id: Option<JobId>,
    pub customer_id: Option<CustomerId>,
}

impl TransitionContext {
    pub fn job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            customer_id: None,
        }
    }

    pub fn customer(customer_id: CustomerId) -> Self {
        Self {
            job_id: None,
            customer_id: Some(customer_id),
        }
    }
}

/// An individually identifiable physical unit of a part.
///
/// Tracked independently of the part's aggregate quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedItem {
    pub id: SerializedItemId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub serial_number: String,
    pub status: SerialStatus,
    pub job_id: Option<JobId>,
    pub customer_id: Option<CustomerId>,
    pub acquisition: AcquisitionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SerializedItem {
    pub fn intake(
        tenant_id: TenantId,
        part_id: PartId,
        serial_number: &str,
        acquisition: AcquisitionMetadata,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let serial_number = serial_number.trim();
        if serial_number.is_empty() {
            return Err(DomainError::validation("serial number cannot be empty"));
        }
        if acquisition.unit_cost.is_some_and(|c| c < 0) {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }

        Ok(Self {
            id: SerializedItemId::new(),
            tenant_id,
            part_id,
            serial_number: serial_number.to_string(),
            status: SerialStatus::InStock,
            job_id: None,
            customer_id: None,
            acquisition,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn transition(
        &mut self,
        next: SerialStatus,
        context: &TransitionContext,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }

        match next {
            SerialStatus::InStock => {
                self.job_id = None;
                self.customer_id = None;
            }
            SerialStatus::Reserved | SerialStatus::UsedInJob => {
                if context.job_id.is_some() {
                    self.job_id = context.job_id;
                }
            }
            SerialStatus::Sold => {
                if context.customer_id.is_some() {
                    self.customer_id = context.customer_id;
                }
            }
            SerialStatus::Returned | SerialStatus::Damaged => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for SerializedItem {
    type Id = SerializedItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> SerializedItem {
        SerializedItem::intake(
            TenantId::new(),
            PartId::new(),
            " SN-0001 ",
            AcquisitionMetadata::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn intake_starts_in_stock_with_trimmed_serial() {
        let item = unit();
        assert_eq!(item.status, SerialStatus::InStock);
        assert_eq!(item.serial_number, "SN-0001");
    }

    #[test]
    fn intake_rejects_blank_serial() {
        let err = SerializedItem::intake(
            TenantId::new(),
            PartId::new(),
            "  ",
            AcquisitionMetadata::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn edge_table_matches_lifecycle() {
        use SerialStatus::*;
        let allowed = [
            (InStock, Reserved),
            (InStock, Sold),
            (InStock, UsedInJob),
            (InStock, Damaged),
            (Reserved, Sold),
            (Reserved, UsedInJob),
            (Reserved, InStock),
            (Reserved, Damaged),
            (UsedInJob, Returned),
            (UsedInJob, Sold),
            (Sold, Returned),
            (Returned, InStock),
            (Returned, Damaged),
        ];
        for from in SerialStatus::ALL {
            for to in SerialStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn damaged_rejects_every_transition() {
        let mut item = unit();
        item.transition(SerialStatus::Damaged, &TransitionContext::default(), Utc::now())
            .unwrap();
        assert!(item.status.is_terminal());
        for next in SerialStatus::ALL {
            let err = item
                .transition(next, &TransitionContext::default(), Utc::now())
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidTransition { .. }));
        }
        assert_eq!(item.status, SerialStatus::Damaged);
    }

    #[test]
    fn references_follow_the_unit() {
        let mut item = unit();
        let job_id = JobId::new();
        let customer_id = CustomerId::new();

        item.transition(SerialStatus::Reserved, &TransitionContext::job(job_id), Utc::now())
            .unwrap();
        assert_eq!(item.job_id, Some(job_id));

        item.transition(SerialStatus::Sold, &TransitionContext::customer(customer_id), Utc::now())
            .unwrap();
        assert_eq!(item.job_id, Some(job_id));
        assert_eq!(item.customer_id, Some(customer_id));

        item.transition(SerialStatus::Returned, &TransitionContext::default(), Utc::now())
            .unwrap();
        item.transition(SerialStatus::InStock, &TransitionContext::default(), Utc::now())
            .unwrap();
        assert_eq!(item.job_id, None);
        assert_eq!(item.customer_id, None);
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let mut item = unit();
        let err = item
            .transition(SerialStatus::Returned, &TransitionContext::default(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: "in_stock".to_string(),
                to: "returned".to_string(),
            }
        );
    }
}
