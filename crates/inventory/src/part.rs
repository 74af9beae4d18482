use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, PartId, TenantId};

use crate::movement::StockMovement;

/// A stocked part.
///
/// `quantity` is the aggregate on-hand count. It can only change by applying a
/// committed [`StockMovement`] or by replaying the ledger; there is no setter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    id: PartId,
    tenant_id: TenantId,
    name: String,
    part_number: String,
    quantity: i64,
    min_quantity: i64,
    retail_price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Input for registering a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPart {
    pub name: String,
    pub part_number: String,
    pub min_quantity: i64,
    /// Retail price in the smallest currency unit (e.g. cents).
    pub retail_price: i64,
    /// Recorded as an opening `count` movement when non-zero.
    #[serde(default)]
    pub opening_quantity: i64,
}

/// Editable part details. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDetails {
    pub name: Option<String>,
    pub min_quantity: Option<i64>,
    pub retail_price: Option<i64>,
}

/// Flat storage representation of a part, used by repositories to rehydrate rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPart {
    pub id: PartId,
    pub tenant_id: TenantId,
    pub name: String,
    pub part_number: String,
    pub quantity: i64,
    pub min_quantity: i64,
    pub retail_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Part {
    /// Build a new part with zero on-hand quantity.
    pub fn register(
        tenant_id: TenantId,
        input: &NewPart,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("part name cannot be empty"));
        }
        let part_number = input.part_number.trim();
        if part_number.is_empty() {
            return Err(DomainError::validation("part number cannot be empty"));
        }
        validate_min_quantity(input.min_quantity)?;
        validate_price(input.retail_price)?;
        if input.opening_quantity < 0 {
            return Err(DomainError::validation("opening quantity cannot be negative"));
        }

        Ok(Self {
            id: PartId::new(),
            tenant_id,
            name: name.to_string(),
            part_number: part_number.to_string(),
            quantity: 0,
            min_quantity: input.min_quantity,
            retail_price: input.retail_price,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> PartId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn part_number(&self) -> &str {
        &self.part_number
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn min_quantity(&self) -> i64 {
        self.min_quantity
    }

    pub fn retail_price(&self) -> i64 {
        self.retail_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Low stock includes the boundary: `quantity == min_quantity` is low.
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_quantity
    }

    /// How far below the minimum the part sits (zero at the boundary).
    pub fn shortfall(&self) -> i64 {
        (self.min_quantity - self.quantity).max(0)
    }

    pub fn update_details(
        &mut self,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if let Some(name) = &details.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DomainError::validation("part name cannot be empty"));
            }
            self.name = name.to_string();
        }
        if let Some(min_quantity) = details.min_quantity {
            validate_min_quantity(min_quantity)?;
            self.min_quantity = min_quantity;
        }
        if let Some(price) = details.retail_price {
            validate_price(price)?;
            self.retail_price = price;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Apply a committed movement. The movement must start from the current quantity.
    pub fn apply_movement(&mut self, movement: &StockMovement) -> DomainResult<()> {
        if movement.part_id != self.id || movement.tenant_id != self.tenant_id {
            return Err(DomainError::invariant("movement does not belong to this part"));
        }
        if movement.quantity_before != self.quantity {
            return Err(DomainError::invariant(format!(
                "movement starts at {} but part is at {}",
                movement.quantity_before, self.quantity
            )));
        }
        self.quantity = movement.quantity_after;
        self.updated_at = movement.created_at;
        Ok(())
    }

    /// Overwrite quantity with a value replayed from the ledger.
    pub fn restore_from_ledger(&mut self, replayed: i64, now: DateTime<Utc>) {
        self.quantity = replayed;
        self.updated_at = now;
    }
}

fn validate_min_quantity(value: i64) -> DomainResult<()> {
    if value < 0 {
        return Err(DomainError::validation("min quantity cannot be negative"));
    }
    Ok(())
}

fn validate_price(value: i64) -> DomainResult<()> {
    if value < 0 {
        return Err(DomainError::validation("retail price cannot be negative"));
    }
    Ok(())
}

impl Entity for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl From<StoredPart> for Part {
    fn from(row: StoredPart) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            part_number: row.part_number,
            quantity: row.quantity,
            min_quantity: row.min_quantity,
            retail_price: row.retail_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Part> for StoredPart {
    fn from(part: &Part) -> Self {
        Self {
            id: part.id,
            tenant_id: part.tenant_id,
            name: part.name.clone(),
            part_number: part.part_number.clone(),
            quantity: part.quantity,
            min_quantity: part.min_quantity,
            retail_price: part.retail_price,
            created_at: part.created_at,
            updated_at: part.updated_at,
        }
    }
}
