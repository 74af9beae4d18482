//! Postgres-backed ledger store.
//!
//! Parts and movements live in two tables (see `migrations/0001_stock_ledger.sql`).
//! An append runs in one transaction:
//!
//! 1. `SELECT quantity ... FOR UPDATE` locks the part row
//! 2. the locked quantity is compared with `movement.quantity_before`
//! 3. the movement is inserted and the part quantity updated
//! 4. commit
//!
//! A stale `quantity_before` rolls back with `StoreError::Concurrency`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | Anything else | any | `Backend` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use stockledger_core::{
    JobId, JobPartId, PartId, PoItemId, PurchaseOrderId, StockMovementId, TenantId, UserId,
};
use stockledger_inventory::{Part, PartDetails, StockMovement, StoredPart, replay_quantity};

use super::{LedgerStore, PartRepository, QuantityRepair, StockMovementRepository};
use crate::error::StoreError;

/// Schema for the ledger tables.
pub const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const PART_COLUMNS: &str = "id, tenant_id, name, part_number, quantity, \
    min_quantity, retail_price, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, part_id, movement_type, quantity_change, \
    quantity_before, quantity_after, job_id, job_part_id, purchase_order_id, po_item_id, \
    reason, actor, created_at";

/// Postgres ledger store.
///
/// The repository traits are synchronous; each call is driven to completion
/// on the runtime handle given at construction. Call them from threads that
/// are not themselves runtime workers (e.g. `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Connect to `database_url` and make sure the schema exists.
    pub async fn connect(database_url: &str, runtime: Handle) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool, runtime);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, part),
        fields(tenant_id = %part.tenant_id(), part_id = %part.id_typed()),
        err
    )]
    pub async fn insert_part_async(&self, part: &Part) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO parts (
                id, tenant_id, name, part_number, quantity,
                min_quantity, retail_price, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(part.id_typed().as_uuid())
        .bind(part.tenant_id().as_uuid())
        .bind(part.name())
        .bind(part.part_number())
        .bind(part.quantity())
        .bind(part.min_quantity())
        .bind(part.retail_price())
        .bind(part.created_at())
        .bind(part.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_part", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    pub async fn get_part_async(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_part", e))?;

        row.map(|r| decode_part(&r)).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn find_part_by_number_async(
        &self,
        tenant_id: TenantId,
        part_number: &str,
    ) -> Result<Option<Part>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND part_number = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_number)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_part_by_number", e))?;

        row.map(|r| decode_part(&r)).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn list_parts_async(&self, tenant_id: TenantId) -> Result<Vec<Part>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 ORDER BY part_number ASC"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_parts", e))?;

        rows.iter().map(decode_part).collect()
    }

    #[instrument(skip(self, details), fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    pub async fn update_part_details_async(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> Result<Part, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut part = lock_part(&mut tx, tenant_id, part_id).await?;
        part.update_details(details, now)?;

        sqlx::query(
            r#"
            UPDATE parts
            SET name = $3, min_quantity = $4, retail_price = $5, updated_at = $6
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .bind(part.name())
        .bind(part.min_quantity())
        .bind(part.retail_price())
        .bind(part.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_part_details", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(part)
    }

    async fn query_movements(
        &self,
        operation: &str,
        filter: &str,
        tenant_id: TenantId,
        key: uuid::Uuid,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 AND {filter} ORDER BY seq ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(key)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    pub async fn list_movements_async(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        if self.get_part_async(tenant_id, part_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("part {part_id}")));
        }
        self.query_movements("list_movements", "part_id = $2", tenant_id, *part_id.as_uuid())
            .await
    }

    /// Append one movement and move the part quantity with it.
    #[instrument(
        skip(self, movement),
        fields(
            tenant_id = %movement.tenant_id,
            part_id = %movement.part_id,
            movement_type = %movement.movement_type,
            quantity_change = movement.quantity_change,
            quantity_after = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_movement_async(
        &self,
        movement: &StockMovement,
    ) -> Result<Part, StoreError> {
        if !movement.is_consistent() {
            return Err(StoreError::Conflict(format!(
                "movement {} does not add up",
                movement.id
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut part = lock_part(&mut tx, movement.tenant_id, movement.part_id).await?;
        if part.quantity() != movement.quantity_before {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Concurrency(format!(
                "part {} is at {}, movement expected {}",
                movement.part_id,
                part.quantity(),
                movement.quantity_before
            )));
        }
        part.apply_movement(movement)?;

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, tenant_id, part_id, movement_type, quantity_change,
                quantity_before, quantity_after, job_id, job_part_id,
                purchase_order_id, po_item_id, reason, actor, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.tenant_id.as_uuid())
        .bind(movement.part_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity_change)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(movement.job_id.map(uuid::Uuid::from))
        .bind(movement.job_part_id.map(uuid::Uuid::from))
        .bind(movement.purchase_order_id.map(uuid::Uuid::from))
        .bind(movement.po_item_id.map(uuid::Uuid::from))
        .bind(movement.reason.as_deref())
        .bind(movement.actor.as_uuid())
        .bind(movement.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        write_quantity(&mut tx, &part).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("quantity_after", part.quantity());
        Ok(part)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, part_id = %part_id), err)]
    pub async fn recompute_quantity_async(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        now: DateTime<Utc>,
    ) -> Result<QuantityRepair, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut part = lock_part(&mut tx, tenant_id, part_id).await?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 AND part_id = $2 ORDER BY seq ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(part_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_movements", e))?;
        let movements = rows
            .iter()
            .map(decode_movement)
            .collect::<Result<Vec<_>, _>>()?;

        let previous_quantity = part.quantity();
        let replayed = replay_quantity(&movements);
        if replayed != previous_quantity {
            part.restore_from_ledger(replayed, now);
            write_quantity(&mut tx, &part).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(QuantityRepair {
            part,
            previous_quantity,
            movement_count: movements.len(),
        })
    }
}

async fn lock_part(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    part_id: PartId,
) -> Result<Part, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {PART_COLUMNS} FROM parts WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id.as_uuid())
    .bind(part_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_part", e))?;

    match row {
        Some(row) => decode_part(&row),
        None => Err(StoreError::NotFound(format!("part {part_id}"))),
    }
}

async fn write_quantity(tx: &mut Transaction<'_, Postgres>, part: &Part) -> Result<(), StoreError> {
    sqlx::query("UPDATE parts SET quantity = $3, updated_at = $4 WHERE tenant_id = $1 AND id = $2")
        .bind(part.tenant_id().as_uuid())
        .bind(part.id_typed().as_uuid())
        .bind(part.quantity())
        .bind(part.updated_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_quantity", e))?;
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("23503") => StoreError::NotFound(msg),
                Some("23514") => StoreError::Conflict(msg),
                Some("40001") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct PartRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    name: String,
    part_number: String,
    quantity: i64,
    min_quantity: i64,
    retail_price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for PartRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PartRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            part_number: row.try_get("part_number")?,
            quantity: row.try_get("quantity")?,
            min_quantity: row.try_get("min_quantity")?,
            retail_price: row.try_get("retail_price")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<PartRow> for Part {
    fn from(row: PartRow) -> Self {
        StoredPart {
            id: PartId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            name: row.name,
            part_number: row.part_number,
            quantity: row.quantity,
            min_quantity: row.min_quantity,
            retail_price: row.retail_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
        .into()
    }
}

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    part_id: uuid::Uuid,
    movement_type: String,
    quantity_change: i64,
    quantity_before: i64,
    quantity_after: i64,
    job_id: Option<uuid::Uuid>,
    job_part_id: Option<uuid::Uuid>,
    purchase_order_id: Option<uuid::Uuid>,
    po_item_id: Option<uuid::Uuid>,
    reason: Option<String>,
    actor: uuid::Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for MovementRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            part_id: row.try_get("part_id")?,
            movement_type: row.try_get("movement_type")?,
            quantity_change: row.try_get("quantity_change")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            job_id: row.try_get("job_id")?,
            job_part_id: row.try_get("job_part_id")?,
            purchase_order_id: row.try_get("purchase_order_id")?,
            po_item_id: row.try_get("po_item_id")?,
            reason: row.try_get("reason")?,
            actor: row.try_get("actor")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: StockMovementId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            part_id: PartId::from_uuid(row.part_id),
            movement_type: row.movement_type.parse()?,
            quantity_change: row.quantity_change,
            quantity_before: row.quantity_before,
            quantity_after: row.quantity_after,
            job_id: row.job_id.map(JobId::from_uuid),
            job_part_id: row.job_part_id.map(JobPartId::from_uuid),
            purchase_order_id: row.purchase_order_id.map(PurchaseOrderId::from_uuid),
            po_item_id: row.po_item_id.map(PoItemId::from_uuid),
            reason: row.reason,
            actor: UserId::from_uuid(row.actor),
            created_at: row.created_at,
        })
    }
}

fn decode_part(row: &sqlx::postgres::PgRow) -> Result<Part, StoreError> {
    PartRow::from_row(row)
        .map(Part::from)
        .map_err(|e| StoreError::Backend(format!("failed to decode part row: {e}")))
}

fn decode_movement(row: &sqlx::postgres::PgRow) -> Result<StockMovement, StoreError> {
    MovementRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode movement row: {e}")))?
        .try_into()
}

// Sync repository traits

impl PartRepository for PostgresLedgerStore {
    fn insert_part(&self, part: &Part) -> Result<(), StoreError> {
        self.runtime.block_on(self.insert_part_async(part))
    }

    fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> Result<Option<Part>, StoreError> {
        self.runtime.block_on(self.get_part_async(tenant_id, part_id))
    }

    fn find_part_by_number(
        &self,
        tenant_id: TenantId,
        part_number: &str,
    ) -> Result<Option<Part>, StoreError> {
        self.runtime
            .block_on(self.find_part_by_number_async(tenant_id, part_number))
    }

    fn list_parts(&self, tenant_id: TenantId) -> Result<Vec<Part>, StoreError> {
        self.runtime.block_on(self.list_parts_async(tenant_id))
    }

    fn update_part_details(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> Result<Part, StoreError> {
        self.runtime
            .block_on(self.update_part_details_async(tenant_id, part_id, details, now))
    }
}

impl StockMovementRepository for PostgresLedgerStore {
    fn list_movements(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.runtime.block_on(self.list_movements_async(tenant_id, part_id))
    }

    fn movements_for_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.runtime.block_on(self.query_movements(
            "movements_for_job",
            "job_id = $2",
            tenant_id,
            *job_id.as_uuid(),
        ))
    }

    fn movements_for_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.runtime.block_on(self.query_movements(
            "movements_for_purchase_order",
            "purchase_order_id = $2",
            tenant_id,
            *purchase_order_id.as_uuid(),
        ))
    }

    fn find_job_part_movement(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        job_part_id: JobPartId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let found = self.runtime.block_on(self.query_movements(
            "find_job_part_movement",
            "job_part_id = $2 AND movement_type = 'job_usage'",
            tenant_id,
            *job_part_id.as_uuid(),
        ))?;
        Ok(found.into_iter().find(|m| m.part_id == part_id))
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn commit_movement(&self, movement: &StockMovement) -> Result<Part, StoreError> {
        self.runtime.block_on(self.commit_movement_async(movement))
    }

    fn recompute_quantity(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        now: DateTime<Utc>,
    ) -> Result<QuantityRepair, StoreError> {
        self.runtime
            .block_on(self.recompute_quantity_async(tenant_id, part_id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::TenantContext;
    use stockledger_inventory::{MovementContext, MovementType, NewPart};

    use crate::config::database_url_from_env;

    #[test]
    fn pool_closed_maps_to_backend() {
        let err = map_sqlx_error("commit", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("commit")));
    }

    #[test]
    fn schema_declares_both_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS parts"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS stock_movements"));
    }

    #[test]
    fn movement_row_rejects_unknown_type() {
        let row = MovementRow {
            id: uuid::Uuid::nil(),
            tenant_id: uuid::Uuid::nil(),
            part_id: uuid::Uuid::nil(),
            movement_type: "teleport".to_string(),
            quantity_change: 1,
            quantity_before: 0,
            quantity_after: 1,
            job_id: None,
            job_part_id: None,
            purchase_order_id: None,
            po_item_id: None,
            reason: None,
            actor: uuid::Uuid::nil(),
            created_at: Utc::now(),
        };
        let err = StockMovement::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Domain(_)));
    }

    fn plan(
        ctx: &TenantContext,
        part: &Part,
        movement_type: MovementType,
        change: i64,
        context: MovementContext,
    ) -> StockMovement {
        StockMovement::plan(ctx, part, movement_type, change, context, Utc::now()).unwrap()
    }

    /// Runs only when `DATABASE_URL` points at a disposable database.
    #[test]
    fn commits_reject_stale_and_duplicate_movements() {
        let Ok(database_url) = database_url_from_env() else {
            return;
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = PostgresLedgerStore::connect(&database_url, Handle::current())
                .await
                .unwrap();
            let ctx = TenantContext::new(TenantId::new(), UserId::new()).unwrap();
            let part = Part::register(
                ctx.tenant_id(),
                &NewPart {
                    name: "Oil filter".to_string(),
                    part_number: "OF-1".to_string(),
                    min_quantity: 0,
                    retail_price: 800,
                    opening_quantity: 0,
                },
                Utc::now(),
            )
            .unwrap();
            store.insert_part_async(&part).await.unwrap();

            let first = plan(&ctx, &part, MovementType::Purchase, 5, MovementContext::default());
            let stale = plan(&ctx, &part, MovementType::Purchase, 3, MovementContext::default());
            let after = store.commit_movement_async(&first).await.unwrap();
            assert_eq!(after.quantity(), 5);
            assert!(matches!(
                store.commit_movement_async(&stale).await,
                Err(StoreError::Concurrency(_))
            ));

            let (job_id, job_part_id) = (JobId::new(), JobPartId::new());
            let usage = plan(
                &ctx,
                &after,
                MovementType::JobUsage,
                -2,
                MovementContext::for_job(job_id, job_part_id),
            );
            let after = store.commit_movement_async(&usage).await.unwrap();
            let again = plan(
                &ctx,
                &after,
                MovementType::JobUsage,
                -1,
                MovementContext::for_job(job_id, job_part_id),
            );
            assert!(matches!(
                store.commit_movement_async(&again).await,
                Err(StoreError::Duplicate(_))
            ));

            let stored = store
                .get_part_async(ctx.tenant_id(), part.id_typed())
                .await
                .unwrap()
                .unwrap();
            let movements = store
                .list_movements_async(ctx.tenant_id(), part.id_typed())
                .await
                .unwrap();
            assert_eq!(stored.quantity(), 3);
            assert_eq!(movements.len(), 2);
            assert_eq!(replay_quantity(&movements), 3);
        });
    }
}
