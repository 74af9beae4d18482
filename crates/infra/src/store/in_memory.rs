use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use stockledger_core::{
    DomainResult, JobId, JobPartId, PartId, PoItemId, PurchaseOrderId, SerializedItemId, TenantId,
};
use stockledger_inventory::{
    JobPart, MovementType, Part, PartDetails, SerializedItem, StockMovement, replay_quantity,
};
use stockledger_purchasing::{PoItem, PurchaseOrder};

use super::tenant_store::InMemoryTenantStore;
use super::{
    JobPartRepository, LedgerStore, PartRepository, PurchaseOrderRepository, QuantityRepair,
    SerializedItemRepository, StockMovementRepository,
};
use crate::error::StoreError;

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct PartKey {
    tenant_id: TenantId,
    part_id: PartId,
}

/// A part and its movement history, guarded together.
#[derive(Debug)]
struct PartRow {
    part: Part,
    movements: Vec<StockMovement>,
}

#[derive(Debug, Default)]
struct Catalog {
    rows: HashMap<PartKey, Arc<Mutex<PartRow>>>,
    by_number: HashMap<(TenantId, String), PartId>,
}

/// In-memory ledger store with per-part row locks.
///
/// The catalog map is only write-locked to register parts; appends take a read
/// lock to find the row and then lock that row alone, so appends to different
/// parts never wait on each other.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    catalog: RwLock<Catalog>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Option<Arc<Mutex<PartRow>>>, StoreError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.rows.get(&PartKey { tenant_id, part_id }).cloned())
    }

    fn existing_row(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Arc<Mutex<PartRow>>, StoreError> {
        self.row(tenant_id, part_id)?
            .ok_or_else(|| StoreError::NotFound(format!("part {part_id}")))
    }

    fn tenant_rows(&self, tenant_id: TenantId) -> Result<Vec<Arc<Mutex<PartRow>>>, StoreError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog
            .rows
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn scan_movements(
        &self,
        tenant_id: TenantId,
        filter: impl Fn(&StockMovement) -> bool,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let mut found = Vec::new();
        for row in self.tenant_rows(tenant_id)? {
            let row = lock(&row)?;
            found.extend(row.movements.iter().filter(|m| filter(m)).cloned());
        }
        found.sort_by_key(|m| (m.created_at, m.id));
        Ok(found)
    }

    /// Overwrite a stored quantity without a movement, as legacy writes used to.
    #[cfg(test)]
    pub(crate) fn force_quantity(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        quantity: i64,
    ) -> Result<(), StoreError> {
        let row = self.existing_row(tenant_id, part_id)?;
        lock(&row)?.part.restore_from_ledger(quantity, Utc::now());
        Ok(())
    }
}

fn lock(row: &Arc<Mutex<PartRow>>) -> Result<MutexGuard<'_, PartRow>, StoreError> {
    row.lock().map_err(|_| poisoned())
}

impl PartRepository for InMemoryLedgerStore {
    fn insert_part(&self, part: &Part) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write().map_err(|_| poisoned())?;
        let tenant_id = part.tenant_id();
        let number_key = (tenant_id, part.part_number().to_string());
        if catalog.by_number.contains_key(&number_key) {
            return Err(StoreError::Duplicate(format!(
                "part number {}",
                part.part_number()
            )));
        }
        let key = PartKey {
            tenant_id,
            part_id: part.id_typed(),
        };
        if catalog.rows.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("part {}", part.id_typed())));
        }

        catalog.by_number.insert(number_key, part.id_typed());
        catalog.rows.insert(
            key,
            Arc::new(Mutex::new(PartRow {
                part: part.clone(),
                movements: Vec::new(),
            })),
        );
        Ok(())
    }

    fn get_part(&self, tenant_id: TenantId, part_id: PartId) -> Result<Option<Part>, StoreError> {
        match self.row(tenant_id, part_id)? {
            Some(row) => Ok(Some(lock(&row)?.part.clone())),
            None => Ok(None),
        }
    }

    fn part_exists(&self, tenant_id: TenantId, part_id: PartId) -> Result<bool, StoreError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.rows.contains_key(&PartKey { tenant_id, part_id }))
    }

    fn find_part_by_number(
        &self,
        tenant_id: TenantId,
        part_number: &str,
    ) -> Result<Option<Part>, StoreError> {
        let part_id = {
            let catalog = self.catalog.read().map_err(|_| poisoned())?;
            catalog
                .by_number
                .get(&(tenant_id, part_number.to_string()))
                .copied()
        };
        match part_id {
            Some(part_id) => self.get_part(tenant_id, part_id),
            None => Ok(None),
        }
    }

    fn list_parts(&self, tenant_id: TenantId) -> Result<Vec<Part>, StoreError> {
        let mut parts = Vec::new();
        for row in self.tenant_rows(tenant_id)? {
            parts.push(lock(&row)?.part.clone());
        }
        parts.sort_by(|a, b| a.part_number().cmp(b.part_number()));
        Ok(parts)
    }

    fn update_part_details(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        details: &PartDetails,
        now: DateTime<Utc>,
    ) -> Result<Part, StoreError> {
        let row = self.existing_row(tenant_id, part_id)?;
        let mut row = lock(&row)?;
        let mut next = row.part.clone();
        next.update_details(details, now)?;
        row.part = next.clone();
        Ok(next)
    }
}

impl StockMovementRepository for InMemoryLedgerStore {
    fn list_movements(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let row = self.existing_row(tenant_id, part_id)?;
        let row = lock(&row)?;
        Ok(row.movements.clone())
    }

    fn movements_for_job(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.scan_movements(tenant_id, |m| m.job_id == Some(job_id))
    }

    fn movements_for_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.scan_movements(tenant_id, |m| {
            m.purchase_order_id == Some(purchase_order_id)
        })
    }

    fn find_job_part_movement(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        job_part_id: JobPartId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let row = self.existing_row(tenant_id, part_id)?;
        let row = lock(&row)?;
        Ok(row
            .movements
            .iter()
            .find(|m| {
                m.movement_type == MovementType::JobUsage && m.job_part_id == Some(job_part_id)
            })
            .cloned())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn commit_movement(&self, movement: &StockMovement) -> Result<Part, StoreError> {
        if !movement.is_consistent() {
            return Err(StoreError::Conflict(format!(
                "movement {} does not add up",
                movement.id
            )));
        }

        let row = self.existing_row(movement.tenant_id, movement.part_id)?;
        let mut row = lock(&row)?;

        if row.part.quantity() != movement.quantity_before {
            return Err(StoreError::Concurrency(format!(
                "part {} is at {}, movement expected {}",
                movement.part_id,
                row.part.quantity(),
                movement.quantity_before
            )));
        }

        if let (MovementType::JobUsage, Some(job_part_id)) =
            (movement.movement_type, movement.job_part_id)
        {
            if row.movements.iter().any(|m| {
                m.movement_type == MovementType::JobUsage && m.job_part_id == Some(job_part_id)
            }) {
                return Err(StoreError::Duplicate(format!(
                    "job_usage movement for job part {job_part_id}"
                )));
            }
        }

        // Movement and quantity change land under the same row lock.
        row.part.apply_movement(movement)?;
        row.movements.push(movement.clone());
        Ok(row.part.clone())
    }

    fn recompute_quantity(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        now: DateTime<Utc>,
    ) -> Result<QuantityRepair, StoreError> {
        let row = self.existing_row(tenant_id, part_id)?;
        let mut row = lock(&row)?;

        let previous_quantity = row.part.quantity();
        let replayed = replay_quantity(&row.movements);
        if replayed != previous_quantity {
            row.part.restore_from_ledger(replayed, now);
        }

        Ok(QuantityRepair {
            part: row.part.clone(),
            previous_quantity,
            movement_count: row.movements.len(),
        })
    }
}

/// In-memory job allocation repository.
#[derive(Debug, Default)]
pub struct InMemoryJobPartRepository {
    rows: InMemoryTenantStore<JobPartId, JobPart>,
}

impl InMemoryJobPartRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobPartRepository for InMemoryJobPartRepository {
    fn insert_job_part(&self, job_part: &JobPart) -> Result<(), StoreError> {
        self.rows
            .insert_unique(job_part.tenant_id, job_part.clone(), |_| false)
    }

    fn get_job_part(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<Option<JobPart>, StoreError> {
        self.rows.get(tenant_id, &job_part_id)
    }

    fn list_for_job(&self, tenant_id: TenantId, job_id: JobId) -> Result<Vec<JobPart>, StoreError> {
        self.rows.list(tenant_id, |jp| jp.job_id == job_id)
    }

    fn list_for_part(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<JobPart>, StoreError> {
        self.rows.list(tenant_id, |jp| jp.part_id == part_id)
    }

    fn begin_deduction(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
        now: DateTime<Utc>,
    ) -> Result<JobPart, StoreError> {
        self.rows.update(tenant_id, &job_part_id, &mut |jp| {
            jp.begin_deduction(now);
            Ok(())
        })
    }

    fn abandon_deduction(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<JobPart, StoreError> {
        self.rows.update(tenant_id, &job_part_id, &mut |jp| {
            jp.abandon_deduction();
            Ok(())
        })
    }

    fn mark_deducted(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut flipped = false;
        self.rows.update(tenant_id, &job_part_id, &mut |jp| {
            if !jp.is_deducted {
                jp.mark_deducted(now)?;
                flipped = true;
            }
            Ok(())
        })?;
        Ok(flipped)
    }

    fn remove_pending(
        &self,
        tenant_id: TenantId,
        job_part_id: JobPartId,
    ) -> Result<JobPart, StoreError> {
        self.rows.remove_if(tenant_id, &job_part_id, |jp| {
            jp.ensure_releasable()
                .map_err(|e| StoreError::Conflict(e.to_string()))
        })
    }
}

/// In-memory purchase order repository (orders + lines).
///
/// `lifecycle` serializes the operations that read lines to decide on the
/// order status, or the status to decide on a line.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseOrderRepository {
    orders: InMemoryTenantStore<PurchaseOrderId, PurchaseOrder>,
    items: InMemoryTenantStore<PoItemId, PoItem>,
    lifecycle: Mutex<()>,
}

impl InMemoryPurchaseOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrder, StoreError> {
        self.orders
            .get(tenant_id, &purchase_order_id)?
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {purchase_order_id}")))
    }
}

impl PurchaseOrderRepository for InMemoryPurchaseOrderRepository {
    fn insert_order(&self, order: &PurchaseOrder, items: &[PoItem]) -> Result<(), StoreError> {
        if items.iter().any(|i| {
            i.purchase_order_id() != order.id_typed() || i.tenant_id() != order.tenant_id()
        }) {
            return Err(StoreError::Conflict(
                "items do not belong to the purchase order".to_string(),
            ));
        }

        let po_number = order.po_number().to_string();
        self.orders
            .insert_unique(order.tenant_id(), order.clone(), |existing| {
                existing.po_number() == po_number
            })?;
        for item in items {
            self.items
                .insert_unique(item.tenant_id(), item.clone(), |_| false)?;
        }
        Ok(())
    }

    fn get_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.orders.get(tenant_id, &purchase_order_id)
    }

    fn update_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        apply: &mut dyn FnMut(&mut PurchaseOrder) -> DomainResult<()>,
    ) -> Result<PurchaseOrder, StoreError> {
        self.orders.update(tenant_id, &purchase_order_id, apply)
    }

    fn cancel_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOrder, StoreError> {
        let _lifecycle = self.lifecycle.lock().map_err(|_| poisoned())?;
        let items = self.list_items(tenant_id, purchase_order_id)?;
        self.orders
            .update(tenant_id, &purchase_order_id, &mut |o| o.cancel(&items, now))
    }

    fn refresh_status(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOrder, StoreError> {
        let _lifecycle = self.lifecycle.lock().map_err(|_| poisoned())?;
        let items = self.list_items(tenant_id, purchase_order_id)?;
        self.orders.update(tenant_id, &purchase_order_id, &mut |o| {
            o.refresh_status(&items, now);
            Ok(())
        })
    }

    fn list_items(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<PoItem>, StoreError> {
        let mut items = self
            .items
            .list(tenant_id, |i| i.purchase_order_id() == purchase_order_id)?;
        items.sort_by_key(|i| i.line_no());
        Ok(items)
    }

    fn get_item(
        &self,
        tenant_id: TenantId,
        po_item_id: PoItemId,
    ) -> Result<Option<PoItem>, StoreError> {
        self.items.get(tenant_id, &po_item_id)
    }

    fn record_receipt(
        &self,
        tenant_id: TenantId,
        po_item_id: PoItemId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<PoItem, StoreError> {
        let _lifecycle = self.lifecycle.lock().map_err(|_| poisoned())?;
        let item = self
            .items
            .get(tenant_id, &po_item_id)?
            .ok_or_else(|| StoreError::NotFound(format!("po item {po_item_id}")))?;
        self.existing_order(tenant_id, item.purchase_order_id())?
            .ensure_receivable()?;
        self.items
            .update(tenant_id, &po_item_id, &mut |i| i.record_receipt(quantity, now))
    }

    fn update_item(
        &self,
        tenant_id: TenantId,
        po_item_id: PoItemId,
        apply: &mut dyn FnMut(&mut PoItem) -> DomainResult<()>,
    ) -> Result<PoItem, StoreError> {
        self.items.update(tenant_id, &po_item_id, apply)
    }
}

/// In-memory serialized unit repository.
#[derive(Debug, Default)]
pub struct InMemorySerializedItemRepository {
    rows: InMemoryTenantStore<SerializedItemId, SerializedItem>,
}

impl InMemorySerializedItemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SerializedItemRepository for InMemorySerializedItemRepository {
    fn insert_serial(&self, item: &SerializedItem) -> Result<(), StoreError> {
        let part_id = item.part_id;
        let serial = item.serial_number.clone();
        self.rows
            .insert_unique(item.tenant_id, item.clone(), |existing| {
                existing.part_id == part_id && existing.serial_number == serial
            })
            .map_err(|e| match e {
                StoreError::Duplicate(_) => StoreError::Duplicate(format!(
                    "serial number {} for part {}",
                    item.serial_number, item.part_id
                )),
                other => other,
            })
    }

    fn get_serial(
        &self,
        tenant_id: TenantId,
        item_id: SerializedItemId,
    ) -> Result<Option<SerializedItem>, StoreError> {
        self.rows.get(tenant_id, &item_id)
    }

    fn find_serial(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        serial_number: &str,
    ) -> Result<Option<SerializedItem>, StoreError> {
        Ok(self
            .rows
            .list(tenant_id, |i| {
                i.part_id == part_id && i.serial_number == serial_number
            })?
            .into_iter()
            .next())
    }

    fn list_serials(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
    ) -> Result<Vec<SerializedItem>, StoreError> {
        let mut items = self.rows.list(tenant_id, |i| i.part_id == part_id)?;
        items.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(items)
    }

    fn update_serial(
        &self,
        tenant_id: TenantId,
        item_id: SerializedItemId,
        apply: &mut dyn FnMut(&mut SerializedItem) -> DomainResult<()>,
    ) -> Result<SerializedItem, StoreError> {
        self.rows.update(tenant_id, &item_id, apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use stockledger_core::{TenantContext, UserId};
    use stockledger_inventory::{MovementContext, NewPart};

    fn test_ctx() -> TenantContext {
        TenantContext::new(TenantId::new(), UserId::new()).unwrap()
    }

    fn seeded(store: &InMemoryLedgerStore, ctx: &TenantContext, number: &str) -> Part {
        let part = Part::register(
            ctx.tenant_id(),
            &NewPart {
                name: format!("part {number}"),
                part_number: number.to_string(),
                min_quantity: 0,
                retail_price: 100,
                opening_quantity: 0,
            },
            Utc::now(),
        )
        .unwrap();
        store.insert_part(&part).unwrap();
        part
    }

    fn plan(ctx: &TenantContext, part: &Part, change: i64) -> StockMovement {
        StockMovement::plan(
            ctx,
            part,
            MovementType::Purchase,
            change,
            MovementContext::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn commit_rejects_stale_quantity_before() {
        let store = InMemoryLedgerStore::new();
        let ctx = test_ctx();
        let part = seeded(&store, &ctx, "A-1");

        let first = plan(&ctx, &part, 5);
        let stale = plan(&ctx, &part, 3);
        store.commit_movement(&first).unwrap();

        let err = store.commit_movement(&stale).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let stored = store.get_part(ctx.tenant_id(), part.id_typed()).unwrap().unwrap();
        assert_eq!(stored.quantity(), 5);
        assert_eq!(
            store.list_movements(ctx.tenant_id(), part.id_typed()).unwrap().len(),
            1
        );
    }

    #[test]
    fn part_numbers_are_unique_per_tenant() {
        let store = InMemoryLedgerStore::new();
        let ctx = test_ctx();
        seeded(&store, &ctx, "A-1");

        let dup = Part::register(
            ctx.tenant_id(),
            &NewPart {
                name: "other".to_string(),
                part_number: "A-1".to_string(),
                min_quantity: 0,
                retail_price: 0,
                opening_quantity: 0,
            },
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(store.insert_part(&dup), Err(StoreError::Duplicate(_))));

        let other_tenant = test_ctx();
        seeded(&store, &other_tenant, "A-1");
    }

    #[test]
    fn parts_are_invisible_to_other_tenants() {
        let store = InMemoryLedgerStore::new();
        let owner = test_ctx();
        let part = seeded(&store, &owner, "A-1");
        let other = test_ctx();

        assert!(store.get_part(other.tenant_id(), part.id_typed()).unwrap().is_none());
        assert!(store.list_parts(other.tenant_id()).unwrap().is_empty());
        assert!(matches!(
            store.list_movements(other.tenant_id(), part.id_typed()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn recompute_replays_movements() {
        let store = InMemoryLedgerStore::new();
        let ctx = test_ctx();
        let part = seeded(&store, &ctx, "A-1");
        let after = store.commit_movement(&plan(&ctx, &part, 8)).unwrap();
        store.commit_movement(&plan(&ctx, &after, 4)).unwrap();

        store.force_quantity(ctx.tenant_id(), part.id_typed(), 40).unwrap();

        let repair = store
            .recompute_quantity(ctx.tenant_id(), part.id_typed(), Utc::now())
            .unwrap();
        assert_eq!(repair.previous_quantity, 40);
        assert_eq!(repair.part.quantity(), 12);
        assert_eq!(repair.movement_count, 2);
    }

    #[test]
    fn concurrent_commits_serialize_per_part() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ctx = test_ctx();
        let part = seeded(&store, &ctx, "A-1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let part_id = part.id_typed();
                thread::spawn(move || {
                    let mut committed = 0;
                    while committed < 25 {
                        let current = store.get_part(ctx.tenant_id(), part_id).unwrap().unwrap();
                        let m = plan(&ctx, &current, 1);
                        match store.commit_movement(&m) {
                            Ok(_) => committed += 1,
                            Err(StoreError::Concurrency(_)) => continue,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stored = store.get_part(ctx.tenant_id(), part.id_typed()).unwrap().unwrap();
        let movements = store.list_movements(ctx.tenant_id(), part.id_typed()).unwrap();
        assert_eq!(stored.quantity(), 200);
        assert_eq!(movements.len(), 200);
        assert_eq!(replay_quantity(&movements), 200);
        assert!(movements.windows(2).all(|w| w[0].quantity_after == w[1].quantity_before));
    }

    #[test]
    fn mark_deducted_flips_once() {
        let repo = InMemoryJobPartRepository::new();
        let jp = JobPart::allocate(TenantId::new(), JobId::new(), PartId::new(), 2, 10, Utc::now())
            .unwrap();
        repo.insert_job_part(&jp).unwrap();

        assert!(repo.mark_deducted(jp.tenant_id, jp.id, Utc::now()).unwrap());
        assert!(!repo.mark_deducted(jp.tenant_id, jp.id, Utc::now()).unwrap());
        assert!(matches!(
            repo.remove_pending(jp.tenant_id, jp.id),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn part_exists_does_not_wait_on_the_row_lock() {
        use std::sync::mpsc;
        use std::time::Duration;

        let store = Arc::new(InMemoryLedgerStore::new());
        let ctx = test_ctx();
        let part = seeded(&store, &ctx, "A-1");

        let row = store.existing_row(ctx.tenant_id(), part.id_typed()).unwrap();
        let _held = lock(&row).unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = store.clone();
        let part_id = part.id_typed();
        thread::spawn(move || {
            let _ = tx.send(reader.part_exists(ctx.tenant_id(), part_id));
        });
        let exists = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(exists);
        assert!(!store.part_exists(ctx.tenant_id(), PartId::new()).unwrap());
    }

    #[test]
    fn claimed_allocations_cannot_be_released() {
        let repo = InMemoryJobPartRepository::new();
        let jp = JobPart::allocate(TenantId::new(), JobId::new(), PartId::new(), 2, 10, Utc::now())
            .unwrap();
        repo.insert_job_part(&jp).unwrap();

        let claimed = repo.begin_deduction(jp.tenant_id, jp.id, Utc::now()).unwrap();
        assert!(claimed.deduction_started_at.is_some());
        assert!(matches!(
            repo.remove_pending(jp.tenant_id, jp.id),
            Err(StoreError::Conflict(_))
        ));

        repo.abandon_deduction(jp.tenant_id, jp.id).unwrap();
        repo.remove_pending(jp.tenant_id, jp.id).unwrap();
        assert!(matches!(
            repo.begin_deduction(jp.tenant_id, jp.id, Utc::now()),
            Err(StoreError::NotFound(_))
        ));
    }

    fn placed_order(repo: &InMemoryPurchaseOrderRepository) -> (PurchaseOrder, Vec<PoItem>) {
        use stockledger_purchasing::{NewPoItem, NewPurchaseOrder};

        let (mut order, items) = PurchaseOrder::create(
            TenantId::new(),
            &NewPurchaseOrder {
                po_number: "PO-7".to_string(),
                supplier: "Acme Parts".to_string(),
                items: vec![NewPoItem {
                    part_id: None,
                    description: "Brake pads".to_string(),
                    quantity_ordered: 4,
                    unit_cost: 900,
                }],
            },
            Utc::now(),
        )
        .unwrap();
        order.place(Utc::now()).unwrap();
        repo.insert_order(&order, &items).unwrap();
        (order, items)
    }

    #[test]
    fn receipts_and_cancel_exclude_each_other() {
        let repo = InMemoryPurchaseOrderRepository::new();
        let (order, items) = placed_order(&repo);
        let (tenant_id, item_id) = (order.tenant_id(), items[0].id_typed());

        repo.record_receipt(tenant_id, item_id, 1, Utc::now()).unwrap();
        assert!(matches!(
            repo.cancel_order(tenant_id, order.id_typed(), Utc::now()),
            Err(StoreError::Domain(_))
        ));

        repo.update_item(tenant_id, item_id, &mut |i| i.revert_receipt(1))
            .unwrap();
        let cancelled = repo
            .cancel_order(tenant_id, order.id_typed(), Utc::now())
            .unwrap();
        assert_eq!(cancelled.status(), stockledger_purchasing::PurchaseOrderStatus::Cancelled);
        assert!(matches!(
            repo.record_receipt(tenant_id, item_id, 1, Utc::now()),
            Err(StoreError::Domain(_))
        ));
        assert_eq!(repo.get_item(tenant_id, item_id).unwrap().unwrap().quantity_received(), 0);
    }

    #[test]
    fn serial_numbers_are_unique_per_part() {
        use stockledger_inventory::AcquisitionMetadata;

        let repo = InMemorySerializedItemRepository::new();
        let tenant_id = TenantId::new();
        let part_id = PartId::new();
        let unit = |serial: &str, part_id: PartId| {
            SerializedItem::intake(
                tenant_id,
                part_id,
                serial,
                AcquisitionMetadata::default(),
                Utc::now(),
            )
            .unwrap()
        };

        repo.insert_serial(&unit("SN-1", part_id)).unwrap();
        assert!(matches!(
            repo.insert_serial(&unit("SN-1", part_id)),
            Err(StoreError::Duplicate(_))
        ));
        repo.insert_serial(&unit("SN-1", PartId::new())).unwrap();
        assert!(repo.find_serial(tenant_id, part_id, "SN-1").unwrap().is_some());
    }
}
