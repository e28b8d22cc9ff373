use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::schema::FieldDefinition;

/// One calendar date's quota row. `None` means no quota is set.
pub type SharedQuotaSlot = Arc<RwLock<Option<Quota>>>;
pub type SharedReservation = Arc<RwLock<Reservation>>;

/// The in-process document store behind the engine.
///
/// Quota slots are created on first touch and never removed from the map:
/// a write lock on the slot is the compare-and-set for that date, and a
/// caller holding an old `Arc` must never end up writing to a detached slot.
pub struct InMemoryStore {
    quotas: DashMap<NaiveDate, SharedQuotaSlot>,
    quota_ids: DashMap<Ulid, NaiveDate>,
    reservations: DashMap<Ulid, SharedReservation>,
    employee_reservations: DashMap<String, Vec<Ulid>>,
    documents: DashMap<String, DashMap<String, Document>>,
    schemas: DashMap<String, Arc<Vec<FieldDefinition>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            quotas: DashMap::new(),
            quota_ids: DashMap::new(),
            reservations: DashMap::new(),
            employee_reservations: DashMap::new(),
            documents: DashMap::new(),
            schemas: DashMap::new(),
        }
    }

    // ── Quotas ───────────────────────────────────────────────

    /// The slot for `date`, created empty if this is the first touch.
    pub fn quota_slot(&self, date: NaiveDate) -> SharedQuotaSlot {
        self.quotas
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .value()
            .clone()
    }

    pub fn existing_quota_slot(&self, date: &NaiveDate) -> Option<SharedQuotaSlot> {
        self.quotas.get(date).map(|e| e.value().clone())
    }

    pub fn quota_date_for_id(&self, id: &Ulid) -> Option<NaiveDate> {
        self.quota_ids.get(id).map(|e| *e.value())
    }

    /// Slots for every touched date, filtered to `range` when given, ascending.
    pub fn quota_slots(&self, range: Option<&DayRange>) -> Vec<(NaiveDate, SharedQuotaSlot)> {
        let mut slots: Vec<_> = self
            .quotas
            .iter()
            .filter(|e| range.is_none_or(|r| r.contains(*e.key())))
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        slots.sort_by_key(|(date, _)| *date);
        slots
    }

    pub fn quota_count(&self) -> usize {
        self.quota_ids.len()
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation(&self, id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn all_reservations(&self) -> Vec<SharedReservation> {
        self.reservations.iter().map(|e| e.value().clone()).collect()
    }

    pub fn reservations_for_employee(&self, employee_id: &str) -> Vec<SharedReservation> {
        let ids = self
            .employee_reservations
            .get(employee_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.reservation(id)).collect()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn insert_reservation(&self, reservation: Reservation) {
        let id = reservation.id;
        let employee_id = reservation.employee.id().to_string();
        self.reservations.insert(id, Arc::new(RwLock::new(reservation)));
        let mut ids = self.employee_reservations.entry(employee_id).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    // ── Form documents & schemas ─────────────────────────────

    pub fn document(&self, form: &str, id: &str) -> Option<Document> {
        self.documents
            .get(form)
            .and_then(|docs| docs.get(id).map(|d| d.value().clone()))
    }

    pub fn documents(&self, form: &str, ids: &[String]) -> Vec<Document> {
        let Some(docs) = self.documents.get(form) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| docs.get(id).map(|d| d.value().clone()))
            .collect()
    }

    pub fn all_documents(&self) -> Vec<Document> {
        self.documents
            .iter()
            .flat_map(|form| {
                form.value()
                    .iter()
                    .map(|d| d.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn schema(&self, form: &str) -> Option<Arc<Vec<FieldDefinition>>> {
        self.schemas.get(form).map(|e| e.value().clone())
    }

    pub fn all_schemas(&self) -> Vec<(String, Arc<Vec<FieldDefinition>>)> {
        self.schemas
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a quota event to its slot. The caller holds the slot's write lock.
    pub fn apply_quota(&self, slot: &mut Option<Quota>, event: &Event) {
        match event {
            Event::QuotaCreated { quota } | Event::QuotaUpdated { quota } | Event::ManagerReported { quota } => {
                if let Some(old) = slot.as_ref()
                    && old.id != quota.id
                {
                    self.quota_ids.remove(&old.id);
                }
                self.quota_ids.insert(quota.id, quota.date);
                *slot = Some(quota.clone());
            }
            Event::QuotaDeleted { id, .. } => {
                self.quota_ids.remove(id);
                *slot = None;
            }
            _ => {}
        }
    }

    /// Apply an attendance mark. The caller holds the reservation's write lock.
    pub fn apply_reservation(&self, reservation: &mut Reservation, event: &Event) {
        if let Event::AttendanceMarked { date, attended, .. } = event {
            reservation.attendance.insert(*date, *attended);
        }
    }

    /// Apply events that touch no per-record lock.
    pub fn apply_unlocked(&self, event: &Event) {
        match event {
            Event::ReservationRecorded { reservation } => self.insert_reservation(reservation.clone()),
            Event::DocumentUpserted { document } => {
                self.documents
                    .entry(document.form.clone())
                    .or_default()
                    .insert(document.id.clone(), document.clone());
            }
            Event::DocumentDeleted { form, id } => {
                if let Some(docs) = self.documents.get(form) {
                    docs.remove(id);
                }
            }
            Event::SchemaRegistered { form, fields } => {
                self.schemas.insert(form.clone(), Arc::new(fields.clone()));
            }
            _ => {}
        }
    }

    /// Replay path: we are the sole owner of every lock, so `try_write` always
    /// succeeds. Never block here; replay may run inside the async runtime.
    pub fn replay(&self, event: &Event) {
        match event {
            Event::QuotaCreated { quota } | Event::QuotaUpdated { quota } | Event::ManagerReported { quota } => {
                let slot = self.quota_slot(quota.date);
                if let Ok(mut guard) = slot.try_write() {
                    self.apply_quota(&mut guard, event);
                }
            }
            Event::QuotaDeleted { date, .. } => {
                if let Some(slot) = self.existing_quota_slot(date)
                    && let Ok(mut guard) = slot.try_write()
                {
                    self.apply_quota(&mut guard, event);
                }
            }
            Event::AttendanceMarked { reservation_id, .. } => {
                if let Some(res) = self.reservation(reservation_id)
                    && let Ok(mut guard) = res.try_write()
                {
                    self.apply_reservation(&mut guard, event);
                }
            }
            other => self.apply_unlocked(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn quota(d: u32) -> Quota {
        let now = Utc::now();
        Quota {
            id: Ulid::new(),
            date: day(d),
            quota: 4,
            notes: None,
            created_by: None,
            manager_reported: false,
            manager_reported_at: None,
            manager_reported_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn quota_slot_is_shared_per_date() {
        let store = InMemoryStore::new();
        let a = store.quota_slot(day(1));
        let b = store.quota_slot(day(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn replay_quota_lifecycle() {
        let store = InMemoryStore::new();
        let q = quota(2);
        store.replay(&Event::QuotaCreated { quota: q.clone() });
        assert_eq!(store.quota_date_for_id(&q.id), Some(day(2)));
        assert_eq!(store.quota_count(), 1);

        store.replay(&Event::QuotaDeleted { id: q.id, date: q.date });
        assert_eq!(store.quota_date_for_id(&q.id), None);
        let slot = store.existing_quota_slot(&day(2)).unwrap();
        assert!(slot.try_read().unwrap().is_none());
    }

    #[test]
    fn slots_listed_in_date_order() {
        let store = InMemoryStore::new();
        for d in [5, 1, 3] {
            store.replay(&Event::QuotaCreated { quota: quota(d) });
        }
        let range = DayRange::new(day(2), day(5)).unwrap();
        let dates: Vec<_> = store.quota_slots(Some(&range)).into_iter().map(|(d, _)| d).collect();
        assert_eq!(dates, vec![day(3), day(5)]);
    }

    #[test]
    fn reservations_indexed_by_employee() {
        let store = InMemoryStore::new();
        let reservation = Reservation {
            id: Ulid::new(),
            employee: Reference::Unresolved { id: "e7".into() },
            start_date: day(1),
            end_date: None,
            attendance: BTreeMap::new(),
            unit: None,
            order_number: None,
            funding_source: None,
            created_at: Utc::now(),
        };
        store.replay(&Event::ReservationRecorded { reservation: reservation.clone() });
        store.replay(&Event::AttendanceMarked {
            reservation_id: reservation.id,
            date: day(1),
            attended: true,
        });
        let found = store.reservations_for_employee("e7");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].try_read().unwrap().attendance.get(&day(1)), Some(&true));
        assert!(store.reservations_for_employee("nobody").is_empty());
    }

    #[test]
    fn document_upsert_and_delete() {
        let store = InMemoryStore::new();
        let doc = Document {
            form: "employees".into(),
            id: "e1".into(),
            fields: BTreeMap::from([("fullName".to_string(), Scalar::Text("Dana".into()))]),
        };
        store.replay(&Event::DocumentUpserted { document: doc.clone() });
        assert_eq!(store.document("employees", "e1"), Some(doc));
        assert_eq!(store.documents("employees", &["e1".into(), "e2".into()]).len(), 1);
        store.replay(&Event::DocumentDeleted {
            form: "employees".into(),
            id: "e1".into(),
        });
        assert!(store.document("employees", "e1").is_none());
    }
}
