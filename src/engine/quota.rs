use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::QUOTA_WRITES_TOTAL;

use super::validate::*;
use super::{BulkSummary, Engine, EngineError, SharedQuotaSlot};

/// Result of a range upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeWrite {
    pub created: usize,
    pub updated: usize,
    pub quotas: Vec<Quota>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeDelete {
    pub deleted: usize,
    pub dates: Vec<NaiveDate>,
}

pub(super) fn fresh_quota(
    date: NaiveDate,
    quota: u32,
    notes: Option<String>,
    created_by: Option<String>,
) -> Quota {
    let now = now();
    Quota {
        id: Ulid::new(),
        date,
        quota,
        notes,
        created_by,
        manager_reported: false,
        manager_reported_at: None,
        manager_reported_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn patched(current: &Quota, patch: &QuotaPatch) -> Quota {
    Quota {
        quota: patch.quota.unwrap_or(current.quota),
        notes: match &patch.notes {
            Some(notes) => notes.clone(),
            None => current.notes.clone(),
        },
        updated_at: now(),
        ..current.clone()
    }
}

/// The quota in a locked slot, if it is the one `key` addresses. An id key
/// must still match: the row may have been deleted and recreated meanwhile.
fn held_quota(slot: &Option<Quota>, key: QuotaKey) -> Result<&Quota, EngineError> {
    match (slot, key) {
        (Some(q), QuotaKey::Id(id)) if q.id == id => Ok(q),
        (Some(q), QuotaKey::Date(_)) => Ok(q),
        _ => Err(EngineError::not_found("quota", key)),
    }
}

fn page_bounds(page: Option<usize>, limit: Option<usize>) -> Result<(usize, usize), EngineError> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if page == 0 {
        return Err(EngineError::Validation("page is 1-based".into()));
    }
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(EngineError::Validation(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    Ok((page, limit))
}

impl Engine {
    fn slot_for_key(&self, key: QuotaKey) -> Result<SharedQuotaSlot, EngineError> {
        let date = match key {
            QuotaKey::Id(id) => self
                .store
                .quota_date_for_id(&id)
                .ok_or_else(|| EngineError::not_found("quota", key))?,
            QuotaKey::Date(date) => date,
        };
        self.store
            .existing_quota_slot(&date)
            .ok_or_else(|| EngineError::not_found("quota", key))
    }

    /// Current quota row for `date`, if any.
    pub(super) async fn read_quota(&self, date: NaiveDate) -> Result<Option<Quota>, EngineError> {
        let Some(slot) = self.store.existing_quota_slot(&date) else {
            return Ok(None);
        };
        let guard = self.bounded("quota read", slot.read()).await?;
        Ok(guard.as_ref().cloned())
    }

    /// Every quota row in `range`, ascending by date.
    pub(super) async fn read_quotas(&self, range: &DayRange) -> Result<Vec<Quota>, EngineError> {
        let mut out = Vec::new();
        for (_, slot) in self.store.quota_slots(Some(range)) {
            let guard = self.bounded("quota read", slot.read()).await?;
            if let Some(q) = guard.as_ref() {
                out.push(q.clone());
            }
        }
        Ok(out)
    }

    pub async fn get_quota(&self, key: QuotaKey) -> Result<Quota, EngineError> {
        let slot = self.slot_for_key(key)?;
        let guard = self.bounded("quota read", slot.read()).await?;
        held_quota(&guard, key).cloned()
    }

    pub async fn list_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Quota>, EngineError> {
        let range = validate_range(start, end)?;
        self.read_quotas(&range).await
    }

    /// Paginated listing, optionally bounded on either side.
    pub async fn list_quotas(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Page<Quota>, EngineError> {
        let (page, limit) = page_bounds(page, limit)?;
        let range = DayRange::new(start.unwrap_or(NaiveDate::MIN), end.unwrap_or(NaiveDate::MAX))
            .ok_or_else(|| EngineError::Validation("endDate precedes startDate".into()))?;
        let all = self.read_quotas(&range).await?;
        Ok(Page::slice(all, page, limit))
    }

    /// Insert-if-absent. An existing row for the date is a conflict, never an update.
    pub async fn create_quota(&self, new: NewQuota) -> Result<Quota, EngineError> {
        validate_quota(new.quota)?;
        validate_notes(new.notes.as_deref())?;
        validate_name("createdBy too long", new.created_by.as_deref())?;

        let slot = self.store.quota_slot(new.date);
        let _gate = self.mutation_gate().await?;
        let mut guard = self.bounded("quota lock", slot.write()).await?;
        if guard.is_some() {
            return Err(EngineError::QuotaExists(new.date));
        }

        let quota = fresh_quota(new.date, new.quota, new.notes, new.created_by);
        let event = Event::QuotaCreated { quota: quota.clone() };
        self.persist(&event).await?;
        self.store.apply_quota(&mut guard, &event);

        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "create").increment(1);
        tracing::info!(date = %quota.date, quota = quota.quota, "quota created");
        Ok(quota)
    }

    /// Upsert one row per date. Existing rows get quota, notes and createdBy
    /// overwritten; their manager-report stamp is kept.
    pub async fn create_quota_range(&self, req: NewQuotaRange) -> Result<RangeWrite, EngineError> {
        let range = validate_range(req.start_date, req.end_date.unwrap_or(req.start_date))?;
        validate_quota(req.quota)?;
        validate_notes(req.notes.as_deref())?;
        validate_name("createdBy too long", req.created_by.as_deref())?;

        let mut summary = RangeWrite {
            created: 0,
            updated: 0,
            quotas: Vec::with_capacity(range.days().len()),
        };
        for date in range.days() {
            let slot = self.store.quota_slot(date);
            let _gate = self.mutation_gate().await?;
            let mut guard = self.bounded("quota lock", slot.write()).await?;
            let event = match guard.as_ref() {
                Some(existing) => {
                    summary.updated += 1;
                    Event::QuotaUpdated {
                        quota: Quota {
                            quota: req.quota,
                            notes: req.notes.clone(),
                            created_by: req.created_by.clone(),
                            updated_at: now(),
                            ..existing.clone()
                        },
                    }
                }
                None => {
                    summary.created += 1;
                    Event::QuotaCreated {
                        quota: fresh_quota(date, req.quota, req.notes.clone(), req.created_by.clone()),
                    }
                }
            };
            self.persist(&event).await?;
            self.store.apply_quota(&mut guard, &event);
            if let Some(q) = guard.as_ref() {
                summary.quotas.push(q.clone());
            }
        }

        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "upsert").increment(range.len_days());
        tracing::info!(
            %range,
            created = summary.created,
            updated = summary.updated,
            "quota range written"
        );
        Ok(summary)
    }

    pub async fn update_quota(&self, key: QuotaKey, patch: QuotaPatch) -> Result<Quota, EngineError> {
        validate_patch(&patch)?;
        let slot = self.slot_for_key(key)?;
        let _gate = self.mutation_gate().await?;
        let mut guard = self.bounded("quota lock", slot.write()).await?;
        let updated = patched(held_quota(&guard, key)?, &patch);

        let event = Event::QuotaUpdated { quota: updated.clone() };
        self.persist(&event).await?;
        self.store.apply_quota(&mut guard, &event);

        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "update").increment(1);
        tracing::info!(date = %updated.date, quota = updated.quota, "quota updated");
        Ok(updated)
    }

    /// Patch every existing row in the range. Dates without a row are skipped;
    /// a range with no rows at all is `NotFound`.
    pub async fn update_quota_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        patch: QuotaPatch,
    ) -> Result<Vec<Quota>, EngineError> {
        let range = validate_range(start, end)?;
        validate_patch(&patch)?;

        let mut updated = Vec::new();
        for (_, slot) in self.store.quota_slots(Some(&range)) {
            let _gate = self.mutation_gate().await?;
            let mut guard = self.bounded("quota lock", slot.write()).await?;
            let Some(current) = guard.as_ref() else { continue };
            let event = Event::QuotaUpdated {
                quota: patched(current, &patch),
            };
            self.persist(&event).await?;
            self.store.apply_quota(&mut guard, &event);
            if let Some(q) = guard.as_ref() {
                updated.push(q.clone());
            }
        }
        if updated.is_empty() {
            return Err(EngineError::not_found("quota in range", range));
        }
        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "update").increment(updated.len() as u64);
        Ok(updated)
    }

    pub async fn delete_quota(&self, key: QuotaKey) -> Result<Quota, EngineError> {
        let slot = self.slot_for_key(key)?;
        let _gate = self.mutation_gate().await?;
        let mut guard = self.bounded("quota lock", slot.write()).await?;
        let removed = held_quota(&guard, key)?.clone();

        let event = Event::QuotaDeleted {
            id: removed.id,
            date: removed.date,
        };
        self.persist(&event).await?;
        self.store.apply_quota(&mut guard, &event);

        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "delete").increment(1);
        tracing::info!(date = %removed.date, "quota deleted");
        Ok(removed)
    }

    pub async fn delete_quota_range(&self, start: NaiveDate, end: NaiveDate) -> Result<RangeDelete, EngineError> {
        let range = validate_range(start, end)?;
        let mut dates = Vec::new();
        for (date, slot) in self.store.quota_slots(Some(&range)) {
            let _gate = self.mutation_gate().await?;
            let mut guard = self.bounded("quota lock", slot.write()).await?;
            let Some(current) = guard.as_ref() else { continue };
            let event = Event::QuotaDeleted { id: current.id, date };
            self.persist(&event).await?;
            self.store.apply_quota(&mut guard, &event);
            dates.push(date);
        }
        if dates.is_empty() {
            return Err(EngineError::not_found("quota in range", range));
        }
        metrics::counter!(QUOTA_WRITES_TOTAL, "op" => "delete").increment(dates.len() as u64);
        tracing::info!(%range, deleted = dates.len(), "quota range deleted");
        Ok(RangeDelete {
            deleted: dates.len(),
            dates,
        })
    }

    /// Each item is attempted on its own; failures are reported, not rolled back.
    pub async fn bulk_update_quotas(&self, items: Vec<QuotaUpdateItem>) -> Result<BulkSummary, EngineError> {
        BulkSummary::check_batch(items.len())?;
        let mut summary = BulkSummary::default();
        for item in items {
            let outcome = match Ulid::from_string(&item.id) {
                Ok(id) => self.update_quota(QuotaKey::Id(id), item.patch()).await,
                Err(_) => Err(EngineError::Validation(format!("invalid quota id: {}", item.id))),
            };
            summary.record(item.id, outcome);
        }
        Ok(summary)
    }

    pub async fn bulk_delete_quotas(&self, ids: Vec<String>) -> Result<BulkSummary, EngineError> {
        BulkSummary::check_batch(ids.len())?;
        let mut summary = BulkSummary::default();
        for raw in ids {
            let outcome = match Ulid::from_string(&raw) {
                Ok(id) => self.delete_quota(QuotaKey::Id(id)).await,
                Err(_) => Err(EngineError::Validation(format!("invalid quota id: {raw}"))),
            };
            summary.record(raw, outcome);
        }
        Ok(summary)
    }
}
