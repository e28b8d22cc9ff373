use std::collections::{BTreeMap, BTreeSet};
use std::iter::successors;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ATTENDANCE_MARKS_TOTAL, MANAGER_REPORT_CONFLICTS_TOTAL};

use super::occupancy::{count_occupancy, round_percent};
use super::quota::fresh_quota;
use super::validate::*;
use super::{BulkSummary, Engine, EngineError, SharedReservation};

/// True iff `day` is the last day of a run of consecutive days in `days`
/// that is longer than [`ENDING_RUN_THRESHOLD`]. One- and two-day orders are
/// never "ending".
pub fn ends_consecutive_run(days: &[NaiveDate], day: NaiveDate) -> bool {
    let set: BTreeSet<NaiveDate> = days.iter().copied().collect();
    if !set.contains(&day) || day.succ_opt().is_some_and(|next| set.contains(&next)) {
        return false;
    }
    let run = successors(Some(day), |d| d.pred_opt())
        .take_while(|d| set.contains(d))
        .count();
    run > ENDING_RUN_THRESHOLD
}

fn rate(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        0
    } else {
        round_percent(part as u64, whole as u64)
    }
}

impl Engine {
    /// The employee's reservation covering `date`. With overlapping
    /// reservations the earliest-starting one wins.
    async fn covering_reservation(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<SharedReservation>, EngineError> {
        let mut best: Option<((NaiveDate, ulid::Ulid), SharedReservation)> = None;
        for shared in self.store.reservations_for_employee(employee_id) {
            let key = {
                let guard = self.bounded("reservation read", shared.read()).await?;
                if !guard.covers(date) {
                    continue;
                }
                (guard.start_date, guard.id)
            };
            if best.as_ref().is_none_or(|(k, _)| key < *k) {
                best = Some((key, shared));
            }
        }
        Ok(best.map(|(_, shared)| shared))
    }

    pub async fn set_attendance(
        &self,
        employee_id: &str,
        date: NaiveDate,
        has_attended: bool,
    ) -> Result<AttendanceMark, EngineError> {
        validate_employee_id(employee_id)?;
        let shared = self
            .covering_reservation(employee_id, date)
            .await?
            .ok_or_else(|| EngineError::not_found("reservation covering date", format!("{employee_id}@{date}")))?;

        let _gate = self.mutation_gate().await?;
        let mut guard = self.bounded("reservation lock", shared.write()).await?;
        let event = Event::AttendanceMarked {
            reservation_id: guard.id,
            date,
            attended: has_attended,
        };
        self.persist(&event).await?;
        self.store.apply_reservation(&mut guard, &event);

        metrics::counter!(ATTENDANCE_MARKS_TOTAL).increment(1);
        tracing::debug!(employee = employee_id, %date, has_attended, "attendance marked");
        Ok(AttendanceMark {
            reservation_id: guard.id,
            employee_id: employee_id.to_string(),
            date,
            has_attended,
        })
    }

    pub async fn bulk_set_attendance(&self, items: Vec<AttendanceUpdate>) -> Result<BulkSummary, EngineError> {
        BulkSummary::check_batch(items.len())?;
        let mut summary = BulkSummary::default();
        for item in items {
            let outcome = self
                .set_attendance(&item.employee_id, item.date, item.has_attended)
                .await;
            summary.record(format!("{}@{}", item.employee_id, item.date), outcome);
        }
        Ok(summary)
    }

    /// One-shot gate per date. The slot's write lock is held from the check
    /// to the apply, so of two concurrent callers exactly one succeeds.
    pub async fn submit_manager_report(
        &self,
        date: NaiveDate,
        reported_by: Option<String>,
    ) -> Result<Quota, EngineError> {
        validate_name("reportedBy too long", reported_by.as_deref())?;

        let _gate = self.mutation_gate().await?;
        let slot = self.store.quota_slot(date);
        let mut guard = self.bounded("quota lock", slot.write()).await?;
        if let Some(q) = guard.as_ref()
            && q.manager_reported
        {
            metrics::counter!(MANAGER_REPORT_CONFLICTS_TOTAL).increment(1);
            tracing::warn!(%date, first = ?q.manager_reported_by, "manager report already submitted");
            return Err(EngineError::AlreadyReported {
                date,
                reported_by: q.manager_reported_by.clone(),
                reported_at: q.manager_reported_at,
            });
        }

        let base = match guard.as_ref() {
            Some(q) => q.clone(),
            None => fresh_quota(date, 0, None, reported_by.clone()),
        };
        let stamp = now();
        let event = Event::ManagerReported {
            quota: Quota {
                manager_reported: true,
                manager_reported_at: Some(stamp),
                manager_reported_by: reported_by,
                updated_at: stamp,
                ..base
            },
        };
        self.persist(&event).await?;
        self.store.apply_quota(&mut guard, &event);

        tracing::info!(%date, "manager report submitted");
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| EngineError::Store(format!("quota slot for {date} empty after report")))
    }

    pub async fn report_status(&self, date: NaiveDate) -> Result<ReportStatus, EngineError> {
        let status = match self.read_quota(date).await? {
            Some(q) if q.manager_reported => ReportStatus {
                date,
                has_reported: true,
                report_data: Some(ReportData {
                    reported_by: q.manager_reported_by,
                    reported_at: q.manager_reported_at,
                }),
            },
            _ => ReportStatus {
                date,
                has_reported: false,
                report_data: None,
            },
        };
        Ok(status)
    }

    /// Per-day required vs attended headcount, with the report flag.
    pub async fn attendance_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAttendance>, EngineError> {
        let window = validate_range(start, end)?;
        let reservations = self.reservations_overlapping(&window).await?;
        let required = count_occupancy(&reservations, &window);
        let reported: BTreeSet<NaiveDate> = self
            .read_quotas(&window)
            .await?
            .into_iter()
            .filter(|q| q.manager_reported)
            .map(|q| q.date)
            .collect();

        Ok(required
            .into_iter()
            .map(|(date, total_required)| {
                let total_attended = reservations
                    .iter()
                    .filter(|r| r.covers(date) && r.attendance.get(&date) == Some(&true))
                    .count() as u32;
                DailyAttendance {
                    date,
                    total_required,
                    total_attended,
                    attendance_rate: rate(total_attended, total_required),
                    manager_reported: reported.contains(&date),
                }
            })
            .collect())
    }

    /// Marks across all of an employee's reservations, newest first, capped
    /// at `limit`. The rate covers only the returned records.
    pub async fn attendance_history(
        &self,
        employee_id: &str,
        limit: Option<usize>,
    ) -> Result<AttendanceHistory, EngineError> {
        validate_employee_id(employee_id)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(EngineError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}"
            )));
        }

        let mut merged: BTreeMap<NaiveDate, bool> = BTreeMap::new();
        for shared in self.store.reservations_for_employee(employee_id) {
            let guard = self.bounded("reservation read", shared.read()).await?;
            for (date, attended) in &guard.attendance {
                *merged.entry(*date).or_insert(false) |= *attended;
            }
        }

        let records: Vec<AttendanceRecord> = merged
            .into_iter()
            .rev()
            .take(limit)
            .map(|(date, has_attended)| AttendanceRecord {
                date,
                has_attended,
                is_reported: true,
            })
            .collect();
        let total_days = records.len() as u32;
        let attended_days = records.iter().filter(|r| r.has_attended).count() as u32;
        Ok(AttendanceHistory {
            employee_id: employee_id.to_string(),
            total_days,
            attended_days,
            attendance_rate: rate(attended_days, total_days),
            records,
        })
    }
}
