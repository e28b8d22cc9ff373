use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::*;

use super::validate::validate_range;
use super::{Engine, EngineError};

// ── Pure computation ─────────────────────────────────────────

/// `round(part / whole * 100)`, half away from zero. `whole` must be non-zero.
pub(super) fn round_percent(part: u64, whole: u64) -> u32 {
    ((part * 100 + whole / 2) / whole) as u32
}

/// Headcount per day of `window`. Every day of the window has an entry; each
/// reservation is clamped to the window before it is counted.
pub fn count_occupancy<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    window: &DayRange,
) -> BTreeMap<NaiveDate, u32> {
    let mut counts: BTreeMap<NaiveDate, u32> = window.days().map(|d| (d, 0)).collect();
    for r in reservations {
        if !r.overlaps(window) {
            continue;
        }
        let Some(clamped) = r.span().intersect(window) else {
            continue;
        };
        for day in clamped.days() {
            if let Some(n) = counts.get_mut(&day) {
                *n += 1;
            }
        }
    }
    counts
}

/// Undefined without a positive quota.
pub fn occupancy_rate(occupancy: u32, quota: Option<u32>) -> Option<u32> {
    match quota {
        Some(q) if q > 0 => Some(round_percent(occupancy as u64, q as u64)),
        _ => None,
    }
}

/// Floored at zero when oversubscribed.
pub fn capacity_left(occupancy: u32, quota: Option<u32>) -> u32 {
    quota.unwrap_or(0).saturating_sub(occupancy)
}

pub fn capacity_left_percent(occupancy: u32, quota: Option<u32>) -> u32 {
    match quota {
        Some(q) if q > 0 => round_percent(capacity_left(occupancy, quota) as u64, q as u64),
        _ => 0,
    }
}

impl OccupancySnapshot {
    pub fn new(date: NaiveDate, quota: Option<u32>, occupancy: u32) -> Self {
        Self {
            date,
            quota,
            current_occupancy: occupancy,
            occupancy_rate: occupancy_rate(occupancy, quota),
            capacity_left: capacity_left(occupancy, quota),
            capacity_left_percent: capacity_left_percent(occupancy, quota),
        }
    }
}

/// Totals over a set of days. The average rate only counts days whose rate
/// is defined.
pub fn summarize(days: &[OccupancySnapshot]) -> OccupancySummary {
    let mut rated = 0u64;
    let mut rate_sum = 0u64;
    let mut summary = OccupancySummary {
        total_quota: 0,
        total_occupancy: 0,
        total_capacity_left: 0,
        average_occupancy_rate: None,
    };
    for day in days {
        summary.total_quota += day.quota.unwrap_or(0) as u64;
        summary.total_occupancy += day.current_occupancy as u64;
        summary.total_capacity_left += day.capacity_left as u64;
        if let Some(rate) = day.occupancy_rate {
            rated += 1;
            rate_sum += rate as u64;
        }
    }
    if rated > 0 {
        summary.average_occupancy_rate = Some(round_percent(rate_sum, rated * 100));
    }
    summary
}

/// Range read response: full snapshots with a summary, or bare counts when
/// the caller asked for occupancy only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OccupancyReport {
    Full {
        days: Vec<OccupancySnapshot>,
        summary: OccupancySummary,
    },
    CountsOnly {
        occupancy: BTreeMap<NaiveDate, u32>,
        #[serde(rename = "totalOccupancy")]
        total_occupancy: u64,
    },
}

// ── Engine reads ─────────────────────────────────────────────

impl Engine {
    /// Snapshot copies of every reservation overlapping `window`. Each read
    /// lock is bounded; one timeout fails the whole read.
    pub(super) async fn reservations_overlapping(
        &self,
        window: &DayRange,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for shared in self.store.all_reservations() {
            let guard = self.bounded("reservation read", shared.read()).await?;
            if guard.overlaps(window) {
                out.push(guard.clone());
            }
        }
        Ok(out)
    }

    pub async fn occupancy_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, u32>, EngineError> {
        let window = validate_range(start, end)?;
        let reservations = self.reservations_overlapping(&window).await?;
        Ok(count_occupancy(&reservations, &window))
    }

    /// The degenerate range `[date, date]`.
    pub async fn occupancy_for_date(&self, date: NaiveDate) -> Result<u32, EngineError> {
        let counts = self.occupancy_for_range(date, date).await?;
        Ok(counts.get(&date).copied().unwrap_or(0))
    }

    /// Best-effort view: quota and occupancy are read without a common lock.
    pub async fn quota_with_occupancy(&self, date: NaiveDate) -> Result<OccupancySnapshot, EngineError> {
        let quota = self.read_quota(date).await?.map(|q| q.quota);
        let occupancy = self.occupancy_for_date(date).await?;
        Ok(OccupancySnapshot::new(date, quota, occupancy))
    }

    pub async fn occupancy_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        occupancy_only: bool,
    ) -> Result<OccupancyReport, EngineError> {
        let window = validate_range(start, end)?;
        let reservations = self.reservations_overlapping(&window).await?;
        let counts = count_occupancy(&reservations, &window);

        if occupancy_only {
            let total_occupancy = counts.values().map(|&n| n as u64).sum();
            return Ok(OccupancyReport::CountsOnly {
                occupancy: counts,
                total_occupancy,
            });
        }

        let quotas: BTreeMap<NaiveDate, u32> = self
            .read_quotas(&window)
            .await?
            .into_iter()
            .map(|q| (q.date, q.quota))
            .collect();
        let days: Vec<OccupancySnapshot> = counts
            .iter()
            .map(|(date, &n)| OccupancySnapshot::new(*date, quotas.get(date).copied(), n))
            .collect();
        let summary = summarize(&days);
        Ok(OccupancyReport::Full { days, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn res(start: &str, end: Option<&str>) -> Reservation {
        Reservation {
            id: Ulid::new(),
            employee: Reference::Unresolved { id: "e".into() },
            start_date: d(start),
            end_date: end.map(d),
            attendance: Default::default(),
            unit: None,
            order_number: None,
            funding_source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn interval_inside_window_counts_every_day() {
        let window = DayRange::new(d("2025-06-01"), d("2025-06-07")).unwrap();
        let counts = count_occupancy(&[res("2025-06-02", Some("2025-06-04"))], &window);
        let expected: Vec<u32> = vec![0, 1, 1, 1, 0, 0, 0];
        assert_eq!(counts.values().copied().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn intervals_are_clamped_to_window() {
        let window = DayRange::new(d("2025-06-10"), d("2025-06-12")).unwrap();
        let reservations = [
            res("2025-06-01", Some("2025-06-10")),
            res("2025-06-11", Some("2025-06-30")),
            res("2025-06-12", None),
            res("2025-06-09", None),
        ];
        let counts = count_occupancy(&reservations, &window);
        assert_eq!(counts[&d("2025-06-10")], 1);
        assert_eq!(counts[&d("2025-06-11")], 1);
        assert_eq!(counts[&d("2025-06-12")], 2);
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn rates_without_quota_are_undefined() {
        assert_eq!(occupancy_rate(3, None), None);
        assert_eq!(occupancy_rate(3, Some(0)), None);
        assert_eq!(capacity_left_percent(3, None), 0);
        assert_eq!(capacity_left_percent(0, Some(0)), 0);
        assert_eq!(occupancy_rate(3, Some(5)), Some(60));
        assert_eq!(occupancy_rate(1, Some(3)), Some(33));
        assert_eq!(occupancy_rate(2, Some(3)), Some(67));
    }

    #[test]
    fn capacity_left_never_negative() {
        assert_eq!(capacity_left(9, Some(5)), 0);
        assert_eq!(capacity_left_percent(9, Some(5)), 0);
        assert_eq!(capacity_left(2, Some(5)), 3);
        assert_eq!(capacity_left_percent(2, Some(5)), 60);
        let snap = OccupancySnapshot::new(d("2025-06-20"), Some(5), 9);
        assert_eq!(snap.capacity_left, 0);
        assert_eq!(snap.occupancy_rate, Some(180));
    }

    #[test]
    fn summary_averages_defined_rates_only() {
        let days = vec![
            OccupancySnapshot::new(d("2025-06-01"), Some(4), 1),
            OccupancySnapshot::new(d("2025-06-02"), Some(4), 2),
            OccupancySnapshot::new(d("2025-06-03"), None, 7),
        ];
        let s = summarize(&days);
        assert_eq!(s.total_quota, 8);
        assert_eq!(s.total_occupancy, 10);
        assert_eq!(s.total_capacity_left, 5);
        // (25 + 50) / 2 = 37.5
        assert_eq!(s.average_occupancy_rate, Some(38));
        assert_eq!(summarize(&days[2..]).average_occupancy_rate, None);
    }
}
