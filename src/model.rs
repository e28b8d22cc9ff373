use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::schema::FieldDefinition;

/// Audit stamp. Calendar dates are always `NaiveDate`; instants are always UTC.
pub type Timestamp = DateTime<Utc>;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Strict `YYYY-MM-DD` parse (chrono alone accepts unpadded months and days).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Closed calendar interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersect(&self, other: &DayRange) -> Option<DayRange> {
        DayRange::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Fresh iterator over every day in the range. Calling it twice yields two
    /// independent walks; nothing is mutated in place.
    pub fn days(&self) -> DaySeq {
        DaySeq {
            next: Some(self.start),
            stop: self.end,
        }
    }
}

impl std::fmt::Display for DayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Finite walk over calendar days, produced by [`DayRange::days`].
#[derive(Debug, Clone)]
pub struct DaySeq {
    next: Option<NaiveDate>,
    stop: NaiveDate,
}

impl Iterator for DaySeq {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let day = self.next?;
        self.next = if day < self.stop { day.succ_opt() } else { None };
        Some(day)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self.next {
            Some(day) => ((self.stop - day).num_days() + 1).max(0) as usize,
            None => 0,
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for DaySeq {}

// ── Form documents ──────────────────────────────────────────────

/// A single scalar stored in a form document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Arrays and objects are not scalars.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }

    /// Falsy values (null, false, 0, NaN, "") are dropped from joined displays.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0 && !n.is_nan(),
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }
}

/// A generic document belonging to a form (employees, units, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub form: String,
    pub id: String,
    pub fields: BTreeMap<String, Scalar>,
}

impl Document {
    pub fn field(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name)
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        Value::Object(map)
    }
}

/// A foreign-key value after resolution. A reference whose target document
/// is missing stays `Unresolved` and displays as its raw id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Resolved {
        id: String,
        display: String,
        metadata: Option<BTreeMap<String, Scalar>>,
    },
    Unresolved {
        id: String,
    },
}

impl Reference {
    pub fn id(&self) -> &str {
        match self {
            Reference::Resolved { id, .. } | Reference::Unresolved { id } => id,
        }
    }

    pub fn display(&self) -> &str {
        match self {
            Reference::Resolved { display, .. } => display,
            Reference::Unresolved { id } => id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved { .. })
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), Value::String(self.id().to_string()));
        map.insert("display".into(), Value::String(self.display().to_string()));
        if let Reference::Resolved {
            metadata: Some(meta),
            ..
        } = self
        {
            let meta: serde_json::Map<String, Value> =
                meta.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
            map.insert("metadata".into(), Value::Object(meta));
        }
        map.insert("resolved".into(), Value::Bool(self.is_resolved()));
        Value::Object(map)
    }
}

// ── Scheduling records ──────────────────────────────────────────

/// Administrator-set headcount for one calendar date. At most one per date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub id: Ulid,
    pub date: NaiveDate,
    pub quota: u32,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub manager_reported: bool,
    pub manager_reported_at: Option<Timestamp>,
    pub manager_reported_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuota {
    pub date: NaiveDate,
    pub quota: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPatch {
    #[serde(default)]
    pub quota: Option<u32>,
    /// Absent leaves notes alone; `null` clears them.
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

/// Tells an explicit `null` (`Some(None)`) apart from a missing key (`None`,
/// via `#[serde(default)]`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl QuotaPatch {
    pub fn is_empty(&self) -> bool {
        self.quota.is_none() && self.notes.is_none()
    }
}

/// Upsert one quota row per date in `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuotaRange {
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub quota: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// One entry of a bulk quota update. The id stays a string so a malformed id
/// fails its own item rather than the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUpdateItem {
    pub id: String,
    #[serde(default)]
    pub quota: Option<u32>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

impl QuotaUpdateItem {
    pub fn patch(&self) -> QuotaPatch {
        QuotaPatch {
            quota: self.quota,
            notes: self.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    pub employee_id: String,
    pub date: NaiveDate,
    pub has_attended: bool,
}

/// How a caller addresses a quota row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKey {
    Id(Ulid),
    Date(NaiveDate),
}

impl std::fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKey::Id(id) => write!(f, "{id}"),
            QuotaKey::Date(date) => write!(f, "{date}"),
        }
    }
}

/// A "reserve day" document: one employee required on site over `[start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub employee: Reference,
    pub start_date: NaiveDate,
    /// Absent (or equal to `start_date`) means a single day.
    pub end_date: Option<NaiveDate>,
    /// Sparse per-day marks; a missing key means "never asked".
    pub attendance: BTreeMap<NaiveDate, bool>,
    pub unit: Option<String>,
    pub order_number: Option<String>,
    pub funding_source: Option<String>,
    pub created_at: Timestamp,
}

impl Reservation {
    pub fn span(&self) -> DayRange {
        let end = self.end_date.unwrap_or(self.start_date).max(self.start_date);
        DayRange {
            start: self.start_date,
            end,
        }
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        self.span().contains(day)
    }

    /// Whether this reservation counts toward any day of `window`.
    pub fn overlaps(&self, window: &DayRange) -> bool {
        match self.end_date {
            // A real interval: counts if it reaches into the window from either side.
            Some(end) if end > self.start_date => {
                self.start_date <= window.end && end >= window.start
            }
            // Open-ended or same-day: only the start day is occupied.
            _ => window.contains(self.start_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSubmission {
    pub employee_id: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub funding_source: Option<String>,
}

// ── Derived views ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySnapshot {
    pub date: NaiveDate,
    pub quota: Option<u32>,
    pub current_occupancy: u32,
    pub occupancy_rate: Option<u32>,
    pub capacity_left: u32,
    pub capacity_left_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySummary {
    pub total_quota: u64,
    pub total_occupancy: u64,
    pub total_capacity_left: u64,
    pub average_occupancy_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub has_attended: bool,
    /// True iff a mark exists for the date at all.
    pub is_reported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceHistory {
    pub employee_id: String,
    pub total_days: u32,
    pub attended_days: u32,
    pub attendance_rate: u32,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMark {
    pub reservation_id: Ulid,
    pub employee_id: String,
    pub date: NaiveDate,
    pub has_attended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAttendance {
    pub date: NaiveDate,
    pub total_required: u32,
    pub total_attended: u32,
    pub attendance_rate: u32,
    pub manager_reported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportData {
    pub reported_by: Option<String>,
    pub reported_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatus {
    pub date: NaiveDate,
    pub has_reported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_data: Option<ReportData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub reservation_id: Ulid,
    pub employee_id: String,
    pub employee_name: String,
    pub employee_resolved: bool,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub unit: Option<String>,
    pub order_number: Option<String>,
    pub funding_source: Option<String>,
    pub is_starting_today: bool,
    pub is_ending_today: bool,
    pub has_attended: Option<bool>,
}

/// One page of a sorted listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// `page` is 1-based; `limit` must be non-zero.
    pub fn slice(all: Vec<T>, page: usize, limit: usize) -> Self {
        let total = all.len();
        let total_pages = total.div_ceil(limit);
        let skip = (page.saturating_sub(1)).saturating_mul(limit);
        let items = all.into_iter().skip(skip).take(limit).collect();
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    QuotaCreated {
        quota: Quota,
    },
    QuotaUpdated {
        quota: Quota,
    },
    QuotaDeleted {
        id: Ulid,
        date: NaiveDate,
    },
    ManagerReported {
        quota: Quota,
    },
    ReservationRecorded {
        reservation: Reservation,
    },
    AttendanceMarked {
        reservation_id: Ulid,
        date: NaiveDate,
        attended: bool,
    },
    DocumentUpserted {
        document: Document,
    },
    DocumentDeleted {
        form: String,
        id: String,
    },
    SchemaRegistered {
        form: String,
        fields: Vec<FieldDefinition>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn reservation(start: &str, end: Option<&str>) -> Reservation {
        Reservation {
            id: Ulid::new(),
            employee: Reference::Unresolved { id: "e1".into() },
            start_date: d(start),
            end_date: end.map(d),
            attendance: BTreeMap::new(),
            unit: None,
            order_number: None,
            funding_source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parse_date_is_strict() {
        assert_eq!(parse_date("2025-06-20"), NaiveDate::from_ymd_opt(2025, 6, 20));
        assert!(parse_date("2025-6-20").is_none());
        assert!(parse_date("2025-02-30").is_none());
        assert!(parse_date("20250620").is_none());
    }

    #[test]
    fn day_range_rejects_inverted() {
        assert!(DayRange::new(d("2025-06-03"), d("2025-06-01")).is_none());
        assert!(DayRange::new(d("2025-06-01"), d("2025-06-01")).is_some());
    }

    #[test]
    fn days_walk_is_inclusive_and_restartable() {
        let range = DayRange::new(d("2025-06-29"), d("2025-07-02")).unwrap();
        let first: Vec<_> = range.days().collect();
        let second: Vec<_> = range.days().collect();
        assert_eq!(first, vec![d("2025-06-29"), d("2025-06-30"), d("2025-07-01"), d("2025-07-02")]);
        assert_eq!(first, second);
        assert_eq!(range.days().len(), 4);
        assert_eq!(range.len_days(), 4);
    }

    #[test]
    fn days_walk_single_day() {
        let range = DayRange::single(d("2024-02-29"));
        assert_eq!(range.days().collect::<Vec<_>>(), vec![d("2024-02-29")]);
    }

    #[test]
    fn intersect_clamps() {
        let a = DayRange::new(d("2025-06-01"), d("2025-06-10")).unwrap();
        let b = DayRange::new(d("2025-06-08"), d("2025-06-20")).unwrap();
        assert_eq!(a.intersect(&b), DayRange::new(d("2025-06-08"), d("2025-06-10")));
        let c = DayRange::new(d("2025-07-01"), d("2025-07-02")).unwrap();
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn reservation_overlap_cases() {
        let window = DayRange::new(d("2025-06-10"), d("2025-06-20")).unwrap();

        // Interval starting before the window and ending inside it.
        assert!(reservation("2025-06-01", Some("2025-06-10")).overlaps(&window));
        // Interval spanning the whole window.
        assert!(reservation("2025-06-01", Some("2025-06-30")).overlaps(&window));
        // Interval entirely before.
        assert!(!reservation("2025-06-01", Some("2025-06-09")).overlaps(&window));
        // Open-ended reservation starting inside.
        assert!(reservation("2025-06-15", None).overlaps(&window));
        // Open-ended reservation starting before: only its start day counts.
        assert!(!reservation("2025-06-05", None).overlaps(&window));
        // Same-day reservation inside / outside.
        assert!(reservation("2025-06-20", Some("2025-06-20")).overlaps(&window));
        assert!(!reservation("2025-06-21", Some("2025-06-21")).overlaps(&window));
    }

    #[test]
    fn reservation_span_defaults_to_single_day() {
        let r = reservation("2025-06-15", None);
        assert_eq!(r.span(), DayRange::single(d("2025-06-15")));
        assert!(r.covers(d("2025-06-15")));
        assert!(!r.covers(d("2025-06-16")));
    }

    #[test]
    fn scalar_truthiness_and_display() {
        assert!(!Scalar::Null.is_truthy());
        assert!(!Scalar::Text(String::new()).is_truthy());
        assert!(!Scalar::Number(0.0).is_truthy());
        assert!(!Scalar::Bool(false).is_truthy());
        assert!(Scalar::Text("Dana".into()).is_truthy());
        assert_eq!(Scalar::Number(42.0).display(), "42");
        assert_eq!(Scalar::Number(1.5).display(), "1.5");
    }

    #[test]
    fn unresolved_reference_displays_its_id() {
        let r = Reference::Unresolved { id: "emp-9".into() };
        assert_eq!(r.display(), "emp-9");
        let json = r.to_json();
        assert_eq!(json["display"], "emp-9");
        assert_eq!(json["resolved"], false);
    }

    #[test]
    fn page_slice() {
        let page = Page::slice((1..=7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        let past_end = Page::slice((1..=7).collect::<Vec<_>>(), 5, 3);
        assert!(past_end.items.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationRecorded {
            reservation: reservation("2025-06-01", Some("2025-06-03")),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
