use chrono::{NaiveDate, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(super) fn now() -> Timestamp {
    Utc::now()
}

pub(super) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DayRange, EngineError> {
    let range = DayRange::new(start, end)
        .ok_or_else(|| EngineError::Validation(format!("end date {end} precedes start date {start}")))?;
    if range.len_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(range)
}

pub(super) fn validate_quota(quota: u32) -> Result<(), EngineError> {
    if quota > MAX_QUOTA {
        return Err(EngineError::Validation(format!(
            "quota must be between 0 and {MAX_QUOTA}, got {quota}"
        )));
    }
    Ok(())
}

pub(super) fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

pub(super) fn validate_name(field: &'static str, value: Option<&str>) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded(field)),
        _ => Ok(()),
    }
}

pub(super) fn validate_patch(patch: &QuotaPatch) -> Result<(), EngineError> {
    if patch.is_empty() {
        return Err(EngineError::Validation("update must set quota or notes".into()));
    }
    if let Some(q) = patch.quota {
        validate_quota(q)?;
    }
    validate_notes(patch.notes.as_ref().and_then(Option::as_deref))
}

pub(super) fn validate_employee_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::Validation("employeeId is required".into()));
    }
    validate_name("employeeId too long", Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn range_validation() {
        assert!(validate_range(d("2025-06-01"), d("2025-06-30")).is_ok());
        assert!(matches!(
            validate_range(d("2025-06-02"), d("2025-06-01")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_range(d("2024-01-01"), d("2025-06-01")),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn quota_bounds() {
        assert!(validate_quota(0).is_ok());
        assert!(validate_quota(MAX_QUOTA).is_ok());
        assert!(validate_quota(MAX_QUOTA + 1).is_err());
    }

    #[test]
    fn empty_patch_rejected() {
        assert!(validate_patch(&QuotaPatch::default()).is_err());
        assert!(validate_patch(&QuotaPatch {
            quota: Some(3),
            notes: None
        })
        .is_ok());
    }
}
