use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::*;
use crate::resolver::resolve_ids;
use crate::schema::FieldDefinition;

use super::attendance::ends_consecutive_run;
use super::{Engine, EngineError};

impl Engine {
    /// Definition of the employee field on the reservation form, if the form
    /// is registered and the field is a reference.
    pub(super) fn employee_field(&self) -> Option<FieldDefinition> {
        let settings = self.settings();
        self.store
            .schema(&settings.reservation_form)?
            .iter()
            .find(|def| def.name == settings.employee_field && def.foreign.is_some())
            .cloned()
    }

    /// Fresh employee projections for `ids`. `None` when the reservation form
    /// has no employee reference registered. A target the employee form does
    /// not declare makes the field a plain value, so nobody resolves.
    async fn employee_names(
        &self,
        ids: &[String],
    ) -> Result<Option<HashMap<String, Reference>>, EngineError> {
        let Some(def) = self.employee_field() else {
            return Ok(None);
        };
        let Some(refs) = resolve_ids(ids, &def, self, self).await? else {
            return Ok(Some(HashMap::new()));
        };
        Ok(Some(
            refs.into_iter()
                .map(|r| (r.id().to_string(), r))
                .collect(),
        ))
    }

    /// Everyone booked on `date`, sorted by display name.
    pub async fn roster_for_date(&self, date: NaiveDate) -> Result<Vec<RosterEntry>, EngineError> {
        let window = DayRange::single(date);
        let reservations = self.reservations_overlapping(&window).await?;

        let mut ids: Vec<String> = reservations
            .iter()
            .map(|r| r.employee.id().to_string())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let fresh = self.employee_names(&ids).await?;

        let mut roster: Vec<RosterEntry> = reservations
            .into_iter()
            .map(|r| {
                // Names resolved at ingest may be stale; re-resolve when we can.
                let employee = match &fresh {
                    Some(found) => found.get(r.employee.id()).cloned().unwrap_or_else(|| {
                        Reference::Unresolved {
                            id: r.employee.id().to_string(),
                        }
                    }),
                    None => r.employee.clone(),
                };
                let days: Vec<NaiveDate> = r.span().days().collect();
                RosterEntry {
                    reservation_id: r.id,
                    employee_id: employee.id().to_string(),
                    employee_name: employee.display().to_string(),
                    employee_resolved: employee.is_resolved(),
                    start_date: r.start_date,
                    end_date: r.end_date,
                    is_starting_today: r.start_date == date,
                    is_ending_today: ends_consecutive_run(&days, date),
                    has_attended: r.attendance.get(&date).copied(),
                    unit: r.unit,
                    order_number: r.order_number,
                    funding_source: r.funding_source,
                }
            })
            .collect();
        roster.sort_by(|a, b| {
            a.employee_name
                .cmp(&b.employee_name)
                .then(a.start_date.cmp(&b.start_date))
                .then(a.reservation_id.cmp(&b.reservation_id))
        });
        Ok(roster)
    }
}
