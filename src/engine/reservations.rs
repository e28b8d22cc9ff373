use std::collections::BTreeMap;

use ulid::Ulid;

use crate::limits::MAX_RESERVATION_DAYS;
use crate::model::*;
use crate::resolver::{resolve_field, FieldInput, ResolvedField};

use super::validate::*;
use super::{Engine, EngineError};

impl Engine {
    /// Resolve an employee id through the reservation form's employee field.
    /// No registered field, a non-reference field or a missing document all
    /// leave the reference unresolved.
    async fn resolve_employee(&self, employee_id: &str) -> Result<Reference, EngineError> {
        let unresolved = || Reference::Unresolved {
            id: employee_id.to_string(),
        };
        let Some(def) = self.employee_field() else {
            return Ok(unresolved());
        };
        let input = FieldInput::Id(employee_id.to_string());
        match resolve_field(&input, &def, self, self).await? {
            ResolvedField::One(reference) => Ok(reference),
            ResolvedField::Many(_) | ResolvedField::Passthrough(_) => Ok(unresolved()),
        }
    }

    /// Record a reservation the way the submission pipeline hands it over.
    pub async fn record_reservation(&self, sub: ReservationSubmission) -> Result<Reservation, EngineError> {
        validate_employee_id(&sub.employee_id)?;
        validate_name("unit too long", sub.unit.as_deref())?;
        validate_name("orderNumber too long", sub.order_number.as_deref())?;
        validate_name("fundingSource too long", sub.funding_source.as_deref())?;
        if let Some(end) = sub.end_date {
            let span = DayRange::new(sub.start_date, end).ok_or_else(|| {
                EngineError::Validation(format!("endDate {end} precedes startDate {}", sub.start_date))
            })?;
            if span.len_days() > MAX_RESERVATION_DAYS {
                return Err(EngineError::LimitExceeded("reservation too long"));
            }
        }

        let employee = self.resolve_employee(&sub.employee_id).await?;
        let reservation = Reservation {
            id: Ulid::new(),
            employee,
            start_date: sub.start_date,
            end_date: sub.end_date,
            attendance: BTreeMap::new(),
            unit: sub.unit,
            order_number: sub.order_number,
            funding_source: sub.funding_source,
            created_at: now(),
        };
        let event = Event::ReservationRecorded {
            reservation: reservation.clone(),
        };
        let _gate = self.mutation_gate().await?;
        self.persist(&event).await?;
        self.store.apply_unlocked(&event);

        tracing::info!(
            id = %reservation.id,
            employee = reservation.employee.id(),
            span = %reservation.span(),
            "reservation recorded"
        );
        Ok(reservation)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let shared = self
            .store
            .reservation(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        let guard = self.bounded("reservation read", shared.read()).await?;
        Ok(guard.clone())
    }

    /// An employee's reservations, ordered by start date.
    pub async fn reservations_for_employee(&self, employee_id: &str) -> Result<Vec<Reservation>, EngineError> {
        validate_employee_id(employee_id)?;
        let mut out = Vec::new();
        for shared in self.store.reservations_for_employee(employee_id) {
            let guard = self.bounded("reservation read", shared.read()).await?;
            out.push(guard.clone());
        }
        out.sort_by_key(|r| (r.start_date, r.id));
        Ok(out)
    }
}
