use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tenant::TenantId;

use super::{Scheduler, SchedulingError};

pub(crate) fn validate_duration(duration_minutes: i32) -> Result<u32, SchedulingError> {
    if duration_minutes <= 0 {
        return Err(SchedulingError::Validation(format!(
            "duration must be positive, got {duration_minutes} minutes"
        )));
    }
    if duration_minutes > MAX_DURATION_MINUTES {
        return Err(SchedulingError::Validation(format!(
            "duration of {duration_minutes} minutes exceeds one day"
        )));
    }
    Ok(duration_minutes as u32)
}

/// `[start, start + duration)`; the appointment must end by midnight.
pub(crate) fn booking_interval(start: TimeOfDay, duration_minutes: i32) -> Result<TimeInterval, SchedulingError> {
    let minutes = validate_duration(duration_minutes)?;
    TimeInterval::starting_at(start, minutes).ok_or_else(|| {
        SchedulingError::Validation(format!(
            "appointment starting at {start} for {minutes} minutes would run past midnight"
        ))
    })
}

pub(crate) fn validate_notes(notes: Option<&str>) -> Result<(), SchedulingError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(SchedulingError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Reject `candidate` if it overlaps any booking in `book`.
pub(crate) fn check_no_conflict(book: &DayBook, candidate: &TimeInterval) -> Result<(), SchedulingError> {
    match book.first_conflict(candidate) {
        Some(existing) => {
            warn!("candidate {candidate} overlaps appointment {existing}");
            metrics::counter!(crate::observability::SCHEDULING_CONFLICTS_TOTAL).increment(1);
            Err(SchedulingError::SchedulingConflict(existing))
        }
        None => Ok(()),
    }
}

impl Scheduler {
    /// Active bookings of a provider on a date, minus `exclude` (the
    /// appointment being moved, on updates).
    pub(super) async fn load_day_book(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<DayBook, SchedulingError> {
        let booked = self
            .store
            .find_by_provider_and_date(tenant, provider_id, date, true)
            .await?;
        Ok(DayBook::from_appointments(
            booked.iter().filter(|a| Some(a.id) != exclude),
        ))
    }

    /// The first existing appointment overlapping `candidate`, if any.
    /// Read-only; a conflict is reported as `Some`, never as an error.
    pub async fn detect_conflict(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        candidate: TimeInterval,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, SchedulingError> {
        let book = self.load_day_book(tenant, provider_id, date, exclude).await?;
        Ok(book.first_conflict(&candidate))
    }
}
