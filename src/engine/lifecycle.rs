use tracing::warn;

use crate::model::AppointmentStatus;
use crate::model::AppointmentStatus::*;

use super::SchedulingError;

/// Permitted `(from, to)` status changes. `Scheduled → Completed` covers
/// same-day walk-ins that are never confirmed.
const TRANSITIONS: &[(AppointmentStatus, AppointmentStatus)] = &[
    (Scheduled, Confirmed),
    (Scheduled, Cancelled),
    (Scheduled, Completed),
    (Confirmed, Completed),
    (Confirmed, Cancelled),
];

pub fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Statuses reachable from `from` in one step.
pub fn next_statuses(from: AppointmentStatus) -> Vec<AppointmentStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _)| *f == from)
        .map(|(_, to)| *to)
        .collect()
}

pub fn validate_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), SchedulingError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        warn!("rejected status transition {from} -> {to}");
        Err(SchedulingError::InvalidTransition { from, to })
    }
}
