use std::fmt;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AppointmentStatus, InvalidTimeOfDay};
use crate::tenant::InvalidTenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundTarget {
    Appointment(Ulid),
    Service(Ulid),
}

impl fmt::Display for NotFoundTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundTarget::Appointment(id) => write!(f, "appointment {id}"),
            NotFoundTarget::Service(id) => write!(f, "service {id}"),
        }
    }
}

/// How a caller should surface an error: 404, 400 or 500 equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    BadRequest,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("not found: {0}")]
    NotFound(NotFoundTarget),
    #[error("scheduling conflict with appointment {0}")]
    SchedulingConflict(Ulid),
    #[error("provider {provider_id} is not available at the requested time on {date}")]
    OutsideWorkingWindow { provider_id: Ulid, date: NaiveDate },
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl SchedulingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SchedulingError::NotFound(_) => ErrorClass::NotFound,
            SchedulingError::SchedulingConflict(_)
            | SchedulingError::OutsideWorkingWindow { .. }
            | SchedulingError::InvalidTransition { .. }
            | SchedulingError::Validation(_)
            | SchedulingError::LimitExceeded(_) => ErrorClass::BadRequest,
            SchedulingError::Storage(_) | SchedulingError::Collaborator(_) => ErrorClass::Internal,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingError::NotFound(_) => "not_found",
            SchedulingError::SchedulingConflict(_) => "conflict",
            SchedulingError::OutsideWorkingWindow { .. } => "outside_working_window",
            SchedulingError::InvalidTransition { .. } => "invalid_transition",
            SchedulingError::Validation(_) => "validation",
            SchedulingError::LimitExceeded(_) => "limit_exceeded",
            SchedulingError::Storage(_) => "storage",
            SchedulingError::Collaborator(_) => "collaborator",
        }
    }
}

impl From<InvalidTimeOfDay> for SchedulingError {
    fn from(e: InvalidTimeOfDay) -> Self {
        SchedulingError::Validation(e.to_string())
    }
}

impl From<InvalidTenantId> for SchedulingError {
    fn from(e: InvalidTenantId) -> Self {
        SchedulingError::Validation(e.to_string())
    }
}
