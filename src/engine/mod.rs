mod conflict;
mod error;
mod lifecycle;
mod locks;
mod mutations;
mod pricing;
mod queries;
mod schedule;
mod slots;
pub mod store;

pub use error::{ErrorClass, NotFoundTarget, SchedulingError};
pub use lifecycle::{can_transition, next_statuses, validate_transition};
pub use pricing::{PriceResolver, PriceSource, pick_price};
pub use schedule::{ScheduleRegistry, usable_window};
pub use slots::{CandidateStarts, OpenSlots};
pub use store::{AppointmentStore, InMemoryStore};

use std::sync::Arc;
use std::time::Instant;

use crate::collaborators::{Clock, CustomPricing, ScheduleSource, ServiceRegistry};
use crate::limits::DEFAULT_SLOT_DURATION_MINUTES;

use locks::DayLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Reject bookings that fall outside the provider's working window.
    pub enforce_working_window: bool,
    /// Duration used by slot queries that name no service.
    pub default_duration_minutes: i32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            enforce_working_window: true,
            default_duration_minutes: DEFAULT_SLOT_DURATION_MINUTES,
        }
    }
}

/// The records this engine reads or writes but doesn't own.
#[derive(Clone)]
pub struct Collaborators {
    pub services: Arc<dyn ServiceRegistry>,
    pub schedules: Arc<dyn ScheduleSource>,
    pub pricing: Arc<dyn CustomPricing>,
    pub store: Arc<dyn AppointmentStore>,
    pub clock: Arc<dyn Clock>,
}

/// Books, reschedules and lists appointments for every tenant of one store.
///
/// All writers of a store must go through the same `Scheduler`: the
/// per-day locks that keep bookings from overlapping live in this process.
pub struct Scheduler {
    options: SchedulerOptions,
    services: Arc<dyn ServiceRegistry>,
    schedules: ScheduleRegistry,
    prices: PriceResolver,
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    locks: DayLocks,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions, collaborators: Collaborators) -> Self {
        Self {
            options,
            services: collaborators.services,
            schedules: ScheduleRegistry::new(collaborators.schedules),
            prices: PriceResolver::new(collaborators.pricing),
            store: collaborators.store,
            clock: collaborators.clock,
            locks: DayLocks::new(),
        }
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }
}

/// Count and time one public operation.
fn record<T>(operation: &'static str, started: Instant, result: &Result<T, SchedulingError>) {
    use crate::observability::{OPERATION_DURATION_SECONDS, OPERATIONS_TOTAL};
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.label(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
