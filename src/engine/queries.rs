use std::time::Instant;

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::tenant::TenantId;

use super::conflict::validate_duration;
use super::slots::OpenSlots;
use super::{NotFoundTarget, Scheduler, SchedulingError, record};

impl Scheduler {
    /// Appointments of a tenant ordered by `(date, start_time)`.
    pub async fn list_appointments(
        &self,
        tenant: &TenantId,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let started = Instant::now();
        let result = self.store.list(tenant, filter).await;
        record("list_appointments", started, &result);
        result
    }

    pub async fn get_appointment(&self, tenant: &TenantId, id: Ulid) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.fetch_appointment(tenant, id).await;
        record("get_appointment", started, &result);
        result
    }

    /// Bookable start times for a provider on a date. The duration comes
    /// from `service_id`, or the configured default when none is given.
    pub async fn available_slots(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        service_id: Option<Ulid>,
    ) -> Result<Vec<TimeOfDay>, SchedulingError> {
        let started = Instant::now();
        let result = async {
            let duration = match service_id {
                Some(sid) => self.resolve_service(tenant, sid).await?.duration_minutes,
                None => self.options.default_duration_minutes,
            };
            self.slots_for(tenant, provider_id, date, duration).await
        }
        .await;
        record("available_slots", started, &result);
        result
    }

    pub async fn available_slots_for_duration(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        duration_minutes: i32,
    ) -> Result<Vec<TimeOfDay>, SchedulingError> {
        let started = Instant::now();
        let result = self.slots_for(tenant, provider_id, date, duration_minutes).await;
        record("available_slots", started, &result);
        result
    }

    async fn slots_for(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        duration_minutes: i32,
    ) -> Result<Vec<TimeOfDay>, SchedulingError> {
        let duration = validate_duration(duration_minutes)?;
        let Some(window) = self.schedules.working_window(provider_id, date).await? else {
            return Ok(Vec::new());
        };
        // One read of the day's bookings serves every candidate.
        let book = self.load_day_book(tenant, provider_id, date, None).await?;
        let slots: Vec<TimeOfDay> = OpenSlots::new(window, duration, &book).collect();
        debug!(
            "{} open {duration}m slots for provider {provider_id} on {date} ({} booked)",
            slots.len(),
            book.len()
        );
        metrics::histogram!(crate::observability::SLOTS_RETURNED).record(slots.len() as f64);
        Ok(slots)
    }

    pub(super) async fn fetch_appointment(&self, tenant: &TenantId, id: Ulid) -> Result<Appointment, SchedulingError> {
        self.store
            .get(tenant, id)
            .await?
            .ok_or(SchedulingError::NotFound(NotFoundTarget::Appointment(id)))
    }
}
