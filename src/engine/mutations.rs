use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};
use ulid::Ulid;

use crate::model::*;
use crate::tenant::TenantId;

use super::conflict::{booking_interval, check_no_conflict, validate_notes};
use super::lifecycle::validate_transition;
use super::locks::DayGuard;
use super::pricing::pick_price;
use super::{NotFoundTarget, Scheduler, SchedulingError, record};

impl Scheduler {
    #[instrument(skip(self, req), fields(tenant = %tenant, provider = %req.provider_id, date = %req.date))]
    pub async fn create_appointment(
        &self,
        tenant: &TenantId,
        req: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.create_inner(tenant, req).await;
        record("create_appointment", started, &result);
        result
    }

    #[instrument(skip(self, patch), fields(tenant = %tenant))]
    pub async fn update_appointment(
        &self,
        tenant: &TenantId,
        id: Ulid,
        patch: AppointmentPatch,
    ) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.update_inner(tenant, id, &patch).await;
        record("update_appointment", started, &result);
        result
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn update_status(
        &self,
        tenant: &TenantId,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let started = Instant::now();
        let result = self.update_status_inner(tenant, id, status).await;
        record("update_status", started, &result);
        result
    }

    async fn create_inner(&self, tenant: &TenantId, req: NewAppointment) -> Result<Appointment, SchedulingError> {
        validate_notes(req.notes.as_deref())?;
        let service = self.resolve_service(tenant, req.service_id).await?;
        let interval = booking_interval(req.start_time, service.duration_minutes)?;

        // Neither the schedule nor the price depends on other bookings, so
        // both are settled before taking the day lock.
        let ((), price) = futures::try_join!(
            self.ensure_within_hours(req.provider_id, req.date, &interval),
            self.prices.resolve(req.price, req.provider_id, req.service_id, service.default_price),
        )?;

        let key = DayKey {
            tenant_id: tenant.clone(),
            provider_id: req.provider_id,
            date: req.date,
        };
        let _guard = self.locks.acquire(vec![key]).await;

        let book = self.load_day_book(tenant, req.provider_id, req.date, None).await?;
        check_no_conflict(&book, &interval)?;

        let now = self.clock.now();
        let appointment = Appointment {
            id: Ulid::new(),
            tenant_id: tenant.clone(),
            client_id: req.client_id,
            provider_id: req.provider_id,
            service_id: req.service_id,
            date: req.date,
            start_time: interval.start,
            end_time: interval.end,
            status: AppointmentStatus::Scheduled,
            price,
            notes: req.notes,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&appointment).await?;
        info!(
            "booked appointment {} for provider {} on {} {}",
            appointment.id, appointment.provider_id, appointment.date, interval
        );
        Ok(appointment)
    }

    async fn update_inner(
        &self,
        tenant: &TenantId,
        id: Ulid,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, SchedulingError> {
        validate_notes(patch.notes.as_deref())?;
        if let Some(p) = patch.price {
            pick_price(Some(p), None, Decimal::ZERO)?;
        }

        let (current, _guard) = self
            .lock_appointment(tenant, id, |a| {
                Some(DayKey {
                    tenant_id: tenant.clone(),
                    provider_id: patch.provider_id.unwrap_or(a.provider_id),
                    date: patch.date.unwrap_or(a.date),
                })
            })
            .await?;

        let provider_id = patch.provider_id.unwrap_or(current.provider_id);
        let service_id = patch.service_id.unwrap_or(current.service_id);
        let date = patch.date.unwrap_or(current.date);
        let start_time = patch.start_time.unwrap_or(current.start_time);

        let pricing_inputs_changed = provider_id != current.provider_id || service_id != current.service_id;
        let reschedule =
            pricing_inputs_changed || date != current.date || start_time != current.start_time;

        if reschedule && current.status.is_terminal() {
            return Err(SchedulingError::Validation(format!(
                "a {} appointment can't be rescheduled",
                current.status
            )));
        }
        if current.status == AppointmentStatus::Completed
            && patch.price.is_some_and(|p| p != current.price)
        {
            return Err(SchedulingError::Validation(
                "the price of a completed appointment is final".into(),
            ));
        }

        let mut next = current.clone();
        if let Some(client_id) = patch.client_id {
            next.client_id = client_id;
        }
        if let Some(notes) = &patch.notes {
            next.notes = Some(notes.clone());
        }

        if reschedule {
            let service = self.resolve_service(tenant, service_id).await?;
            let interval = booking_interval(start_time, service.duration_minutes)?;
            self.ensure_within_hours(provider_id, date, &interval).await?;
            let book = self.load_day_book(tenant, provider_id, date, Some(id)).await?;
            check_no_conflict(&book, &interval)?;

            next.provider_id = provider_id;
            next.service_id = service_id;
            next.date = date;
            next.start_time = interval.start;
            next.end_time = interval.end;
            if patch.price.is_none() && pricing_inputs_changed {
                next.price = self
                    .prices
                    .resolve(None, provider_id, service_id, service.default_price)
                    .await?;
            }
        }
        if let Some(p) = patch.price {
            next.price = pick_price(Some(p), None, Decimal::ZERO)?.0;
        }

        if next == current {
            debug!("update of {id} changes nothing");
            return Ok(current);
        }
        next.updated_at = self.clock.now();
        self.store.update(&next).await?;
        info!(
            "updated appointment {id}: provider {} on {} {}",
            next.provider_id,
            next.date,
            next.interval()
        );
        Ok(next)
    }

    async fn update_status_inner(
        &self,
        tenant: &TenantId,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let (current, _guard) = self.lock_appointment(tenant, id, |_| None).await?;
        validate_transition(current.status, status)?;

        let mut next = current;
        next.status = status;
        next.updated_at = self.clock.now();
        self.store.update(&next).await?;
        info!("appointment {id} is now {status}");
        Ok(next)
    }

    pub(super) async fn resolve_service(
        &self,
        tenant: &TenantId,
        service_id: Ulid,
    ) -> Result<ServiceInfo, SchedulingError> {
        self.services
            .get_service(tenant, service_id)
            .await?
            .ok_or(SchedulingError::NotFound(NotFoundTarget::Service(service_id)))
    }

    async fn ensure_within_hours(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        interval: &TimeInterval,
    ) -> Result<(), SchedulingError> {
        if !self.options.enforce_working_window {
            return Ok(());
        }
        match self.schedules.working_window(provider_id, date).await? {
            Some(window) if window.contains_interval(interval) => Ok(()),
            _ => Err(SchedulingError::OutsideWorkingWindow { provider_id, date }),
        }
    }

    /// Load an appointment and lock its day plus `also(appointment)`. If the
    /// appointment moved to another day while we waited, start over.
    async fn lock_appointment<F>(
        &self,
        tenant: &TenantId,
        id: Ulid,
        also: F,
    ) -> Result<(Appointment, DayGuard), SchedulingError>
    where
        F: Fn(&Appointment) -> Option<DayKey>,
    {
        loop {
            let seen = self.fetch_appointment(tenant, id).await?;
            let mut keys = vec![seen.day_key()];
            keys.extend(also(&seen));
            let guard = self.locks.acquire(keys).await;

            let current = self.fetch_appointment(tenant, id).await?;
            if current.day_key() == seen.day_key() {
                return Ok((current, guard));
            }
            debug!("appointment {id} moved while waiting for its lock, retrying");
        }
    }
}
