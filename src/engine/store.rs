use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_LIST_RESULTS;
use crate::model::*;
use crate::tenant::TenantId;

use super::error::{NotFoundTarget, SchedulingError};

/// Tenant-scoped appointment persistence. Implementations must never return
/// an appointment to a caller naming a different tenant.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, tenant: &TenantId, id: Ulid) -> Result<Option<Appointment>, SchedulingError>;

    /// Matching appointments ordered by `(date, start_time)`.
    async fn list(
        &self,
        tenant: &TenantId,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    async fn find_by_provider_and_date(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        exclude_cancelled: bool,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    async fn insert(&self, appointment: &Appointment) -> Result<(), SchedulingError>;

    async fn update(&self, appointment: &Appointment) -> Result<(), SchedulingError>;
}

#[derive(Default)]
struct Partition {
    appointments: DashMap<Ulid, Appointment>,
    /// (provider, date) → appointment ids, any status.
    days: DashMap<(Ulid, NaiveDate), Vec<Ulid>>,
}

impl Partition {
    fn index(&self, a: &Appointment) {
        self.days.entry((a.provider_id, a.date)).or_default().push(a.id);
    }

    fn unindex(&self, a: &Appointment) {
        let key = (a.provider_id, a.date);
        if let Some(mut ids) = self.days.get_mut(&key) {
            ids.retain(|id| *id != a.id);
        }
        self.days.remove_if(&key, |_, ids| ids.is_empty());
    }
}

/// Appointments held in memory, partitioned per tenant.
#[derive(Default)]
pub struct InMemoryStore {
    tenants: DashMap<TenantId, Arc<Partition>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, tenant: &TenantId) -> Option<Arc<Partition>> {
        self.tenants.get(tenant).map(|e| e.value().clone())
    }

    fn partition_or_create(&self, tenant: &TenantId) -> Arc<Partition> {
        self.tenants.entry(tenant.clone()).or_default().value().clone()
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn appointment_count(&self, tenant: &TenantId) -> usize {
        self.partition(tenant).map_or(0, |p| p.appointments.len())
    }

    /// Every appointment of a tenant, in no particular order.
    pub fn snapshot(&self, tenant: &TenantId) -> Vec<Appointment> {
        self.partition(tenant)
            .map(|p| p.appointments.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn get_sync(&self, tenant: &TenantId, id: Ulid) -> Option<Appointment> {
        self.partition(tenant)?
            .appointments
            .get(&id)
            .map(|e| e.value().clone())
    }

    pub fn insert_sync(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        let p = self.partition_or_create(&appointment.tenant_id);
        if p.appointments.contains_key(&appointment.id) {
            return Err(SchedulingError::Storage(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }
        p.appointments.insert(appointment.id, appointment.clone());
        p.index(appointment);
        Ok(())
    }

    pub fn update_sync(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        let p = self
            .partition(&appointment.tenant_id)
            .ok_or(SchedulingError::NotFound(NotFoundTarget::Appointment(appointment.id)))?;
        let previous = {
            let mut slot = p
                .appointments
                .get_mut(&appointment.id)
                .ok_or(SchedulingError::NotFound(NotFoundTarget::Appointment(appointment.id)))?;
            std::mem::replace(slot.value_mut(), appointment.clone())
        };
        if previous.provider_id != appointment.provider_id || previous.date != appointment.date {
            p.unindex(&previous);
            p.index(appointment);
        }
        Ok(())
    }

    /// Apply a replayed WAL event. Booked and revised both carry the full
    /// record, so either one upserts.
    pub fn apply_event(&self, event: &Event) {
        let appointment = event.appointment();
        let p = self.partition_or_create(&appointment.tenant_id);
        match p.appointments.insert(appointment.id, appointment.clone()) {
            Some(previous) => {
                if previous.provider_id != appointment.provider_id || previous.date != appointment.date {
                    p.unindex(&previous);
                    p.index(appointment);
                }
            }
            None => p.index(appointment),
        }
    }

    pub fn list_sync(
        &self,
        tenant: &TenantId,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let Some(p) = self.partition(tenant) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<Appointment> = match (filter.provider_id, filter.date) {
            // Narrow through the day index when both keys are known.
            (Some(provider_id), Some(date)) => self.day_appointments(&p, provider_id, date),
            _ => p.appointments.iter().map(|e| e.value().clone()).collect(),
        };
        found.retain(|a| filter.matches(a));
        if found.len() > MAX_LIST_RESULTS {
            return Err(SchedulingError::LimitExceeded("too many appointments in result"));
        }
        found.sort_by(|a, b| {
            (a.date, a.start_time, a.id).cmp(&(b.date, b.start_time, b.id))
        });
        Ok(found)
    }

    pub fn find_by_provider_and_date_sync(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        exclude_cancelled: bool,
    ) -> Vec<Appointment> {
        let Some(p) = self.partition(tenant) else {
            return Vec::new();
        };
        let mut found = self.day_appointments(&p, provider_id, date);
        if exclude_cancelled {
            found.retain(Appointment::is_active);
        }
        found.sort_by_key(|a| a.start_time);
        found
    }

    fn day_appointments(&self, p: &Partition, provider_id: Ulid, date: NaiveDate) -> Vec<Appointment> {
        let ids = p
            .days
            .get(&(provider_id, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| p.appointments.get(id).map(|e| e.value().clone()))
            // The index is updated after the record; skip entries that moved.
            .filter(|a| a.provider_id == provider_id && a.date == date)
            .collect()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn get(&self, tenant: &TenantId, id: Ulid) -> Result<Option<Appointment>, SchedulingError> {
        Ok(self.get_sync(tenant, id))
    }

    async fn list(
        &self,
        tenant: &TenantId,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.list_sync(tenant, filter)
    }

    async fn find_by_provider_and_date(
        &self,
        tenant: &TenantId,
        provider_id: Ulid,
        date: NaiveDate,
        exclude_cancelled: bool,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.find_by_provider_and_date_sync(tenant, provider_id, date, exclude_cancelled))
    }

    async fn insert(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        self.insert_sync(appointment)
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        self.update_sync(appointment)
    }
}
