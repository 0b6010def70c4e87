//! Narrow interfaces to the records this engine reads but doesn't own.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::engine::SchedulingError;
use crate::model::{ProviderWorkingWindow, ServiceInfo};
use crate::tenant::TenantId;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn get_service(
        &self,
        tenant: &TenantId,
        service_id: Ulid,
    ) -> Result<Option<ServiceInfo>, SchedulingError>;
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn working_window(
        &self,
        provider_id: Ulid,
        day: Weekday,
    ) -> Result<Option<ProviderWorkingWindow>, SchedulingError>;
}

#[async_trait]
pub trait CustomPricing: Send + Sync {
    async fn custom_price(
        &self,
        provider_id: Ulid,
        service_id: Ulid,
    ) -> Result<Option<Decimal>, SchedulingError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}
