use async_trait::async_trait;
use chrono::Weekday;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::collaborators::{CustomPricing, ScheduleSource, ServiceRegistry};
use crate::engine::SchedulingError;
use crate::model::{ProviderWorkingWindow, ServiceInfo, TimeOfDay, weekday_from_index};
use crate::tenant::TenantId;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("day_of_week must be 0 (Sunday) to 6 (Saturday), got {0}")]
    BadWeekday(u8),
}

/// In-process service, schedule and custom-price records. Every lookup reads
/// the current maps, so edits are visible to the next query.
#[derive(Default)]
pub struct StaticCatalog {
    services: DashMap<(TenantId, Ulid), ServiceInfo>,
    windows: DashMap<(Ulid, Weekday), ProviderWorkingWindow>,
    custom_prices: DashMap<(Ulid, Ulid), Decimal>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    services: Vec<ServiceEntry>,
    #[serde(default)]
    working_windows: Vec<WindowEntry>,
    #[serde(default)]
    custom_prices: Vec<PriceEntry>,
}

#[derive(Deserialize)]
struct ServiceEntry {
    tenant_id: TenantId,
    id: Ulid,
    duration_minutes: i32,
    default_price: Decimal,
}

#[derive(Deserialize)]
struct WindowEntry {
    provider_id: Ulid,
    day_of_week: u8,
    start_time: TimeOfDay,
    end_time: TimeOfDay,
    #[serde(default = "available_by_default")]
    is_available: bool,
}

fn available_by_default() -> bool {
    true
}

#[derive(Deserialize)]
struct PriceEntry {
    provider_id: Ulid,
    service_id: Ulid,
    price: Decimal,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON. Prices are decimal strings (`"80.00"`), times `"HH:MM"`.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let catalog = Self::new();
        for s in file.services {
            catalog.add_service(
                s.tenant_id,
                s.id,
                ServiceInfo {
                    duration_minutes: s.duration_minutes,
                    default_price: s.default_price,
                },
            );
        }
        for w in file.working_windows {
            let day = weekday_from_index(w.day_of_week).ok_or(CatalogError::BadWeekday(w.day_of_week))?;
            catalog.set_working_window(
                w.provider_id,
                day,
                ProviderWorkingWindow {
                    start_time: w.start_time,
                    end_time: w.end_time,
                    is_available: w.is_available,
                },
            );
        }
        for p in file.custom_prices {
            catalog.set_custom_price(p.provider_id, p.service_id, p.price);
        }
        Ok(catalog)
    }

    pub fn add_service(&self, tenant: TenantId, service_id: Ulid, info: ServiceInfo) {
        self.services.insert((tenant, service_id), info);
    }

    pub fn set_working_window(&self, provider_id: Ulid, day: Weekday, window: ProviderWorkingWindow) {
        self.windows.insert((provider_id, day), window);
    }

    pub fn clear_working_window(&self, provider_id: Ulid, day: Weekday) {
        self.windows.remove(&(provider_id, day));
    }

    pub fn set_custom_price(&self, provider_id: Ulid, service_id: Ulid, price: Decimal) {
        self.custom_prices.insert((provider_id, service_id), price);
    }

    pub fn clear_custom_price(&self, provider_id: Ulid, service_id: Ulid) {
        self.custom_prices.remove(&(provider_id, service_id));
    }
}

#[async_trait]
impl ServiceRegistry for StaticCatalog {
    async fn get_service(
        &self,
        tenant: &TenantId,
        service_id: Ulid,
    ) -> Result<Option<ServiceInfo>, SchedulingError> {
        Ok(self
            .services
            .get(&(tenant.clone(), service_id))
            .map(|e| *e.value()))
    }
}

#[async_trait]
impl ScheduleSource for StaticCatalog {
    async fn working_window(
        &self,
        provider_id: Ulid,
        day: Weekday,
    ) -> Result<Option<ProviderWorkingWindow>, SchedulingError> {
        Ok(self.windows.get(&(provider_id, day)).map(|e| *e.value()))
    }
}

#[async_trait]
impl CustomPricing for StaticCatalog {
    async fn custom_price(
        &self,
        provider_id: Ulid,
        service_id: Ulid,
    ) -> Result<Option<Decimal>, SchedulingError> {
        Ok(self
            .custom_prices
            .get(&(provider_id, service_id))
            .map(|e| *e.value()))
    }
}
