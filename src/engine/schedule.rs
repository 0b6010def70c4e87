use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::collaborators::ScheduleSource;
use crate::model::{ProviderWorkingWindow, TimeInterval, weekday_index};

use super::SchedulingError;

/// Resolves a provider's working hours for a date from the weekly schedule.
/// Nothing is cached: each call reads the source.
pub struct ScheduleRegistry {
    source: Arc<dyn ScheduleSource>,
}

/// A missing row, a disabled row, or a row with `start >= end` all mean the
/// provider can't be booked that weekday.
pub fn usable_window(row: Option<ProviderWorkingWindow>) -> Option<TimeInterval> {
    let row = row?;
    if !row.is_available {
        return None;
    }
    TimeInterval::try_new(row.start_time, row.end_time)
}

impl ScheduleRegistry {
    pub fn new(source: Arc<dyn ScheduleSource>) -> Self {
        Self { source }
    }

    pub async fn working_window(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<TimeInterval>, SchedulingError> {
        let day = date.weekday();
        let row = self.source.working_window(provider_id, day).await?;
        let window = usable_window(row);
        match (row, window) {
            (Some(r), None) if r.is_available => warn!(
                "provider {provider_id} has malformed window {}-{} on weekday {}",
                r.start_time,
                r.end_time,
                weekday_index(day)
            ),
            (_, Some(w)) => debug!("provider {provider_id} works {w} on {date}"),
            _ => debug!("provider {provider_id} unavailable on {date}"),
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::model::TimeOfDay;
    use chrono::Weekday;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn row(start: &str, end: &str, is_available: bool) -> ProviderWorkingWindow {
        ProviderWorkingWindow {
            start_time: t(start),
            end_time: t(end),
            is_available,
        }
    }

    #[test]
    fn usable_window_rules() {
        assert_eq!(
            usable_window(Some(row("09:00", "18:00", true))),
            Some(TimeInterval::new(t("09:00"), t("18:00")))
        );
        assert_eq!(usable_window(Some(row("09:00", "18:00", false))), None);
        assert_eq!(usable_window(Some(row("18:00", "09:00", true))), None);
        assert_eq!(usable_window(Some(row("09:00", "09:00", true))), None);
        assert_eq!(usable_window(None), None);
    }

    #[tokio::test]
    async fn resolves_by_weekday() {
        let catalog = Arc::new(StaticCatalog::new());
        let provider = Ulid::new();
        catalog.set_working_window(provider, Weekday::Mon, row("09:00", "18:00", true));
        let registry = ScheduleRegistry::new(catalog.clone());

        // 2026-03-02 is a Monday.
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let tuesday = monday.succ_opt().unwrap();
        assert!(registry.working_window(provider, monday).await.unwrap().is_some());
        assert!(registry.working_window(provider, tuesday).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reflects_latest_schedule() {
        let catalog = Arc::new(StaticCatalog::new());
        let provider = Ulid::new();
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let registry = ScheduleRegistry::new(catalog.clone());

        catalog.set_working_window(provider, Weekday::Mon, row("09:00", "12:00", true));
        assert_eq!(
            registry.working_window(provider, monday).await.unwrap(),
            Some(TimeInterval::new(t("09:00"), t("12:00")))
        );

        catalog.set_working_window(provider, Weekday::Mon, row("13:00", "17:00", true));
        assert_eq!(
            registry.working_window(provider, monday).await.unwrap(),
            Some(TimeInterval::new(t("13:00"), t("17:00")))
        );

        catalog.clear_working_window(provider, Weekday::Mon);
        assert_eq!(registry.working_window(provider, monday).await.unwrap(), None);
    }
}
