use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;
use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time of day: {0:?}")]
pub struct InvalidTimeOfDay(pub String);

/// Minutes since midnight, `00:00..=24:00`. `24:00` only makes sense as an
/// interval end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY as u32).then_some(Self(minutes as u16))
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// `None` if the result would run past `24:00`.
    pub fn checked_add(self, minutes: u32) -> Option<Self> {
        Self::from_minutes(self.0 as u32 + minutes)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = InvalidTimeOfDay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTimeOfDay(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = InvalidTimeOfDay;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeInterval {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "interval start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// `[start, start + duration)`, or `None` for an empty interval or one
    /// that would cross midnight.
    pub fn starting_at(start: TimeOfDay, duration_minutes: u32) -> Option<Self> {
        if duration_minutes == 0 {
            return None;
        }
        let end = start.checked_add(duration_minutes)?;
        Some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.end.minutes() - self.start.minutes()) as u32
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_interval(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 0 = Sunday … 6 = Saturday.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    Some(match index {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown appointment status: {s:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub tenant_id: TenantId,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    /// Always `start_time + service duration`.
    pub end_time: TimeOfDay,
    pub status: AppointmentStatus,
    pub price: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }

    /// Whether this appointment still occupies its time range.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn day_key(&self) -> DayKey {
        DayKey {
            tenant_id: self.tenant_id.clone(),
            provider_id: self.provider_id,
            date: self.date,
        }
    }
}

/// The unit of write contention: one provider's calendar for one day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey {
    pub tenant_id: TenantId,
    pub provider_id: Ulid,
    pub date: NaiveDate,
}

/// A provider's configured hours for one weekday, as kept by the provider
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderWorkingWindow {
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub is_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub duration_minutes: i32,
    pub default_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub price: Option<Decimal>,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentPatch {
    pub client_id: Option<Ulid>,
    pub provider_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub price: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub provider_id: Option<Ulid>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.date.is_none_or(|d| a.date == d)
            && self.status.is_none_or(|s| a.status == s)
            && self.provider_id.is_none_or(|p| a.provider_id == p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub id: Ulid,
    pub interval: TimeInterval,
}

/// Active bookings of one provider on one day, sorted by start time.
#[derive(Debug, Clone, Default)]
pub struct DayBook {
    entries: Vec<Booked>,
}

impl DayBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the book from stored appointments; cancelled ones are skipped.
    pub fn from_appointments<'a>(appointments: impl IntoIterator<Item = &'a Appointment>) -> Self {
        let mut entries: Vec<Booked> = appointments
            .into_iter()
            .filter(|a| a.is_active())
            .map(|a| Booked {
                id: a.id,
                interval: a.interval(),
            })
            .collect();
        entries.sort_by_key(|b| b.interval.start);
        Self { entries }
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, id: Ulid, interval: TimeInterval) {
        let pos = self
            .entries
            .binary_search_by_key(&interval.start, |b| b.interval.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, Booked { id, interval });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booked> {
        self.entries.iter()
    }

    /// Bookings whose interval overlaps `query`. Entries starting at or after
    /// `query.end` are cut off by binary search.
    pub fn overlapping(&self, query: &TimeInterval) -> impl Iterator<Item = &Booked> {
        let right_bound = self.entries.partition_point(|b| b.interval.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |b| b.interval.end > query.start)
    }

    pub fn first_conflict(&self, candidate: &TimeInterval) -> Option<Ulid> {
        self.overlapping(candidate).next().map(|b| b.id)
    }
}

/// WAL record format. Each record carries the full appointment so replay and
/// compaction never need to merge partial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked { appointment: Appointment },
    AppointmentRevised { appointment: Appointment },
}

impl Event {
    pub fn appointment(&self) -> &Appointment {
        match self {
            Event::AppointmentBooked { appointment } | Event::AppointmentRevised { appointment } => {
                appointment
            }
        }
    }
}
