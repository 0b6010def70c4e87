/// Minutes in a calendar day; also the largest valid interval end (`24:00`).
pub const MINUTES_PER_DAY: u16 = 1440;

/// Fixed step between candidate slot starts.
pub const SLOT_GRANULARITY_MINUTES: u16 = 30;

/// Duration used for slot queries that name no service.
pub const DEFAULT_SLOT_DURATION_MINUTES: i32 = 30;

/// A single appointment can't outlast the day it starts on.
pub const MAX_DURATION_MINUTES: i32 = MINUTES_PER_DAY as i32;

pub const MAX_TENANT_ID_LEN: usize = 128;
pub const MAX_TENANTS: usize = 10_000;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_LIST_RESULTS: usize = 10_000;

/// Idle per-day lock entries kept before the lock table is pruned.
pub const MAX_IDLE_DAY_LOCKS: usize = 4096;
