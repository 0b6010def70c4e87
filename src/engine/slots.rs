use crate::limits::SLOT_GRANULARITY_MINUTES;
use crate::model::{DayBook, TimeInterval, TimeOfDay};

/// Candidate starts `window.start, +G, …` while the appointment still ends
/// inside the window. Cloning restarts the sequence from where it was.
#[derive(Debug, Clone)]
pub struct CandidateStarts {
    next: u32,
    last_start: Option<u32>,
}

impl CandidateStarts {
    pub fn new(window: TimeInterval, duration_minutes: u32) -> Self {
        let end = window.end.minutes() as u32;
        let start = window.start.minutes() as u32;
        let last_start = end.checked_sub(duration_minutes).filter(|last| *last >= start);
        Self { next: start, last_start }
    }
}

impl Iterator for CandidateStarts {
    type Item = TimeOfDay;

    fn next(&mut self) -> Option<TimeOfDay> {
        let last = self.last_start?;
        if self.next > last {
            return None;
        }
        let t = TimeOfDay::from_minutes(self.next)?;
        self.next += SLOT_GRANULARITY_MINUTES as u32;
        Some(t)
    }
}

/// Candidate starts whose `[t, t + duration)` overlaps nothing in `book`.
#[derive(Debug, Clone)]
pub struct OpenSlots<'a> {
    candidates: CandidateStarts,
    duration_minutes: u32,
    book: &'a DayBook,
}

impl<'a> OpenSlots<'a> {
    pub fn new(window: TimeInterval, duration_minutes: u32, book: &'a DayBook) -> Self {
        Self {
            candidates: CandidateStarts::new(window, duration_minutes),
            duration_minutes,
            book,
        }
    }
}

impl Iterator for OpenSlots<'_> {
    type Item = TimeOfDay;

    fn next(&mut self) -> Option<TimeOfDay> {
        for start in self.candidates.by_ref() {
            let candidate = TimeInterval::starting_at(start, self.duration_minutes)?;
            if self.book.first_conflict(&candidate).is_none() {
                return Some(start);
            }
        }
        None
    }
}
