//! Session high/low tracking and the Average Daily Range over prior sessions.

use crate::snapshot::RangeSummary;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate};
use std::collections::VecDeque;

/// Outcome of folding one price into the day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeUpdate {
    /// Price landed in the current session
    Updated,
    /// Price opened a new session; the previous one was folded into the ADR
    Rolled,
    /// Price belongs to an already completed session
    Ignored,
}

#[derive(Debug, Clone)]
pub struct DayRange {
    session_offset: ChronoDuration,
    session: Option<NaiveDate>,
    high: f64,
    low: f64,
    completed: VecDeque<f64>,
    adr_days: usize,
}

impl DayRange {
    pub fn new(adr_days: usize, session_offset_hours: i64) -> Self {
        Self {
            session_offset: ChronoDuration::hours(session_offset_hours),
            session: None,
            high: f64::MIN,
            low: f64::MAX,
            completed: VecDeque::with_capacity(adr_days),
            adr_days,
        }
    }

    /// Trading date a tick belongs to, after shifting by the session offset.
    pub fn session_of(&self, ts: i64) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(ts).map(|time| (time - self.session_offset).date_naive())
    }

    pub fn update(&mut self, price: f64, ts: i64) -> RangeUpdate {
        let Some(session) = self.session_of(ts) else {
            return RangeUpdate::Ignored;
        };

        match self.session {
            None => {
                self.session = Some(session);
                self.reset(price);
                RangeUpdate::Updated
            }
            Some(current) if session < current => RangeUpdate::Ignored,
            Some(current) if session > current => {
                self.roll();
                self.session = Some(session);
                self.reset(price);
                RangeUpdate::Rolled
            }
            Some(_) => {
                self.high = self.high.max(price);
                self.low = self.low.min(price);
                RangeUpdate::Updated
            }
        }
    }

    pub fn adr(&self) -> Option<f64> {
        if self.completed.is_empty() {
            None
        } else {
            Some(self.completed.iter().sum::<f64>() / self.completed.len() as f64)
        }
    }

    pub fn summary(&self) -> RangeSummary {
        let (day_high, day_low) = if self.session.is_some() {
            (self.high, self.low)
        } else {
            (0.0, 0.0)
        };
        RangeSummary {
            day_high,
            day_low,
            adr: self.adr(),
            adr_days: self.completed.len(),
        }
    }

    fn roll(&mut self) {
        if self.high >= self.low {
            if self.completed.len() >= self.adr_days {
                self.completed.pop_front();
            }
            self.completed.push_back(self.high - self.low);
        }
    }

    fn reset(&mut self, price: f64) {
        self.high = price;
        self.low = price;
    }
}
