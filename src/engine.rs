use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::model::SeatStatus;

/// A requested seat operation that the transition rules refuse. These are
/// caller mistakes, reported before any write is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    /// A generic status change was requested while an open bathroom log
    /// exists. Only `markIn` may move the seat out of `Out`.
    SeatLocked,
    /// `Out` was requested through the generic setter.
    OutIsNotSettable,
    /// `markOut` was requested while the seat is not `Present`.
    NotPresent,
    /// `markIn` was requested with no open bathroom log.
    NotOut,
}

impl RuleViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SeatLocked => "seat_locked",
            Self::OutIsNotSettable => "illegal_transition",
            Self::NotPresent => "illegal_transition",
            Self::NotOut => "not_out",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::SeatLocked => "status is locked while the student is out",
            Self::OutIsNotSettable => "Out can only be entered via markOut",
            Self::NotPresent => "markOut requires status Present",
            Self::NotOut => "no open bathroom log for this seat",
        }
    }
}

/// Legality of `setStatus`. Targets are `Present`, `Absent` and `Pending`;
/// everything is refused while an open log exists so an invigilator cannot
/// silently overwrite the status of a student who is legitimately out.
pub fn check_set_status(requested: SeatStatus, has_open_log: bool) -> Result<(), RuleViolation> {
    if requested == SeatStatus::Out {
        return Err(RuleViolation::OutIsNotSettable);
    }
    if has_open_log {
        return Err(RuleViolation::SeatLocked);
    }
    Ok(())
}

pub fn check_mark_out(current: SeatStatus, has_open_log: bool) -> Result<(), RuleViolation> {
    if has_open_log {
        return Err(RuleViolation::SeatLocked);
    }
    if current != SeatStatus::Present {
        return Err(RuleViolation::NotPresent);
    }
    Ok(())
}

pub fn check_mark_in(has_open_log: bool) -> Result<(), RuleViolation> {
    if !has_open_log {
        return Err(RuleViolation::NotOut);
    }
    Ok(())
}

/// What `setStatus` does to the last-status-change stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampEffect {
    Stamp,
    Clear,
    Keep,
}

pub fn timestamp_effect(requested: SeatStatus) -> TimestampEffect {
    match requested {
        SeatStatus::Present => TimestampEffect::Stamp,
        SeatStatus::Pending => TimestampEffect::Clear,
        _ => TimestampEffect::Keep,
    }
}

/// Whole-second breach test: true once the student has been out for the
/// configured limit or longer.
pub fn is_late(exit_time: DateTime<Utc>, limit_minutes: i64, now: DateTime<Utc>) -> bool {
    (now - exit_time).num_seconds() >= limit_minutes * 60
}

/// One pass of the breach detector over the open log entries.
///
/// `open` is the live snapshot of (log id, exit time) pairs still `OUT`.
/// Returns the log ids that have crossed the limit on this pass and were not
/// alerted before, together with the carried-over alerted set. Ids whose log
/// is no longer open are dropped from the set, so a later visit by the same
/// student alerts independently.
pub fn scan_breaches(
    open: &[(String, DateTime<Utc>)],
    limit_minutes: i64,
    alerted: &HashSet<String>,
    now: DateTime<Utc>,
) -> (Vec<String>, HashSet<String>) {
    let open_ids: HashSet<&str> = open.iter().map(|(id, _)| id.as_str()).collect();
    let mut carried: HashSet<String> = alerted
        .iter()
        .filter(|id| open_ids.contains(id.as_str()))
        .cloned()
        .collect();

    let mut fresh = Vec::new();
    for (log_id, exit_time) in open {
        if is_late(*exit_time, limit_minutes, now) && !carried.contains(log_id) {
            fresh.push(log_id.clone());
            carried.insert(log_id.clone());
        }
    }
    (fresh, carried)
}

/// Alert de-duplication state for one monitored exam. Replaced wholesale when
/// the invigilator switches exams, which resets the alerted set.
#[derive(Debug)]
pub struct MonitorSession {
    pub exam_id: String,
    pub limit_minutes: i64,
    pub grace_minutes: i64,
    alerted: HashSet<String>,
}

impl MonitorSession {
    pub fn new(exam_id: String, limit_minutes: i64, grace_minutes: i64) -> Self {
        Self {
            exam_id,
            limit_minutes,
            grace_minutes,
            alerted: HashSet::new(),
        }
    }

    /// Runs one scan and folds the result back into the session.
    pub fn tick(&mut self, open: &[(String, DateTime<Utc>)], now: DateTime<Utc>) -> Vec<String> {
        let (fresh, carried) = scan_breaches(open, self.limit_minutes, &self.alerted, now);
        self.alerted = carried;
        fresh
    }
}

/// Orders the selected students by name (plain string comparison, matric as
/// tiebreak) and hands out table numbers 1..N in that order. The sequence is
/// recomputed from scratch on every save; there is no continuity with any
/// earlier assignment.
pub fn assign_seat_numbers(mut students: Vec<(String, String)>) -> Vec<(String, String, u32)> {
    students.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    students
        .into_iter()
        .enumerate()
        .map(|(idx, (matric, name))| (matric, name, idx as u32 + 1))
        .collect()
}

/// Whether the exam's scheduled end plus the grace window has passed. The
/// schedule strings are wall time, so `now` must be in the same local frame.
/// Unparsable or missing schedule fields mean "not ended"; monitoring stays
/// available for exams without a confirmed schedule.
pub fn exam_ended(
    date: Option<&str>,
    end_time: Option<&str>,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> bool {
    let (Some(date), Some(end_time)) = (date, end_time) else {
        return false;
    };
    let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return false;
    };
    let Ok(t) = NaiveTime::parse_from_str(end_time, "%H:%M") else {
        return false;
    };
    now > d.and_time(t) + Duration::minutes(grace_minutes)
}
