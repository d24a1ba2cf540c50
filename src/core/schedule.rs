//! Weekly trigger evaluation.
//!
//! An agent is due when any of its triggers has passed in the current week
//! (Sunday-based) and the agent has not run since that trigger's instant.

use chrono::{Datelike, NaiveTime, TimeDelta, Timelike};

use super::model::{Agent, Timestamp, Trigger};

pub fn is_due(agent: &Agent, now: Timestamp) -> bool {
    triggers_due(&agent.triggers, agent.last_executed, now)
}

pub fn triggers_due(triggers: &[Trigger], last_executed: Option<Timestamp>, now: Timestamp) -> bool {
    if triggers.is_empty() {
        return false;
    }
    triggers
        .iter()
        .any(|trigger| trigger_fires(trigger, last_executed, now))
}

/// The trigger's instant in `now`'s week, on `now`'s UTC offset.
///
/// The day shift is `-(now.weekday - trigger.day)`, so a trigger whose day
/// lies after `now`'s weekday yields an instant later this week. Such an
/// instant never fires because `trigger_fires` also requires
/// `trigger.day <= now.weekday`.
pub fn trigger_instant(trigger: &Trigger, now: &Timestamp) -> Option<Timestamp> {
    let now_day = i64::from(now.weekday().num_days_from_sunday());
    let time = NaiveTime::from_hms_opt(u32::from(trigger.hour), u32::from(trigger.minute), 0)?;
    let local = now.date_naive().and_time(time) - TimeDelta::days(now_day - i64::from(trigger.day));
    local.and_local_timezone(*now.offset()).single()
}

pub fn trigger_fires(trigger: &Trigger, last_executed: Option<Timestamp>, now: Timestamp) -> bool {
    let Some(instant) = trigger_instant(trigger, &now) else {
        return false;
    };

    let not_yet_satisfied = match last_executed {
        None => true,
        Some(last) => instant > last,
    };
    if !not_yet_satisfied {
        return false;
    }

    let now_day = now.weekday().num_days_from_sunday();
    let day = u32::from(trigger.day);
    if day > now_day {
        return false;
    }
    if day < now_day {
        return true;
    }

    let (hour, minute) = (u32::from(trigger.hour), u32::from(trigger.minute));
    hour < now.hour() || (hour == now.hour() && minute <= now.minute())
}
