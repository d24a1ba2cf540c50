use chrono::Local;

use super::model::Timestamp;

/// Source of "now" for the pipelines. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now().fixed_offset()
    }
}

#[cfg(test)]
pub struct FixedClock(std::sync::Mutex<Timestamp>);

#[cfg(test)]
impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        Self(std::sync::Mutex::new(
            chrono::DateTime::parse_from_rfc3339(rfc3339).expect("valid timestamp"),
        ))
    }

    pub fn set(&self, rfc3339: &str) {
        *self.0.lock().unwrap() =
            chrono::DateTime::parse_from_rfc3339(rfc3339).expect("valid timestamp");
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap()
    }
}
