/// Producer-side debounce for free-text answers. Rapid edits to one prompt
/// are coalesced and released only after a quiet period, measured on an
/// injected clock.
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::schema::response::ResponseValue;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock time, measured from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingEdit {
    prompt_id: String,
    value: ResponseValue,
    last_edit: Duration,
}

/// Latest unsaved value per prompt, in first-edit order.
#[derive(Debug, Clone)]
pub struct AutosaveBuffer {
    quiet_period: Duration,
    pending: Vec<PendingEdit>,
}

impl AutosaveBuffer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: Vec::new(),
        }
    }

    /// Record an edit. A newer edit replaces the older value and restarts
    /// that prompt's quiet period.
    pub fn record(&mut self, prompt_id: &str, value: ResponseValue, now: Duration) {
        match self.pending.iter_mut().find(|e| e.prompt_id == prompt_id) {
            Some(edit) => {
                edit.value = value;
                edit.last_edit = now;
            }
            None => self.pending.push(PendingEdit {
                prompt_id: prompt_id.to_string(),
                value,
                last_edit: now,
            }),
        }
    }

    /// Remove and return edits that have been quiet for the full period.
    pub fn take_due(&mut self, now: Duration) -> Vec<(String, ResponseValue)> {
        let quiet = self.quiet_period;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| now.saturating_sub(e.last_edit) >= quiet);
        self.pending = waiting;
        due.into_iter().map(|e| (e.prompt_id, e.value)).collect()
    }

    /// Remove and return everything, due or not.
    pub fn flush(&mut self) -> Vec<(String, ResponseValue)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|e| (e.prompt_id, e.value))
            .collect()
    }

    /// When the earliest pending edit becomes due.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending
            .iter()
            .map(|e| e.last_edit + self.quiet_period)
            .min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(1_000);

    #[test]
    fn rapid_edits_coalesce_into_one_save() {
        let clock = ManualClock::new();
        let mut buffer = AutosaveBuffer::new(QUIET);

        for text in ["I", "I wa", "I want", "I want more sleep"] {
            buffer.record("goal", text.into(), clock.now());
            clock.advance(Duration::from_millis(300));
        }
        assert!(buffer.take_due(clock.now()).is_empty());

        clock.advance(Duration::from_millis(700));
        let due = buffer.take_due(clock.now());
        assert_eq!(due, vec![("goal".to_string(), ResponseValue::from("I want more sleep"))]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn prompts_debounce_independently() {
        let clock = ManualClock::new();
        let mut buffer = AutosaveBuffer::new(QUIET);
        buffer.record("a", "first".into(), clock.now());
        clock.advance(Duration::from_millis(600));
        buffer.record("b", "second".into(), clock.now());
        assert_eq!(buffer.next_due(), Some(QUIET));

        clock.advance(Duration::from_millis(400));
        let due = buffer.take_due(clock.now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "a");
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.flush(), vec![("b".to_string(), ResponseValue::from("second"))]);
        assert_eq!(buffer.next_due(), None);
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
