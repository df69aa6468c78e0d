use crate::metrics::Labels;
use crate::obs_debug;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct CounterState {
    value: f64,
    labels: Labels,
}

/// A monotonically non-decreasing total.
///
/// Negative and NaN deltas are ignored. Cloning yields another handle to the
/// same counter.
#[derive(Clone)]
pub struct Counter {
    name: Arc<str>,
    state: Arc<Mutex<CounterState>>,
}

impl Counter {
    pub(crate) fn new(name: &str) -> Self {
        Counter {
            name: name.into(),
            state: Arc::new(Mutex::new(CounterState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `delta` to the total. Negative or NaN deltas are ignored.
    pub fn add(&self, delta: f64) {
        if delta.is_nan() || delta < 0.0 {
            obs_debug!(
                name: "Counter.InvalidDelta",
                counter_name = self.name,
                delta = delta,
                message = "Counters only accept non-negative deltas; the update was ignored."
            );
            return;
        }
        self.state().value += delta;
    }

    /// Adds one to the total.
    pub fn inc(&self) {
        self.add(1.0);
    }

    /// The current total.
    pub fn value(&self) -> f64 {
        self.state().value
    }

    /// The counter's registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merges `labels` into the counter's label set, replacing existing keys.
    pub fn with_labels<K, V>(self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.state()
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// A copy of the counter's labels.
    pub fn labels(&self) -> Labels {
        self.state().labels.clone()
    }

    /// Whether both handles refer to the same counter.
    pub fn ptr_eq(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Counter")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("labels", &state.labels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_nan_deltas_are_ignored() {
        let counter = Counter::new("requests");
        counter.add(2.5);
        counter.add(-1.0);
        counter.add(f64::NAN);
        counter.inc();
        assert_eq!(counter.value(), 3.5);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        const THREADS: usize = 8;
        const INCREMENTS: usize = 1_000;
        let counter = Counter::new("hits");

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..INCREMENTS {
                        counter.inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.value(), (THREADS * INCREMENTS) as f64);
    }

    #[test]
    fn labels_are_merged() {
        let counter = Counter::new("requests")
            .with_labels([("method", "GET")])
            .with_labels([("method", "POST"), ("route", "/")]);

        let labels = counter.labels();
        assert_eq!(labels.get("method").map(String::as_str), Some("POST"));
        assert_eq!(labels.len(), 2);
    }
}
