use crate::metrics::Labels;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GaugeState {
    value: f64,
    labels: Labels,
}

/// The last value set, without history.
#[derive(Clone)]
pub struct Gauge {
    name: Arc<str>,
    state: Arc<Mutex<GaugeState>>,
}

impl Gauge {
    pub(crate) fn new(name: &str) -> Self {
        Gauge {
            name: name.into(),
            state: Arc::new(Mutex::new(GaugeState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, GaugeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the current value.
    pub fn set(&self, value: f64) {
        self.state().value = value;
    }

    /// The last value set, 0 before the first `set`.
    pub fn value(&self) -> f64 {
        self.state().value
    }

    /// The gauge's registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merges `labels` into the gauge's label set, replacing existing keys.
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

    /// A copy of the gauge's labels.
    pub fn labels(&self) -> Labels {
        self.state().labels.clone()
    }

    /// Whether both handles refer to the same gauge.
    pub fn ptr_eq(&self, other: &Gauge) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Gauge")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("labels", &state.labels)
            .finish()
    }
}
