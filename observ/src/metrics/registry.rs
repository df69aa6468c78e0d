use crate::metrics::{Counter, Gauge, Histogram, MetricData, MetricValue};
use crate::obs_warn;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

#[derive(Clone, Debug)]
enum Instrument {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Instrument {
    fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => "counter",
            Instrument::Gauge(_) => "gauge",
            Instrument::Histogram(_) => "histogram",
        }
    }
}

/// Owns the named instruments of one observer.
///
/// Lookups are idempotent: the first request for a name creates the
/// instrument and every later request, from any thread, returns a handle to
/// that same instrument. The registry is instance scoped, so two observers
/// never share instruments.
#[derive(Default)]
pub struct MetricRegistry {
    instruments: RwLock<HashMap<String, Instrument>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        MetricRegistry::default()
    }

    /// Returns the counter named `name`, creating it on first use.
    pub fn counter(&self, name: &str) -> Counter {
        let found = self.get_or_insert(name, "counter", || Instrument::Counter(Counter::new(name)));
        match found {
            Some(Instrument::Counter(counter)) => counter,
            _ => Counter::new(name),
        }
    }

    /// Returns the gauge named `name`, creating it on first use.
    pub fn gauge(&self, name: &str) -> Gauge {
        let found = self.get_or_insert(name, "gauge", || Instrument::Gauge(Gauge::new(name)));
        match found {
            Some(Instrument::Gauge(gauge)) => gauge,
            _ => Gauge::new(name),
        }
    }

    /// Returns the histogram named `name`, creating it with `buckets` on first
    /// use. Later calls return the existing histogram and ignore `buckets`.
    pub fn histogram(&self, name: &str, buckets: &[f64]) -> Histogram {
        let found = self.get_or_insert(name, "histogram", || {
            Instrument::Histogram(Histogram::new(name, buckets))
        });
        match found {
            Some(Instrument::Histogram(histogram)) => histogram,
            _ => Histogram::new(name, buckets),
        }
    }

    /// Returns the stored instrument when it has the requested kind, `None`
    /// (after warning) when the name is taken by another kind.
    fn get_or_insert(
        &self,
        name: &str,
        kind: &'static str,
        create: impl FnOnce() -> Instrument,
    ) -> Option<Instrument> {
        // Fast path on the read lock; most lookups find an existing instrument.
        let existing = self
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        let instrument = match existing {
            Some(instrument) => instrument,
            None => {
                let mut instruments = self
                    .instruments
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                // Another thread may have inserted it between the two locks.
                instruments
                    .entry(name.to_owned())
                    .or_insert_with(create)
                    .clone()
            }
        };

        if instrument.kind() == kind {
            Some(instrument)
        } else {
            obs_warn!(
                name: "MetricRegistry.InstrumentKindConflict",
                instrument_name = name,
                registered_kind = instrument.kind(),
                requested_kind = kind,
                message = "The name is registered with another kind. A detached instrument that is never collected was returned."
            );
            None
        }
    }

    /// A snapshot of every registered instrument, sorted by name.
    pub fn collect(&self) -> Vec<MetricData> {
        let instruments = self
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut data: Vec<MetricData> = instruments
            .iter()
            .map(|(name, instrument)| {
                let (labels, value) = match instrument {
                    Instrument::Counter(c) => (c.labels(), MetricValue::Counter(c.value())),
                    Instrument::Gauge(g) => (g.labels(), MetricValue::Gauge(g.value())),
                    Instrument::Histogram(h) => (h.labels(), MetricValue::Histogram(h.snapshot())),
                };
                MetricData {
                    name: name.clone(),
                    labels,
                    value,
                }
            })
            .collect();
        drop(instruments);

        data.sort_by(|a, b| a.name.cmp(&b.name));
        data
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no instrument is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("instruments", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn lookups_return_the_same_instance() {
        let registry = MetricRegistry::new();
        let first = registry.counter("requests");
        let second = registry.counter("requests");
        assert!(first.ptr_eq(&second));

        first.inc();
        assert_eq!(second.value(), 1.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_lookups_create_one_instance() {
        let registry = Arc::new(MetricRegistry::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        registry.counter("hits").inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.counter("hits").value(), 800.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn kind_conflict_returns_detached_instrument() {
        let registry = MetricRegistry::new();
        registry.counter("shared").add(5.0);

        let gauge = registry.gauge("shared");
        gauge.set(1.0);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.counter("shared").value(), 5.0);
        assert!(matches!(
            registry.collect()[0].value,
            MetricValue::Counter(v) if v == 5.0
        ));
    }

    #[test]
    fn histogram_keeps_first_buckets() {
        let registry = MetricRegistry::new();
        let first = registry.histogram("latency", &[1.0, 2.0]);
        let second = registry.histogram("latency", &[100.0]);
        assert!(first.ptr_eq(&second));
        assert_eq!(second.boundaries(), &[1.0, 2.0]);
    }

    #[test]
    fn collect_is_sorted_by_name() {
        let registry = MetricRegistry::new();
        registry.gauge("zeta").set(1.0);
        registry.counter("alpha").inc();
        registry.histogram("mid", &[1.0]).observe(0.5);

        let names: Vec<_> = registry.collect().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
